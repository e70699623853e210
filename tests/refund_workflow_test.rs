mod common;

use std::time::Duration;

use axum::http::StatusCode;
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use intake_api::entities::intake::{self, IntakeCategory, PaymentStatus};
use intake_api::entities::payment::{self, PaymentState, RefundStatus};
use intake_api::errors::ServiceError;

use common::{response_json, TestApp};

fn decision_body() -> Value {
    json!({ "decision": "declined", "actor_id": Uuid::new_v4() })
}

fn refund_created_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "re_test_1",
        "amount": 1990
    }))
}

async fn payment_row(app: &TestApp, payment_id: Uuid) -> payment::Model {
    payment::Entity::find_by_id(payment_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("payment row")
}

#[tokio::test]
async fn declined_certificate_is_refunded_exactly_once() {
    let app = TestApp::new().await;
    let (intake_id, payment_id) = app
        .seed_declined_paid_intake(IntakeCategory::Certificate, Some("pay_abc"))
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(refund_created_response())
        .expect(1)
        .mount(&app.gateway)
        .await;

    let uri = format!("/api/v1/intakes/{}/decision", intake_id);

    let first = response_json(app.post_json(&uri, decision_body()).await).await;
    assert_eq!(first["refunded"], json!(true));
    assert_eq!(first["status"], json!("refunded"));

    // The second call must short-circuit on the recorded refund ref.
    let second = response_json(app.post_json(&uri, decision_body()).await).await;
    assert_eq!(second["refunded"], json!(true));

    let paid = payment_row(&app, payment_id).await;
    assert_eq!(paid.status, PaymentState::Refunded);
    assert_eq!(paid.refund_status, RefundStatus::Refunded);
    assert_eq!(paid.gateway_refund_ref.as_deref(), Some("re_test_1"));
    assert_eq!(paid.refund_amount_cents, Some(1_990));

    let stored = intake::Entity::find_by_id(intake_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn consult_decline_is_never_refunded() {
    let app = TestApp::new().await;
    let (intake_id, payment_id) = app
        .seed_declined_paid_intake(IntakeCategory::Consult, Some("pay_consult"))
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(refund_created_response())
        .expect(0)
        .mount(&app.gateway)
        .await;

    let body = response_json(
        app.post_json(
            &format!("/api/v1/intakes/{}/decision", intake_id),
            decision_body(),
        )
        .await,
    )
    .await;

    assert_eq!(body["refunded"], json!(false));
    assert_eq!(body["status"], json!("not_eligible"));

    let paid = payment_row(&app, payment_id).await;
    assert_eq!(paid.refund_status, RefundStatus::NotEligible);
    assert_eq!(paid.status, PaymentState::Paid);
    assert!(paid.gateway_refund_ref.is_none());
}

#[tokio::test]
async fn failed_refund_is_retryable() {
    let app = TestApp::new().await;
    let (intake_id, payment_id) = app
        .seed_declined_paid_intake(IntakeCategory::Prescription, Some("pay_rx"))
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.gateway)
        .await;

    let uri = format!("/api/v1/intakes/{}/decision", intake_id);
    let first = response_json(app.post_json(&uri, decision_body()).await).await;
    assert_eq!(first["refunded"], json!(false));
    assert_eq!(first["status"], json!("failed"));

    let paid = payment_row(&app, payment_id).await;
    assert_eq!(paid.refund_status, RefundStatus::Failed);

    // `failed` is not a short-circuit state: a later call retries.
    app.gateway.reset().await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(refund_created_response())
        .expect(1)
        .mount(&app.gateway)
        .await;

    let second = response_json(app.post_json(&uri, decision_body()).await).await;
    assert_eq!(second["refunded"], json!(true));

    let paid = payment_row(&app, payment_id).await;
    assert_eq!(paid.refund_status, RefundStatus::Refunded);
}

#[tokio::test]
async fn concurrent_refunds_reach_the_gateway_once() {
    let app = TestApp::new().await;
    let (intake_id, _payment_id) = app
        .seed_declined_paid_intake(IntakeCategory::Certificate, Some("pay_race"))
        .await;

    // Slow gateway so the second caller overlaps the in-flight refund.
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(refund_created_response().set_delay(Duration::from_millis(250)))
        .expect(1)
        .mount(&app.gateway)
        .await;

    let refunds = app.state.services.refunds.clone();
    let actor = Uuid::new_v4();
    let (a, b) = tokio::join!(
        refunds.refund_if_eligible(intake_id, actor),
        refunds.refund_if_eligible(intake_id, actor),
    );

    let mut succeeded = 0;
    let mut conflicted = 0;
    for result in [a, b] {
        match result {
            Ok(outcome) if outcome.refunded => succeeded += 1,
            Ok(outcome) => panic!("unexpected refund outcome: {:?}", outcome),
            Err(ServiceError::Conflict(_)) => conflicted += 1,
            Err(e) => panic!("unexpected refund error: {e}"),
        }
    }

    // One call wins the lock; the other either observes the lock or the
    // completed refund. Either way, the wiremock expectation pins the
    // gateway call count to exactly one.
    assert!(succeeded >= 1);
    assert_eq!(succeeded + conflicted, 2);
}

#[tokio::test]
async fn refund_requires_a_decline_decision() {
    let app = TestApp::new().await;

    // A pending intake must report not_applicable, even when paid.
    let (intake_id, _) = app
        .seed_declined_paid_intake(IntakeCategory::Certificate, Some("pay_pending"))
        .await;
    let stored = intake::Entity::find_by_id(intake_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: intake::ActiveModel = stored.into();
    active.status = sea_orm::Set(intake::IntakeStatus::PendingPayment);
    sea_orm::ActiveModelTrait::update(active, &*app.state.db)
        .await
        .unwrap();

    let outcome = app
        .state
        .services
        .refunds
        .refund_if_eligible(intake_id, Uuid::new_v4())
        .await
        .expect("refund check");
    assert!(!outcome.refunded);
    assert_eq!(outcome.status, "not_applicable");
}

#[tokio::test]
async fn refund_without_captured_payment_reports_not_found() {
    let app = TestApp::new().await;
    let (intake_id, payment_id) = app
        .seed_declined_paid_intake(IntakeCategory::Certificate, Some("pay_gone"))
        .await;

    // Remove the payment row: a declined intake that was never captured.
    payment::Entity::delete_by_id(payment_id)
        .exec(&*app.state.db)
        .await
        .unwrap();

    let response = app
        .post_json(
            &format!("/api/v1/intakes/{}/decision", intake_id),
            decision_body(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refund_without_gateway_reference_is_rejected() {
    let app = TestApp::new().await;
    let (intake_id, payment_id) = app
        .seed_declined_paid_intake(IntakeCategory::Certificate, None)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(refund_created_response())
        .expect(0)
        .mount(&app.gateway)
        .await;

    let result = app
        .state
        .services
        .refunds
        .refund_if_eligible(intake_id, Uuid::new_v4())
        .await;
    assert_matches::assert_matches!(result, Err(ServiceError::InvalidOperation(_)));

    let paid = payment_row(&app, payment_id).await;
    assert_eq!(paid.refund_status, RefundStatus::None);
}

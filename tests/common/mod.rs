use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    routing::get,
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::MockServer;

use intake_api::{
    config::AppConfig,
    db,
    entities::{
        intake::{self, IntakeCategory, IntakeStatus, PaymentStatus},
        payment::{self, PaymentState, RefundStatus},
        service_offering::{self, RiskTier},
    },
    events::{self, EventSender},
    gateway::RestPaymentGateway,
    handlers::AppServices,
    AppState,
};

/// Harness spinning up application state backed by a throwaway SQLite
/// database and a wiremock payment gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: MockServer,
    db_file: PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application, letting the caller adjust the config
    /// (kill switch, pricing table, gate rules) before services are built.
    pub async fn with_config<F: FnOnce(&mut AppConfig)>(customize: F) -> Self {
        let gateway_server = MockServer::start().await;

        let db_file = std::env::temp_dir().join(format!("intake_test_{}.db", Uuid::new_v4()));
        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway.base_url = gateway_server.uri();
        cfg.gateway.max_retries = 2;
        cfg.gateway.success_url = "http://localhost:3000/checkout/success".to_string();
        cfg.gateway.cancel_url = "http://localhost:3000/checkout/cancelled".to_string();
        cfg.pricing.refs.insert(
            "certificate:single_day".to_string(),
            "price_cert_single".to_string(),
        );
        cfg.pricing.refs.insert(
            "certificate:multi_day".to_string(),
            "price_cert_multi".to_string(),
        );
        cfg.pricing.refs.insert(
            "prescription:standard".to_string(),
            "price_rx_standard".to_string(),
        );
        cfg.pricing.refs.insert(
            "consult:standard".to_string(),
            "price_consult_standard".to_string(),
        );
        cfg.gate_rules.blocked_medications = vec!["diazepam".to_string()];
        cfg.gate_rules.call_required_medications = vec!["isotretinoin".to_string()];
        cfg.gate_rules.max_certificate_days = 2;

        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let config = Arc::new(cfg);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway: Arc<dyn intake_api::gateway::PaymentGateway> =
            Arc::new(RestPaymentGateway::new(&config.gateway));

        let services =
            AppServices::new(db_arc.clone(), config.clone(), gateway, event_sender.clone());

        let state = AppState {
            db: db_arc,
            config,
            event_sender,
            services,
        };

        let router = Router::new()
            .route(
                "/health",
                get(intake_api::handlers::health::health_check),
            )
            .nest("/api/v1", intake_api::api_v1_routes())
            .with_state(state.clone());

        let app = Self {
            router,
            state,
            gateway: gateway_server,
            db_file,
            _event_task: event_task,
        };
        app.seed_default_services().await;
        app
    }

    async fn seed_default_services(&self) {
        self.seed_service("certificate_work", IntakeCategory::Certificate, 1_990, RiskTier::Low)
            .await;
        self.seed_service(
            "prescription_repeat",
            IntakeCategory::Prescription,
            2_990,
            RiskTier::High,
        )
        .await;
        self.seed_service("consult_general", IntakeCategory::Consult, 4_990, RiskTier::Medium)
            .await;
    }

    pub async fn seed_service(
        &self,
        slug: &str,
        category: IntakeCategory,
        price_cents: i64,
        risk_tier: RiskTier,
    ) -> service_offering::Model {
        let now = Utc::now();
        service_offering::ActiveModel {
            id: Set(Uuid::new_v4()),
            slug: Set(slug.to_string()),
            name: Set(slug.replace('_', " ")),
            category: Set(category),
            price_cents: Set(price_cents),
            risk_tier: Set(risk_tier),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed catalog service")
    }

    /// Seeds a declined intake with a captured payment, the precondition
    /// for the refund pipeline.
    #[allow(dead_code)]
    pub async fn seed_declined_paid_intake(
        &self,
        category: IntakeCategory,
        gateway_payment_ref: Option<&str>,
    ) -> (Uuid, Uuid) {
        let now = Utc::now();
        let intake_id = Uuid::new_v4();
        intake::ActiveModel {
            id: Set(intake_id),
            patient_id: Set(Uuid::new_v4()),
            service_id: Set(Uuid::new_v4()),
            category: Set(category),
            subtype: Set("seeded".to_string()),
            status: Set(IntakeStatus::Declined),
            payment_status: Set(PaymentStatus::Paid),
            amount_cents: Set(1_990),
            idempotency_key: Set(format!("seed-{}", Uuid::new_v4())),
            payment_session_ref: Set(Some("cs_seed".to_string())),
            checkout_url: Set(None),
            checkout_error: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed intake");

        let payment_id = Uuid::new_v4();
        payment::ActiveModel {
            id: Set(payment_id),
            intake_id: Set(intake_id),
            gateway_payment_ref: Set(gateway_payment_ref.map(str::to_string)),
            status: Set(PaymentState::Paid),
            amount_cents: Set(1_990),
            refund_status: Set(RefundStatus::None),
            refund_amount_cents: Set(None),
            gateway_refund_ref: Set(None),
            refund_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed payment");

        (intake_id, payment_id)
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> axum::response::Response {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn get(&self, uri: &str) -> axum::response::Response {
        self.request(Method::GET, uri, None).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

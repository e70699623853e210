use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Telemetry and audit events emitted by the intake pipeline. Event
/// delivery is best-effort: a send failure is logged and never aborts the
/// flow that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Fired for every safety gate evaluation, including ALLOW, so gate
    /// effectiveness can be analysed offline.
    GateEvaluated {
        service_slug: String,
        outcome: String,
        risk_tier: String,
        triggered_rules: Vec<String>,
    },
    /// Fired when a non-ALLOW gate outcome blocks a submission. Distinct
    /// from the evaluation event.
    SubmissionBlocked {
        service_slug: String,
        outcome: String,
        reason: String,
    },
    IntakeCreated(Uuid),
    CheckoutSessionOpened {
        intake_id: Uuid,
        session_ref: String,
    },
    CheckoutFailed {
        intake_id: Uuid,
        error: String,
    },
    FraudFlagged {
        intake_id: Uuid,
        patient_id: Uuid,
        flags: Vec<String>,
        score: u32,
    },
    IntakeDeclined {
        intake_id: Uuid,
        actor_id: Uuid,
    },
    RefundProcessed {
        intake_id: Uuid,
        gateway_refund_ref: String,
        amount_cents: i64,
        actor_id: Uuid,
    },
    RefundFailed {
        intake_id: Uuid,
        reason: String,
        actor_id: Uuid,
    },
    RefundNotEligible {
        intake_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Best-effort send: failures are logged and swallowed. Telemetry must
    /// never abort the primary flow.
    pub async fn send_logged(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping telemetry event");
        }
    }
}

/// Consumes events from the pipeline and writes them to the structured log.
/// Runs for the lifetime of the process.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::GateEvaluated {
                service_slug,
                outcome,
                risk_tier,
                triggered_rules,
            } => {
                info!(
                    service = %service_slug,
                    outcome = %outcome,
                    risk_tier = %risk_tier,
                    rules = ?triggered_rules,
                    "Gate evaluated"
                );
            }
            Event::SubmissionBlocked {
                service_slug,
                outcome,
                reason,
            } => {
                info!(service = %service_slug, outcome = %outcome, reason = %reason, "Submission blocked");
            }
            Event::IntakeCreated(intake_id) => {
                info!(intake_id = %intake_id, "Intake created");
            }
            Event::CheckoutSessionOpened {
                intake_id,
                session_ref,
            } => {
                info!(intake_id = %intake_id, session_ref = %session_ref, "Checkout session opened");
            }
            Event::CheckoutFailed { intake_id, error } => {
                warn!(intake_id = %intake_id, error = %error, "Checkout failed");
            }
            Event::FraudFlagged {
                intake_id,
                patient_id,
                flags,
                score,
            } => {
                warn!(
                    intake_id = %intake_id,
                    patient_id = %patient_id,
                    flags = ?flags,
                    score = score,
                    "Fraud flags raised"
                );
            }
            Event::IntakeDeclined {
                intake_id,
                actor_id,
            } => {
                info!(intake_id = %intake_id, actor_id = %actor_id, "Intake declined");
            }
            Event::RefundProcessed {
                intake_id,
                gateway_refund_ref,
                amount_cents,
                actor_id,
            } => {
                info!(
                    intake_id = %intake_id,
                    refund_ref = %gateway_refund_ref,
                    amount_cents = amount_cents,
                    actor_id = %actor_id,
                    "Refund processed"
                );
            }
            Event::RefundFailed {
                intake_id,
                reason,
                actor_id,
            } => {
                warn!(intake_id = %intake_id, reason = %reason, actor_id = %actor_id, "Refund failed");
            }
            Event::RefundNotEligible { intake_id, reason } => {
                info!(intake_id = %intake_id, reason = %reason, "Refund not eligible");
            }
        }
    }

    info!("Event processing loop stopped");
}

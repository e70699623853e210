use metrics::counter;
use tracing::{info, instrument};

use crate::config::GateRulesConfig;
use crate::entities::service_offering;
use crate::events::{Event, EventSender};
use crate::models::answers::AnswerPayload;

/// Verdict classes produced by the safety gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Allow,
    Decline,
    RequiresCall,
    RequestMoreInfo,
}

impl GateOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            GateOutcome::Allow => "allow",
            GateOutcome::Decline => "decline",
            GateOutcome::RequiresCall => "requires_call",
            GateOutcome::RequestMoreInfo => "request_more_info",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateDecision {
    pub outcome: GateOutcome,
    /// Human-readable reason, shown to the patient verbatim on a block
    pub reason: String,
    pub triggered_rules: Vec<String>,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            outcome: GateOutcome::Allow,
            reason: String::new(),
            triggered_rules: Vec::new(),
        }
    }

    fn blocked(outcome: GateOutcome, reason: &str, rule: &str) -> Self {
        Self {
            outcome,
            reason: reason.to_string(),
            triggered_rules: vec![rule.to_string()],
        }
    }
}

/// Pure evaluation of submitted answers against the configured rule set.
/// No persistence; the only side effect is telemetry, which fires for every
/// evaluation including ALLOW.
#[derive(Clone)]
pub struct SafetyGate {
    rules: GateRulesConfig,
    events: EventSender,
}

impl SafetyGate {
    pub fn new(rules: GateRulesConfig, events: EventSender) -> Self {
        Self { rules, events }
    }

    #[instrument(skip(self, service, answers), fields(service = %service.slug))]
    pub async fn evaluate(
        &self,
        service: &service_offering::Model,
        answers: &AnswerPayload,
    ) -> GateDecision {
        let decision = self.classify(answers);

        counter!(
            "intake_gate_evaluations_total",
            1,
            "outcome" => decision.outcome.label()
        );
        info!(
            outcome = decision.outcome.label(),
            rules = ?decision.triggered_rules,
            "Safety gate evaluated"
        );
        self.events
            .send_logged(Event::GateEvaluated {
                service_slug: service.slug.clone(),
                outcome: decision.outcome.label().to_string(),
                risk_tier: service.risk_tier.as_str().to_string(),
                triggered_rules: decision.triggered_rules.clone(),
            })
            .await;

        decision
    }

    fn classify(&self, answers: &AnswerPayload) -> GateDecision {
        match answers {
            AnswerPayload::Certificate(answers) => {
                if answers.reason.trim().is_empty() {
                    return GateDecision::blocked(
                        GateOutcome::RequestMoreInfo,
                        "We need a little more detail about why you need this certificate",
                        "cert.reason.missing",
                    );
                }
                if answers.duration_days() > i64::from(self.rules.max_certificate_days) {
                    return GateDecision::blocked(
                        GateOutcome::RequiresCall,
                        "Certificates covering this many days need a quick phone consultation first",
                        "cert.duration.exceeds_self_serve",
                    );
                }
                GateDecision::allow()
            }
            AnswerPayload::Prescription(answers) => {
                let medication = answers.medication.trim().to_lowercase();
                if medication.is_empty() {
                    return GateDecision::blocked(
                        GateOutcome::RequestMoreInfo,
                        "Please tell us which medication you are requesting",
                        "rx.medication.missing",
                    );
                }
                if self.rules.blocked_medications.contains(&medication) {
                    return GateDecision::blocked(
                        GateOutcome::Decline,
                        "This medication cannot be supplied through our online service under our compliance rules",
                        "rx.medication.blocked",
                    );
                }
                if self.rules.call_required_medications.contains(&medication) {
                    return GateDecision::blocked(
                        GateOutcome::RequiresCall,
                        "This medication needs a quick phone consultation before it can be prescribed",
                        "rx.medication.call_required",
                    );
                }
                if answers.pregnant_or_breastfeeding == Some(true) {
                    return GateDecision::blocked(
                        GateOutcome::RequiresCall,
                        "We need to speak with you before prescribing during pregnancy or breastfeeding",
                        "rx.pregnancy.review",
                    );
                }
                GateDecision::allow()
            }
            AnswerPayload::Consult(answers) => {
                if answers.reason.trim().is_empty() {
                    return GateDecision::blocked(
                        GateOutcome::RequestMoreInfo,
                        "Please tell us what you would like to discuss",
                        "consult.reason.missing",
                    );
                }
                GateDecision::allow()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answers::{CertificateAnswers, PrescriptionAnswers};
    use chrono::NaiveDate;
    use tokio::sync::mpsc;

    fn gate(rules: GateRulesConfig) -> SafetyGate {
        let (tx, _rx) = mpsc::channel(16);
        SafetyGate::new(rules, EventSender::new(tx))
    }

    fn certificate(start: &str, end: &str) -> AnswerPayload {
        AnswerPayload::Certificate(CertificateAnswers {
            reason: "influenza".to_string(),
            start_date: NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap(),
            end_date: NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap(),
            symptoms: None,
        })
    }

    fn prescription(medication: &str) -> AnswerPayload {
        AnswerPayload::Prescription(PrescriptionAnswers {
            medication: medication.to_string(),
            dosage: None,
            previously_prescribed: true,
            allergies: None,
            pregnant_or_breastfeeding: None,
        })
    }

    #[test]
    fn short_certificate_is_allowed() {
        let gate = gate(GateRulesConfig::default());
        let decision = gate.classify(&certificate("2025-03-03", "2025-03-04"));
        assert_eq!(decision.outcome, GateOutcome::Allow);
        assert!(decision.triggered_rules.is_empty());
    }

    #[test]
    fn long_certificate_requires_a_call() {
        let gate = gate(GateRulesConfig {
            max_certificate_days: 2,
            ..Default::default()
        });
        let decision = gate.classify(&certificate("2025-03-03", "2025-03-07"));
        assert_eq!(decision.outcome, GateOutcome::RequiresCall);
        assert_eq!(
            decision.triggered_rules,
            vec!["cert.duration.exceeds_self_serve".to_string()]
        );
    }

    #[test]
    fn blocked_medication_is_declined_with_reason() {
        let gate = gate(GateRulesConfig {
            blocked_medications: vec!["diazepam".to_string()],
            ..Default::default()
        });
        let decision = gate.classify(&prescription("Diazepam"));
        assert_eq!(decision.outcome, GateOutcome::Decline);
        assert!(decision.reason.contains("compliance"));
    }

    #[test]
    fn call_required_medication_is_not_declined() {
        let gate = gate(GateRulesConfig {
            call_required_medications: vec!["isotretinoin".to_string()],
            ..Default::default()
        });
        let decision = gate.classify(&prescription("isotretinoin"));
        assert_eq!(decision.outcome, GateOutcome::RequiresCall);
    }

    #[test]
    fn blank_medication_requests_more_info() {
        let gate = gate(GateRulesConfig::default());
        let decision = gate.classify(&prescription("   "));
        assert_eq!(decision.outcome, GateOutcome::RequestMoreInfo);
    }
}

use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::FraudConfig;
use crate::db::DbPool;
use crate::entities::intake::{self, Entity as Intake, IntakeCategory};

const RAPID_FILL_SCORE: u32 = 50;
const VELOCITY_SCORE: u32 = 45;
const DISPOSABLE_EMAIL_SCORE: u32 = 30;
const VELOCITY_WINDOW_HOURS: i64 = 24;
const VELOCITY_MAX_INTAKES: u64 = 3;

const DISPOSABLE_EMAIL_DOMAINS: &[&str] = &[
    "mailinator.com",
    "guerrillamail.com",
    "10minutemail.com",
    "tempmail.dev",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FraudFlagKind {
    RapidFormFill,
    SubmissionVelocity,
    DisposableEmail,
}

impl FraudFlagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FraudFlagKind::RapidFormFill => "rapid_form_fill",
            FraudFlagKind::SubmissionVelocity => "submission_velocity",
            FraudFlagKind::DisposableEmail => "disposable_email",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FraudFlag {
    pub kind: FraudFlagKind,
    pub score: u32,
    pub detail: String,
}

/// Scoring result. Informational only: flags feed manual review and never
/// change the payment outcome.
#[derive(Debug, Clone, Default)]
pub struct FraudAssessment {
    pub score: u32,
    pub flags: Vec<FraudFlag>,
}

impl FraudAssessment {
    pub fn flag_names(&self) -> Vec<String> {
        self.flags.iter().map(|f| f.kind.as_str().to_string()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ScoringInput<'a> {
    pub patient_id: Uuid,
    pub email: &'a str,
    pub category: IntakeCategory,
    pub subtype: &'a str,
    pub form_duration_secs: Option<u64>,
}

/// Behavioral risk scorer. Infallible by contract: any internal failure
/// degrades to an empty assessment rather than aborting the submission.
#[derive(Clone)]
pub struct FraudScorer {
    db: Arc<DbPool>,
    config: FraudConfig,
}

impl FraudScorer {
    pub fn new(db: Arc<DbPool>, config: FraudConfig) -> Self {
        Self { db, config }
    }

    #[instrument(skip(self, input), fields(patient_id = %input.patient_id))]
    pub async fn score(&self, input: ScoringInput<'_>) -> FraudAssessment {
        let mut assessment = FraudAssessment::default();

        if let Some(duration) = input.form_duration_secs {
            if duration < self.config.rapid_fill_secs {
                assessment.flags.push(FraudFlag {
                    kind: FraudFlagKind::RapidFormFill,
                    score: RAPID_FILL_SCORE,
                    detail: format!(
                        "form completed in {}s (threshold {}s)",
                        duration, self.config.rapid_fill_secs
                    ),
                });
            }
        }

        if let Some(domain) = input.email.rsplit('@').next() {
            if DISPOSABLE_EMAIL_DOMAINS.contains(&domain) {
                assessment.flags.push(FraudFlag {
                    kind: FraudFlagKind::DisposableEmail,
                    score: DISPOSABLE_EMAIL_SCORE,
                    detail: format!("disposable email domain: {}", domain),
                });
            }
        }

        match self.recent_intake_count(input.patient_id).await {
            Ok(count) if count >= VELOCITY_MAX_INTAKES => {
                assessment.flags.push(FraudFlag {
                    kind: FraudFlagKind::SubmissionVelocity,
                    score: VELOCITY_SCORE,
                    detail: format!(
                        "{} intakes in the last {}h",
                        count, VELOCITY_WINDOW_HOURS
                    ),
                });
            }
            Ok(_) => {}
            Err(e) => {
                // Scorer failures must degrade, never block.
                warn!(error = %e, "Fraud velocity lookup failed; skipping signal");
            }
        }

        assessment.score = assessment
            .flags
            .iter()
            .map(|f| f.score)
            .sum::<u32>()
            .min(100);
        assessment
    }

    /// Flags scoring at or above the configured threshold are worth
    /// persisting for manual review.
    pub fn should_persist(&self, flag: &FraudFlag) -> bool {
        flag.score >= self.config.persist_threshold
    }

    async fn recent_intake_count(&self, patient_id: Uuid) -> Result<u64, sea_orm::DbErr> {
        let window_start = Utc::now() - Duration::hours(VELOCITY_WINDOW_HOURS);
        Intake::find()
            .filter(intake::Column::PatientId.eq(patient_id))
            .filter(intake::Column::CreatedAt.gte(window_start))
            .count(&*self.db)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_names_match_persisted_kinds() {
        let assessment = FraudAssessment {
            score: 50,
            flags: vec![FraudFlag {
                kind: FraudFlagKind::RapidFormFill,
                score: RAPID_FILL_SCORE,
                detail: "form completed in 5s (threshold 20s)".to_string(),
            }],
        };
        assert_eq!(assessment.flag_names(), vec!["rapid_form_fill"]);
    }

    #[test]
    fn disposable_domains_are_exact_matches() {
        assert!(DISPOSABLE_EMAIL_DOMAINS.contains(&"mailinator.com"));
        assert!(!DISPOSABLE_EMAIL_DOMAINS.contains(&"gmail.com"));
    }
}

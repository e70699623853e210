use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::entities::intake::IntakeCategory;
use crate::errors::ServiceError;

/// Typed answer payload, one shape per category. The open `answers` map
/// from the submission contract is converted into this at the boundary so
/// every downstream step operates on a closed shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum AnswerPayload {
    Certificate(CertificateAnswers),
    Prescription(PrescriptionAnswers),
    Consult(ConsultAnswers),
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CertificateAnswers {
    /// Why the patient needs the certificate
    #[validate(length(min = 1, message = "A reason is required"))]
    pub reason: String,
    /// First day the certificate covers
    pub start_date: NaiveDate,
    /// Last day the certificate covers, inclusive
    pub end_date: NaiveDate,
    pub symptoms: Option<String>,
}

impl CertificateAnswers {
    /// Inclusive number of days the certificate covers.
    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PrescriptionAnswers {
    /// Catalog slug of the requested medication
    #[validate(length(min = 1, message = "A medication is required"))]
    pub medication: String,
    pub dosage: Option<String>,
    /// Whether the patient has been prescribed this medication before
    pub previously_prescribed: bool,
    pub allergies: Option<String>,
    pub pregnant_or_breastfeeding: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConsultAnswers {
    #[validate(length(min = 1, message = "A reason is required"))]
    pub reason: String,
    pub preferred_contact_time: Option<String>,
}

impl AnswerPayload {
    /// Parses the open answers map from a submission into the typed shape
    /// for `category`, then runs structural validation. Never touches
    /// storage.
    pub fn from_submission(
        category: IntakeCategory,
        answers: &Value,
    ) -> Result<Self, ServiceError> {
        let payload = match category {
            IntakeCategory::Certificate => {
                AnswerPayload::Certificate(parse_answers(answers, "certificate")?)
            }
            IntakeCategory::Prescription => {
                AnswerPayload::Prescription(parse_answers(answers, "prescription")?)
            }
            IntakeCategory::Consult => {
                AnswerPayload::Consult(parse_answers(answers, "consult")?)
            }
        };
        payload.validate_structure()?;
        Ok(payload)
    }

    pub fn category(&self) -> IntakeCategory {
        match self {
            AnswerPayload::Certificate(_) => IntakeCategory::Certificate,
            AnswerPayload::Prescription(_) => IntakeCategory::Prescription,
            AnswerPayload::Consult(_) => IntakeCategory::Consult,
        }
    }

    /// Category-specific structural validation: required fields present and
    /// internally consistent. Failure here never touches storage.
    pub fn validate_structure(&self) -> Result<(), ServiceError> {
        match self {
            AnswerPayload::Certificate(answers) => {
                answers.validate()?;
                if answers.end_date < answers.start_date {
                    return Err(ServiceError::ValidationError(
                        "Certificate end date cannot be before its start date".to_string(),
                    ));
                }
                Ok(())
            }
            AnswerPayload::Prescription(answers) => {
                answers.validate()?;
                Ok(())
            }
            AnswerPayload::Consult(answers) => {
                answers.validate()?;
                Ok(())
            }
        }
    }
}

fn parse_answers<T: serde::de::DeserializeOwned>(
    answers: &Value,
    category: &str,
) -> Result<T, ServiceError> {
    serde_json::from_value(answers.clone()).map_err(|e| {
        ServiceError::ValidationError(format!("Invalid {} answers: {}", category, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn certificate_answers_parse_and_validate() {
        let payload = AnswerPayload::from_submission(
            IntakeCategory::Certificate,
            &json!({
                "reason": "influenza",
                "start_date": "2025-03-03",
                "end_date": "2025-03-04"
            }),
        )
        .expect("valid certificate answers");

        match payload {
            AnswerPayload::Certificate(answers) => assert_eq!(answers.duration_days(), 2),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn certificate_dates_must_be_ordered() {
        let result = AnswerPayload::from_submission(
            IntakeCategory::Certificate,
            &json!({
                "reason": "migraine",
                "start_date": "2025-03-05",
                "end_date": "2025-03-04"
            }),
        );
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }

    #[test]
    fn missing_required_field_is_a_validation_error() {
        let result = AnswerPayload::from_submission(
            IntakeCategory::Prescription,
            &json!({ "dosage": "20mg" }),
        );
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }

    #[test]
    fn category_mismatch_is_rejected() {
        // Certificate answers submitted under the prescription category
        // must not parse into a prescription shape.
        let result = AnswerPayload::from_submission(
            IntakeCategory::Prescription,
            &json!({
                "reason": "influenza",
                "start_date": "2025-03-03",
                "end_date": "2025-03-04"
            }),
        );
        assert!(result.is_err());
    }
}

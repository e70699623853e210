use tracing::instrument;

use crate::config::PricingConfig;
use crate::errors::ServiceError;
use crate::models::answers::AnswerPayload;

/// Maps an intake onto the gateway price reference configured for its
/// pricing tier. The table is injected at startup; resolution never reads
/// the environment.
#[derive(Clone)]
pub struct PriceResolver {
    pricing: PricingConfig,
}

impl PriceResolver {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    /// Resolves the gateway price reference for an intake. Certificates are
    /// tiered by covered duration; other categories use a flat tier.
    #[instrument(skip(self, answers))]
    pub fn resolve(&self, answers: &AnswerPayload) -> Result<String, ServiceError> {
        let tier_key = tier_key(answers);
        self.pricing
            .price_ref(&tier_key)
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::PriceConfig(format!(
                    "no gateway price ref configured for tier {}",
                    tier_key
                ))
            })
    }
}

fn tier_key(answers: &AnswerPayload) -> String {
    match answers {
        AnswerPayload::Certificate(answers) => {
            if answers.duration_days() <= 1 {
                "certificate:single_day".to_string()
            } else {
                "certificate:multi_day".to_string()
            }
        }
        AnswerPayload::Prescription(_) => "prescription:standard".to_string(),
        AnswerPayload::Consult(_) => "consult:standard".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answers::CertificateAnswers;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn certificate(days: i64) -> AnswerPayload {
        let start = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        AnswerPayload::Certificate(CertificateAnswers {
            reason: "influenza".to_string(),
            start_date: start,
            end_date: start + chrono::Duration::days(days - 1),
            symptoms: None,
        })
    }

    fn resolver() -> PriceResolver {
        let mut refs = HashMap::new();
        refs.insert(
            "certificate:single_day".to_string(),
            "price_cert_1d".to_string(),
        );
        refs.insert(
            "certificate:multi_day".to_string(),
            "price_cert_2d".to_string(),
        );
        PriceResolver::new(PricingConfig { refs })
    }

    #[test]
    fn certificate_tier_depends_on_duration() {
        let resolver = resolver();
        assert_eq!(resolver.resolve(&certificate(1)).unwrap(), "price_cert_1d");
        assert_eq!(resolver.resolve(&certificate(2)).unwrap(), "price_cert_2d");
    }

    #[test]
    fn missing_mapping_is_a_price_config_error() {
        let resolver = PriceResolver::new(PricingConfig::default());
        let err = resolver.resolve(&certificate(1)).unwrap_err();
        assert!(matches!(err, ServiceError::PriceConfig(_)));
    }
}

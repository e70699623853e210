use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, SqlErr};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::patient::{self, Entity as Patient};
use crate::errors::ServiceError;

/// Resolves the identity an intake belongs to. Authentication itself lives
/// upstream; this only maps an already-authenticated patient id, or a guest
/// email, onto a patient row.
#[derive(Clone)]
pub struct PatientDirectory {
    db: Arc<DbPool>,
}

impl PatientDirectory {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Resolves the submitting identity. Authenticated callers must map to
    /// an existing row; unauthenticated callers get a guest row keyed by
    /// normalized email. A non-guest account under that email blocks guest
    /// creation so two identities can never share an inbox.
    #[instrument(skip(self, email))]
    pub async fn resolve_for_submission(
        &self,
        authenticated_id: Option<Uuid>,
        email: Option<&str>,
    ) -> Result<patient::Model, ServiceError> {
        if let Some(patient_id) = authenticated_id {
            return Patient::find_by_id(patient_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::AuthError("Unknown patient identity".to_string())
                });
        }

        let email = email.ok_or_else(|| {
            ServiceError::ValidationError(
                "An email address is required to submit as a guest".to_string(),
            )
        })?;
        let normalized = normalize_email(email);
        if normalized.is_empty() || !normalized.contains('@') {
            return Err(ServiceError::ValidationError(
                "A valid email address is required".to_string(),
            ));
        }

        if let Some(existing) = self.find_by_email(&normalized).await? {
            if !existing.is_guest {
                return Err(ServiceError::AuthError(
                    "An account already exists for this email. Please sign in to continue."
                        .to_string(),
                ));
            }
            return Ok(existing);
        }

        let now = Utc::now();
        let guest = patient::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(normalized.clone()),
            is_guest: Set(true),
            gateway_customer_ref: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        match guest.insert(&*self.db).await {
            Ok(model) => {
                info!(patient_id = %model.id, "Created guest patient");
                Ok(model)
            }
            // A concurrent submission may have created the guest first;
            // resolve to that row instead of surfacing the conflict.
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => self
                .find_by_email(&normalized)
                .await?
                .ok_or(ServiceError::DatabaseError(e)),
            Err(e) => Err(ServiceError::DatabaseError(e)),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<patient::Model>, ServiceError> {
        Ok(Patient::find()
            .filter(patient::Column::Email.eq(email))
            .one(&*self.db)
            .await?)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_normalization_trims_and_lowercases() {
        assert_eq!(normalize_email("  Jo.Citizen@Example.COM "), "jo.citizen@example.com");
    }
}

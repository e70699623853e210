use std::sync::Arc;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tracing::{info, instrument};

use crate::db::DbPool;
use crate::entities::intake::IntakeCategory;
use crate::entities::service_offering::{self, Entity as ServiceOffering};
use crate::errors::ServiceError;

/// Read-only resolution of a human-facing service identifier to its
/// internal catalog record.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Resolves `category` + `subtype` (or an explicit slug override) to an
    /// active catalog entry. An inactive or unknown service is fatal to the
    /// submission; there is nothing to retry.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        category: IntakeCategory,
        subtype: &str,
        slug_override: Option<&str>,
    ) -> Result<service_offering::Model, ServiceError> {
        let slug = match slug_override {
            Some(slug) => slug.to_string(),
            None => format!("{}_{}", category.as_str(), subtype),
        };

        let service = ServiceOffering::find()
            .filter(service_offering::Column::Slug.eq(slug.clone()))
            .one(&*self.db)
            .await?;

        match service {
            Some(service) if service.is_active => {
                info!(slug = %slug, service_id = %service.id, "Resolved catalog service");
                Ok(service)
            }
            Some(_) => Err(ServiceError::ServiceUnavailable(format!(
                "The {} service is not currently available",
                slug
            ))),
            None => Err(ServiceError::ServiceUnavailable(format!(
                "Unknown service: {}",
                slug
            ))),
        }
    }
}

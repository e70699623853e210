use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::repositories::intake_repository::IntakeRepository;
use crate::services::checkout::CheckoutService;
use crate::services::refunds::RefundService;

pub mod health;
pub mod intakes;

/// Services shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub refunds: Arc<RefundService>,
    pub intakes: Arc<IntakeRepository>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            config,
            gateway.clone(),
            event_sender.clone(),
        ));
        let intakes = checkout.repository();
        let refunds = Arc::new(RefundService::new(
            db,
            intakes.clone(),
            gateway,
            event_sender,
        ));
        Self {
            checkout,
            refunds,
            intakes,
        }
    }
}

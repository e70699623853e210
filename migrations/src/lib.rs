pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_patients_table;
mod m20250301_000002_create_services_table;
mod m20250301_000003_create_intakes_table;
mod m20250301_000004_create_intake_answers_table;
mod m20250301_000005_create_payments_table;
mod m20250301_000006_create_fraud_flags_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_patients_table::Migration),
            Box::new(m20250301_000002_create_services_table::Migration),
            Box::new(m20250301_000003_create_intakes_table::Migration),
            Box::new(m20250301_000004_create_intake_answers_table::Migration),
            Box::new(m20250301_000005_create_payments_table::Migration),
            Box::new(m20250301_000006_create_fraud_flags_table::Migration),
        ]
    }
}

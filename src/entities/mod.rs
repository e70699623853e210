pub mod fraud_flag;
pub mod intake;
pub mod intake_answer;
pub mod patient;
pub mod payment;
pub mod service_offering;

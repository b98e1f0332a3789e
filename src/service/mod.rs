pub mod amendment_service;
pub mod audit_service;
pub mod background_jobs;
pub mod change_request_service;
pub mod commission_service;
pub mod contract_service;
pub mod dispute_service;
pub mod error;
pub mod escalation_service;
pub mod event_bus;
pub mod extension_service;
pub mod notification_service;
pub mod payment_provider;
pub mod price_modification_service;
pub mod task_claim_service;

#[cfg(test)]
pub(crate) mod testing;

pub mod amendment;
pub mod contract;
pub mod dispute;
pub mod events;
pub mod payment_webhook;

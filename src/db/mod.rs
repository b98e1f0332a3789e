pub mod amendmentdb;
pub mod cache;
pub mod contractdb;
pub mod db;
pub mod disputedb;
pub mod quotadb;
pub mod supportdb;

pub mod amendmentmodel;
pub mod contractmodel;
pub mod disputemodel;
pub mod ledgermodel;
pub mod supportmodel;
pub mod usermodel;

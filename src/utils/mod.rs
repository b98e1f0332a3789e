pub mod decimal;
pub mod pairing_code;
pub mod token;

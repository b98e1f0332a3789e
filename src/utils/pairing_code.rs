// utils/pairing_code.rs
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// How long a freshly issued pairing code stays valid.
pub const PAIRING_CODE_TTL_MINUTES: i64 = 15;

pub fn generate_pairing_code() -> String {
    let mut rng = rand::rng();
    format!("{:06}", rng.random_range(100000..999999))
}

pub fn pairing_code_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(PAIRING_CODE_TTL_MINUTES)
}

/// Unique reference handed to the payment collaborator.
pub fn generate_payment_reference() -> String {
    use rand::distr::Alphanumeric;

    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("PMOD_{}_{}", Utc::now().timestamp(), suffix.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_codes_have_six_digits() {
        for _ in 0..50 {
            let code = generate_pairing_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn payment_references_are_distinct() {
        let a = generate_payment_reference();
        let b = generate_payment_reference();
        assert!(a.starts_with("PMOD_"));
        assert_ne!(a, b);
    }
}

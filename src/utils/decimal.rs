use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;

/// Amounts arrive as JSON numbers; they are converted once at the edge and
/// rounded to cents so no float ever reaches a computation.
pub fn money_from_f64(value: f64) -> Result<BigDecimal, String> {
    if !value.is_finite() {
        return Err("amount must be a finite number".to_string());
    }
    BigDecimal::try_from(value)
        .map(|amount| amount.round(2))
        .map_err(|e| format!("invalid amount: {}", e))
}

/// Minor currency units (centavos) as payment gateways expect them.
pub fn to_minor_units(amount: &BigDecimal) -> Option<i64> {
    (amount * BigDecimal::from(100)).round(0).to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_json_amounts_to_cents() {
        assert_eq!(money_from_f64(12000.0).unwrap(), BigDecimal::from(12_000));
        assert_eq!(money_from_f64(99.999).unwrap(), BigDecimal::from(100));
        assert!(money_from_f64(f64::NAN).is_err());
    }

    #[test]
    fn minor_units() {
        assert_eq!(to_minor_units(&BigDecimal::from(2_000)), Some(200_000));
    }
}

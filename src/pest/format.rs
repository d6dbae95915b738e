//! Number formatting in the style the estimation engine's own tools write.

/// Format `value` in scientific notation with `precision` decimals and a signed, two-digit exponent
/// (e.g. `1.2340e+00`).
pub fn scientific(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }

    let formatted = format!("{value:.precision$e}");
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return formatted;
    };
    let exponent: i32 = exponent.parse().unwrap_or_default();
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.abs())
}

/// [`scientific`], right-aligned in a field of `width` characters
pub fn scientific_padded(value: f64, width: usize, precision: usize) -> String {
    format!("{:>width$}", scientific(value, precision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1.0, "1.0000e+00")]
    #[case(1.234, "1.2340e+00")]
    #[case(0.0, "0.0000e+00")]
    #[case(-2.5e-3, "-2.5000e-03")]
    #[case(123_456.0, "1.2346e+05")]
    #[case(1e100, "1.0000e+100")]
    fn test_scientific(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(scientific(value, 4), expected);
    }

    #[test]
    fn test_scientific_padded() {
        assert_eq!(scientific_padded(4.5, 12, 4), "  4.5000e+00");
        assert_eq!(scientific_padded(-4.5, 10, 4), "-4.5000e+00");
    }
}

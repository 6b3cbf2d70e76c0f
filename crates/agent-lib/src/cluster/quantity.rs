//! Kubernetes resource quantity parsing
//!
//! Handles the decimal (`m`, `k`, `M`, ...), binary (`Ki`, `Mi`, ...) and
//! exponent (`1e3`) suffixes. Fractions round up, as the API server does.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Value of a quantity in thousandths, e.g. `"100m"` -> 100, `"2"` -> 2000
pub fn milli_value(quantity: &Quantity) -> Option<u64> {
    scaled(&quantity.0, 1000)
}

/// Integral value of a quantity, e.g. `"128Mi"` -> 134217728
pub fn value(quantity: &Quantity) -> Option<u64> {
    scaled(&quantity.0, 1)
}

/// Render milli-cpu the way the API server canonicalises it
pub fn cpu_quantity(milli: u64) -> Quantity {
    if milli % 1000 == 0 {
        Quantity((milli / 1000).to_string())
    } else {
        Quantity(format!("{}m", milli))
    }
}

/// Plain byte count
pub fn bytes_quantity(bytes: u64) -> Quantity {
    Quantity(bytes.to_string())
}

fn split_suffix(raw: &str) -> (&str, &str) {
    let idx = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(raw.len());
    raw.split_at(idx)
}

/// Multiplier of a suffix as numerator/denominator
fn suffix_ratio(suffix: &str) -> Option<(u128, u128)> {
    let ratio = match suffix {
        "" => (1, 1),
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1000),
        "k" => (1000, 1),
        "M" => (1000u128.pow(2), 1),
        "G" => (1000u128.pow(3), 1),
        "T" => (1000u128.pow(4), 1),
        "P" => (1000u128.pow(5), 1),
        "E" => (1000u128.pow(6), 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        exp if exp.starts_with('e') || exp.starts_with('E') => {
            let power: i32 = exp[1..].parse().ok()?;
            let factor = 10u128.checked_pow(power.unsigned_abs())?;
            if power >= 0 {
                (factor, 1)
            } else {
                (1, factor)
            }
        }
        _ => return None,
    };
    Some(ratio)
}

fn scaled(raw: &str, scale: u128) -> Option<u64> {
    let raw = raw.trim();
    let (number, suffix) = split_suffix(raw);
    if number.starts_with('-') {
        return Some(0);
    }
    let number = number.trim_start_matches('+');

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let digits = format!("{}{}", whole, fraction);
    let mantissa: u128 = if digits.is_empty() { 0 } else { digits.parse().ok()? };
    let fraction_scale = 10u128.checked_pow(fraction.len() as u32)?;

    let (num, den) = suffix_ratio(suffix)?;
    let numerator = mantissa.checked_mul(num)?.checked_mul(scale)?;
    let denominator = den.checked_mul(fraction_scale)?;
    let result = (numerator + denominator - 1) / denominator;
    u64::try_from(result).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn test_cpu_milli_values() {
        assert_eq!(milli_value(&q("100m")), Some(100));
        assert_eq!(milli_value(&q("2")), Some(2000));
        assert_eq!(milli_value(&q("0.5")), Some(500));
        assert_eq!(milli_value(&q("250000n")), Some(1));
        assert_eq!(milli_value(&q("1500000u")), Some(1500));
    }

    #[test]
    fn test_memory_values() {
        assert_eq!(value(&q("128Mi")), Some(128 * 1024 * 1024));
        assert_eq!(value(&q("1Gi")), Some(1 << 30));
        assert_eq!(value(&q("1k")), Some(1000));
        assert_eq!(value(&q("1e3")), Some(1000));
        assert_eq!(value(&q("268435456")), Some(268_435_456));
    }

    #[test]
    fn test_fractions_round_up() {
        assert_eq!(value(&q("100m")), Some(1));
        assert_eq!(value(&q("1.5")), Some(2));
    }

    #[test]
    fn test_invalid_quantities() {
        assert_eq!(value(&q("abc")), None);
        assert_eq!(value(&q("12Qi")), None);
        assert_eq!(value(&q("")), None);
    }

    #[test]
    fn test_negative_clamps_to_zero() {
        assert_eq!(value(&q("-5")), Some(0));
    }

    #[test]
    fn test_render_cpu() {
        assert_eq!(cpu_quantity(100).0, "100m");
        assert_eq!(cpu_quantity(2000).0, "2");
        assert_eq!(bytes_quantity(1024).0, "1024");
    }
}

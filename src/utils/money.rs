/// Formats an amount the way an en-US locale renders currency, e.g. `$1,234.56` or `-€12.00`.
/// Returns `None` for NaN and infinities.
pub fn format_currency(amount: f64, currency: &str) -> Option<String> {
    if !amount.is_finite() {
        return None;
    }
    let code = currency.trim().to_ascii_uppercase();
    let digits = minor_digits(&code);
    let rendered = format!("{:.*}", digits, amount.abs());
    let (whole, fraction) = match rendered.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (rendered.as_str(), None),
    };

    let mut number = group_thousands(whole);
    if let Some(fraction) = fraction {
        number.push('.');
        number.push_str(fraction);
    }

    let is_zero = rendered.chars().all(|ch| ch == '0' || ch == '.');
    let sign = if amount < 0.0 && !is_zero { "-" } else { "" };

    Some(match symbol(&code) {
        Some(symbol) => format!("{sign}{symbol}{number}"),
        None => format!("{sign}{code} {number}"),
    })
}

fn minor_digits(code: &str) -> usize {
    match code {
        "JPY" | "KRW" => 0,
        _ => 2,
    }
}

fn symbol(code: &str) -> Option<&'static str> {
    let symbol = match code {
        "USD" => "$",
        "EUR" => "€",
        "GBP" => "£",
        "JPY" => "¥",
        "KRW" => "₩",
        "CAD" => "CA$",
        "AUD" => "A$",
        "MXN" => "MX$",
        "INR" => "₹",
        _ => return None,
    };
    Some(symbol)
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_common_currencies() {
        assert_eq!(format_currency(1234.5, "USD").as_deref(), Some("$1,234.50"));
        assert_eq!(format_currency(1_000_000.0, "eur").as_deref(), Some("€1,000,000.00"));
        assert_eq!(format_currency(0.5, "GBP").as_deref(), Some("£0.50"));
        assert_eq!(format_currency(950.0, "CAD").as_deref(), Some("CA$950.00"));
    }

    #[test]
    fn zero_decimal_currencies_round_to_whole_units() {
        assert_eq!(format_currency(123456.7, "JPY").as_deref(), Some("¥123,457"));
        assert_eq!(format_currency(5000.0, "KRW").as_deref(), Some("₩5,000"));
    }

    #[test]
    fn negatives_carry_a_leading_minus() {
        assert_eq!(format_currency(-42.1, "USD").as_deref(), Some("-$42.10"));
        assert_eq!(format_currency(-0.001, "USD").as_deref(), Some("$0.00"));
    }

    #[test]
    fn unknown_codes_are_prefixed() {
        assert_eq!(format_currency(1234.56, "chf").as_deref(), Some("CHF 1,234.56"));
    }

    #[test]
    fn non_finite_amounts_are_rejected() {
        assert_eq!(format_currency(f64::INFINITY, "USD"), None);
        assert_eq!(format_currency(f64::NEG_INFINITY, "EUR"), None);
        assert_eq!(format_currency(f64::NAN, "KRW"), None);
    }
}

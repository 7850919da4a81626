use rust_decimal::Decimal;

use crate::constants::chain::NANO_PER_UNIT;

/// Render nano as a fixed 9-digit native amount for logs and reports
pub fn format_nano(nano: u64) -> String {
    let value = Decimal::from(nano) / Decimal::from(NANO_PER_UNIT);
    format!("{:.9}", value)
}

/// Shorten an address or token for display: first 6 and last 4 chars
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 12 {
        return value.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

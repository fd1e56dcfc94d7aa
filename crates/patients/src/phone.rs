//! Phone number helpers used for intake and duplicate matching.

/// Normalize a phone number for storage.
///
/// Numbers already carrying an international prefix (`+`) are kept as typed
/// (trimmed). Otherwise leading trunk zeros are stripped and
/// `default_country_code` (e.g. `+91`) is prepended.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('+') {
        return trimmed.to_string();
    }
    format!("{default_country_code}{}", trimmed.trim_start_matches('0'))
}

/// The last ten digits of a phone number, ignoring separators and prefixes.
///
/// Two numbers that agree here are treated as the same subscriber.
pub fn last_ten_digits(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    let start = digits.len().saturating_sub(10);
    digits[start..].iter().collect()
}

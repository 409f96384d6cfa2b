use std::time::Duration;

/// Parses a compact duration string such as `90s`, `2m`, `1h30m` or `1d`.
///
/// Each component is a run of digits followed by one of `s`, `m`, `h` or `d`.
/// Returns `None` for empty input, a trailing number without unit, an unknown
/// unit or on overflow.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut number: Option<u64> = None;

    for c in input.chars() {
        if let Some(digit) = c.to_digit(10) {
            let current = number.unwrap_or(0);
            number = Some(current.checked_mul(10)?.checked_add(u64::from(digit))?);
            continue;
        }

        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            _ => return None,
        };
        total_secs = total_secs.checked_add(number.take()?.checked_mul(unit)?)?;
    }

    if number.is_some() {
        return None;
    }

    Some(Duration::from_secs(total_secs))
}

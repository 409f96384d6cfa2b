/// Formats a number of bytes into a human-readable string using binary units.
///
/// # Example
///
/// ```
/// use armi_utils::bytes::format_bytes;
///
/// assert_eq!(format_bytes(1024 * 1024, 2), "1.00 MiB");
/// assert_eq!(format_bytes(0, 1), "0.0 B");
/// ```
pub fn format_bytes(bytes: u64, precision: usize) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }

    format!("{value:.precision$} {}", UNITS[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512, 0), "512 B");
        assert_eq!(format_bytes(1536, 1), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024, 2), "3.00 GiB");
    }
}

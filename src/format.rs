// Pure formatting helpers shared by the catalog and session layers.
//
// All of these are total functions: missing or zero input produces a defined
// fallback string, never an error.

/// Format a value with up to two decimal places, trailing zeros trimmed
/// ("1.50" -> "1.5", "50.00" -> "50").
pub fn trim_decimal(value: f64) -> String {
    let text = format!("{:.2}", value);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

/// Seconds -> "H:MM:SS"; hours are omitted and minutes unpadded when the
/// hour part is zero. Absent or zero duration renders as "N/A".
pub fn format_duration(seconds: Option<u64>) -> String {
    let secs = match seconds {
        Some(s) if s > 0 => s,
        _ => return "N/A".to_string(),
    };

    let h = secs / 3600;
    let m = secs % 3600 / 60;
    let s = secs % 60;

    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Bytes -> human-readable size with binary (1024) scaling.
/// Absent or zero renders as "0 Bytes".
pub fn format_bytes(bytes: Option<u64>) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    let bytes = match bytes {
        Some(b) if b > 0 => b,
        _ => return "0 Bytes".to_string(),
    };

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{} {}", trim_decimal(value), UNITS[unit])
}

/// Insert thousands separators ("1234567" -> "1,234,567").
pub fn format_grouped(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Rewrite the service's binary-unit rate abbreviations into the labels the
/// UI shows ("KiB/s" -> "KB/s"). The numeric part is untouched.
pub fn normalize_rate(rate: &str) -> String {
    if rate.is_empty() {
        return "0 KB/s".to_string();
    }
    rate.replace("KiB/s", "KB/s").replace("MiB/s", "MB/s")
}

/// Parse a service-formatted percent string ("42.3%") into a number clamped
/// to 0..=100. Unparseable input counts as zero progress.
pub fn parse_percent(text: &str) -> f32 {
    text.trim()
        .trim_end_matches('%')
        .parse::<f32>()
        .map(|p| p.clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

/// Remove the characters that are invalid in filenames on the platforms the
/// service supports: \ / * ? : " < > |
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect()
}

use std::time::Duration;
use unicode_width::UnicodeWidthChar;

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let base = 1024.0;
    let exponent = (bytes as f64).log(base).floor() as u32;
    let unit = UNITS[exponent.min(5) as usize];
    let value = bytes as f64 / base.powi(exponent.min(5) as i32);
    format!("{:.2} {}", value, unit)
}

/// 响应时间显示为毫秒，超过一秒显示为秒
pub fn format_latency(duration: Duration) -> String {
    let ms = duration.as_secs_f64() * 1000.0;
    if ms >= 1000.0 {
        format!("{:.2} s", ms / 1000.0)
    } else {
        format!("{:.1} ms", ms)
    }
}

/// 按显示宽度截断，超出时以 "..." 结尾
pub fn truncate_string(s: &str, max_width: usize) -> String {
    let total: usize = s.chars().map(|c| UnicodeWidthChar::width(c).unwrap_or(0)).sum();
    if total <= max_width {
        return s.to_string();
    }

    let budget = max_width.saturating_sub(3);
    let mut width = 0;
    let mut result = String::new();
    for c in s.chars() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + w > budget {
            break;
        }
        width += w;
        result.push(c);
    }
    if max_width >= 3 {
        result.push_str("...");
    }
    result
}

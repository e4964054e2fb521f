//! Display helpers for token rows.

/// 1234 → "1.23K", 5_600_000 → "5.60M".
pub fn compact_number(value: f64) -> String {
    if value >= 1e9 {
        format!("{:.2}B", value / 1e9)
    } else if value >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else if value >= 1e3 {
        format!("{:.2}K", value / 1e3)
    } else {
        format!("{value:.2}")
    }
}

/// Dollar amount. Sub-cent prices keep six decimals so they don't read as $0.00.
pub fn currency(value: f64, decimals: usize) -> String {
    if value > 0.0 && value < 0.01 {
        return format!("${value:.6}");
    }
    format!("${}", with_thousands(value, decimals))
}

/// Signed percentage: "+12.50%", "-3.10%".
pub fn percentage(value: f64, decimals: usize) -> String {
    let sign = if value >= 0.0 { "+" } else { "" };
    format!("{sign}{value:.decimals$}%")
}

/// Dollar amount abbreviated for narrow columns.
pub fn large_number(value: f64) -> String {
    if value >= 1e9 {
        format!("${:.2}B", value / 1e9)
    } else if value >= 1e6 {
        format!("${:.2}M", value / 1e6)
    } else if value >= 1e3 {
        format!("${:.1}K", value / 1e3)
    } else {
        format!("${value:.0}")
    }
}

/// Age relative to `now_ms`: "3d ago", "5h ago", "12m ago", "Just now".
pub fn time_ago(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = (now_ms - timestamp_ms).max(0);
    let minutes = diff / 60_000;
    let hours = diff / 3_600_000;
    let days = diff / 86_400_000;

    if days > 0 {
        format!("{days}d ago")
    } else if hours > 0 {
        format!("{hours}h ago")
    } else if minutes > 0 {
        format!("{minutes}m ago")
    } else {
        "Just now".to_string()
    }
}

/// Latency in microseconds, or "-" before the first sample.
pub fn micros(value: Option<u64>) -> String {
    match value {
        Some(us) if us >= 1_000 => format!("{:.1}ms", us as f64 / 1_000.0),
        Some(us) => format!("{us}µs"),
        None => "-".to_string(),
    }
}

/// "0x1234567890abcdef" → "0x1234...abcdef" (six chars each side).
pub fn truncate_address(address: &str) -> String {
    truncate_address_to(address, 6)
}

pub fn truncate_address_to(address: &str, chars: usize) -> String {
    let count = address.chars().count();
    if count <= chars * 2 {
        return address.to_string();
    }
    let head: String = address.chars().take(chars).collect();
    let tail: String = address.chars().skip(count - chars).collect();
    format!("{head}...{tail}")
}

/// Truncate to `max` chars with a trailing ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

fn with_thousands(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.decimals$}", value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 && formatted.chars().any(|c| c != '0' && c != '.') {
        "-"
    } else {
        ""
    };
    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

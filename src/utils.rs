use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

const MAX_FILE_NAME_CHARS: usize = 100;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("static regex"))
}

/// Replaces characters unsafe for storage with `_` and caps the length.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = unsafe_chars().replace_all(name.trim(), "_");
    cleaned.chars().take(MAX_FILE_NAME_CHARS).collect()
}

/// `{prefix}_{YYYYmmdd_HHMMSS}_{run_id}.{ext}`
pub fn output_file_name(prefix: Option<&str>, at: DateTime<Utc>, run_id: &str, ext: &str) -> String {
    let prefix = prefix
        .map(sanitize_filename)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "dialogue".to_string());
    format!("{}_{}_{}.{}", prefix, at.format("%Y%m%d_%H%M%S"), run_id, ext)
}

pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", size, UNITS[unit])
}

pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    if total < 60 {
        format!("{}s", total)
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

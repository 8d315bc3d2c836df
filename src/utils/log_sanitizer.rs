// ============================================================================
// Log Sanitization - query text from the dashboard before it reaches the logs
// ============================================================================
//
// Report filters (customer, description, category...) are free text typed by
// users. They are echoed into structured logs, so control characters and ANSI
// sequences are stripped and long values truncated.
//
// ============================================================================

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length for logged user input
const MAX_LOG_LENGTH: usize = 120;

static ANSI_ESCAPE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap()
});

/// Sanitize user input for safe logging
///
/// ```
/// use sales_dashboard::utils::log_sanitizer::sanitize_for_log;
///
/// assert_eq!(sanitize_for_log("acme\nINFO: fake"), "acme INFO: fake");
/// assert_eq!(sanitize_for_log("x\x1b[31mred\x1b[0m"), "xred");
/// ```
pub fn sanitize_for_log(input: &str) -> String {
    let no_ansi = ANSI_ESCAPE_REGEX.replace_all(input, "");

    let cleaned: String = no_ansi
        .chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .filter(|c| !c.is_control())
        .collect();

    if cleaned.chars().count() > MAX_LOG_LENGTH {
        let truncated: String = cleaned.chars().take(MAX_LOG_LENGTH).collect();
        format!("{}...", truncated)
    } else {
        cleaned
    }
}

/// Sanitize an optional filter value; absent filters log as `-`
pub fn sanitize_option_for_log(input: &Option<String>) -> String {
    match input {
        Some(value) => sanitize_for_log(value),
        None => "-".to_string(),
    }
}

//! String normalization shared by the classifier, the intercompany matcher
//! and the contains-filters.

/// Uppercase and drop everything that is not an ASCII letter or digit.
///
/// `"Acme Corp. (India)"` becomes `"ACMECORPINDIA"`.
pub fn normalize_alnum(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Uppercase and trim, used for SKUs and currency codes.
pub fn normalize_code(input: &str) -> String {
    input.trim().to_uppercase()
}

/// Lowercase with whitespace, underscores and hyphens removed.
pub fn squash_field_name(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Case-insensitive substring test. An empty needle matches everything.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Returns `None` for empty or whitespace-only strings.
pub fn non_empty(input: Option<&str>) -> Option<String> {
    input
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

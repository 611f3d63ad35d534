/// Checks if a host matches a pattern
///
/// Two forms are supported:
/// 1. Exact: "media.booru.example" matches only itself
/// 2. Wildcard: "*.booru.example" matches "booru.example" and any host below it
///
/// Both sides are expected to be lowercase already.
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::matches_wildcard;
///
/// assert!(matches_wildcard("media.booru.example", "media.booru.example"));
/// assert!(matches_wildcard("*.booru.example", "booru.example"));
/// assert!(matches_wildcard("*.booru.example", "img3.booru.example"));
/// assert!(!matches_wildcard("*.booru.example", "notbooru.example"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || candidate
                    .strip_suffix(base)
                    .is_some_and(|head| head.ends_with('.'))
        }
        None => candidate == pattern,
    }
}

/// Returns true if the host matches any of the patterns
pub fn matches_any<S: AsRef<str>>(patterns: &[S], candidate: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| matches_wildcard(pattern.as_ref(), candidate))
}

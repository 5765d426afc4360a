//! Connection URL helpers.
//!
//! Legacy applications usually store JDBC URLs (`jdbc:postgresql://...`,
//! `jdbc:mysql://...`, `jdbc:sqlserver://...`). The native drivers expect
//! their own URL forms, so these helpers translate between the two.

/// Whether the URL carries a `jdbc:` prefix.
pub fn is_jdbc(url: &str) -> bool {
    url.trim()
        .get(..5)
        .is_some_and(|p| p.eq_ignore_ascii_case("jdbc:"))
}

/// Strip a leading `jdbc:` prefix.
pub fn strip_jdbc_prefix(url: &str) -> &str {
    let url = url.trim();
    if is_jdbc(url) {
        &url[5..]
    } else {
        url
    }
}

/// Rewrite the URL scheme to `target` when it is `target` or one of `aliases`.
///
/// Returns `None` when the URL has no scheme or an unknown one.
pub fn normalize_scheme(url: &str, target: &str, aliases: &[&str]) -> Option<String> {
    let url = strip_jdbc_prefix(url);
    let (scheme, rest) = url.split_once("://")?;
    let scheme = scheme.to_ascii_lowercase();
    if scheme == target || aliases.contains(&scheme.as_str()) {
        Some(format!("{}://{}", target, rest))
    } else {
        None
    }
}

/// Keep only the query parameters whose key is in `keep`.
///
/// JDBC URLs tend to carry driver-specific flags (`useSSL`,
/// `serverTimezone`, ...) that native drivers reject.
pub fn retain_query_params(url: &str, keep: &[&str]) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or("");
            keep.iter().any(|k| k.eq_ignore_ascii_case(key))
        })
        .collect();
    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}

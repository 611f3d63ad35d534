use crate::url::matcher::matches_any;
use crate::UrlError;
use url::Url;

/// Resolves an href found in a page against the page's base URL
///
/// Handles protocol-relative ("//host/path"), root-relative ("/path") and
/// plain relative links. Returns None for links that can never be assets:
/// - javascript:, mailto:, tel:, data: schemes
/// - fragment-only links
/// - anything that is not HTTP(S) after resolution
pub fn resolve_href(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

/// Computes the canonical form of an asset URL
///
/// # Normalization Steps
///
/// 1. Require an HTTP(S) scheme and a host
/// 2. Lowercase the host (the url crate already does this for http/https)
/// 3. Collapse any host matching `aliases` onto `canonical_host`, dropping the port
/// 4. Keep a non-default port for every other host
/// 5. Keep the path and the query string as-is
/// 6. Drop the fragment
///
/// Two URLs with equal canonical forms refer to the same asset.
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::canonical_form;
/// use url::Url;
///
/// let aliases = vec!["*.booru.example".to_string()];
/// let a = Url::parse("https://img3.booru.example/images/1/abc.mp4?101#t=2").unwrap();
/// let b = Url::parse("https://wimg.booru.example/images/1/abc.mp4?101").unwrap();
///
/// let ca = canonical_form(&a, Some("wimg.booru.example"), &aliases).unwrap();
/// let cb = canonical_form(&b, Some("wimg.booru.example"), &aliases).unwrap();
/// assert_eq!(ca, cb);
/// assert_eq!(ca, "https://wimg.booru.example/images/1/abc.mp4?101");
/// ```
pub fn canonical_form(
    url: &Url,
    canonical_host: Option<&str>,
    aliases: &[String],
) -> Result<String, UrlError> {
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(UrlError::InvalidScheme(scheme.to_string()));
    }

    let host = url.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();

    let authority = match canonical_host {
        Some(canonical) if matches_any(aliases, &host) => canonical.to_lowercase(),
        _ => match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        },
    };

    let mut canonical = format!("{}://{}{}", scheme, authority, url.path());
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        canonical.push('?');
        canonical.push_str(query);
    }

    Ok(canonical)
}

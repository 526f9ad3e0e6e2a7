// src/utils/url.rs

//! URL manipulation utilities.

/// Turn an extracted image reference into an absolute URL.
///
/// Protocol-relative references get `https:`, root-relative ones are joined
/// onto the site root. Anything that still is not an http(s) URL is rejected.
///
/// # Examples
/// ```
/// use shotcache::utils::url::normalize_image_url;
///
/// assert_eq!(
///     normalize_image_url("https://prnt.sc", "//image.prntscr.com/a.png"),
///     Some("https://image.prntscr.com/a.png".to_string())
/// );
/// assert_eq!(normalize_image_url("https://prnt.sc", "data:image/png;base64,AA"), None);
/// ```
pub fn normalize_image_url(base: &str, href: &str) -> Option<String> {
    let resolved = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("{}{href}", base.trim_end_matches('/'))
    } else {
        href.to_string()
    };

    resolved.starts_with("http").then_some(resolved)
}

/// Extract the lowercase host of a URL.
///
/// # Examples
/// ```
/// use shotcache::utils::url::get_domain;
///
/// assert_eq!(
///     get_domain("https://I.Imgur.com/x.png"),
///     Some("i.imgur.com".to_string())
/// );
/// ```
pub fn get_domain(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed.host_str().map(|host| host.to_lowercase())
}

/// Whether the URL's host contains any blocked host as a substring.
///
/// Unparsable URLs are not considered blocked; later checks reject them.
pub fn is_blocked_host(url: &str, blocked_hosts: &[String]) -> bool {
    match get_domain(url) {
        Some(host) => blocked_hosts
            .iter()
            .any(|blocked| host.contains(&blocked.to_lowercase())),
        None => false,
    }
}

/// First placeholder marker contained in the URL, if any.
pub fn find_bad_marker<'a>(url: &str, markers: &'a [String]) -> Option<&'a str> {
    markers
        .iter()
        .find(|marker| url.contains(marker.as_str()))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://prnt.sc";

    #[test]
    fn test_normalize_protocol_relative() {
        assert_eq!(
            normalize_image_url(BASE, "//img.example.com/a.png"),
            Some("https://img.example.com/a.png".to_string())
        );
    }

    #[test]
    fn test_normalize_root_relative() {
        assert_eq!(
            normalize_image_url(BASE, "/static/a.png"),
            Some("https://prnt.sc/static/a.png".to_string())
        );
        assert_eq!(
            normalize_image_url("https://prnt.sc/", "/a.png"),
            Some("https://prnt.sc/a.png".to_string())
        );
    }

    #[test]
    fn test_normalize_rejects_malformed() {
        assert_eq!(normalize_image_url(BASE, "a.png"), None);
        assert_eq!(normalize_image_url(BASE, "ftp://x/a.png"), None);
        assert_eq!(normalize_image_url(BASE, ""), None);
    }

    #[test]
    fn test_blocked_host_substring() {
        let blocked = vec!["imgur.com".to_string()];
        assert!(is_blocked_host("https://i.imgur.com/abc.png", &blocked));
        assert!(is_blocked_host("https://IMGUR.com/abc.png", &blocked));
        assert!(!is_blocked_host("https://image.prntscr.com/abc.png", &blocked));
        // Only the host is inspected, never the path
        assert!(!is_blocked_host(
            "https://image.prntscr.com/imgur.com.png",
            &blocked
        ));
        assert!(!is_blocked_host("not a url", &blocked));
    }

    #[test]
    fn test_find_bad_marker() {
        let markers = vec!["image-not-found".to_string(), "st.prntscr.com".to_string()];
        assert_eq!(
            find_bad_marker("https://st.prntscr.com/img/image-not-found.png", &markers),
            Some("image-not-found")
        );
        assert_eq!(
            find_bad_marker("https://image.prntscr.com/image/ok.png", &markers),
            None
        );
    }
}

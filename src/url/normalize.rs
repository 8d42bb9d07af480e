use crate::UrlError;
use url::Url;

/// Normalizes a discovered URL before it enters the state store
///
/// Two spellings of the same document should hash to the same record, so
/// discovery runs every URL through these rules:
///
/// 1. Parse the URL; reject if malformed
/// 2. Only `http` and `https` are accepted
/// 3. Host is lowercased and default ports dropped (done by the parser)
/// 4. Fragment is removed
///
/// Paths and query strings are left as published, trailing slash and
/// parameter order included: many sources serve different documents for
/// `/a` and `/a/`, and a query parameter may select the document.
///
/// # Examples
///
/// ```
/// use corpus_harvester::url::normalize_url;
///
/// let url = normalize_url("https://News.Example.com:443/story?id=7&utm_source=rss#top").unwrap();
/// assert_eq!(url.as_str(), "https://news.example.com/story?id=7&utm_source=rss");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingDomain);
    }

    url.set_fragment(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_preserved() {
        let result = normalize_url("http://example.com/page").unwrap();
        assert_eq!(result.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_lowercase_host_keeps_path_case() {
        let result = normalize_url("https://EXAMPLE.COM/Page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Page");
    }

    #[test]
    fn test_default_port_dropped() {
        let result = normalize_url("https://example.com:443/page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_explicit_port_kept() {
        let result = normalize_url("http://127.0.0.1:8080/page").unwrap();
        assert_eq!(result.as_str(), "http://127.0.0.1:8080/page");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("https://example.com/page#section").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_trailing_slash_preserved() {
        let result = normalize_url("https://example.com/section/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/section/");
    }

    #[test]
    fn test_query_kept_verbatim() {
        let result =
            normalize_url("https://example.com/a?z=1&utm_medium=email&b=2&fbclid=x").unwrap();
        assert_eq!(
            result.as_str(),
            "https://example.com/a?z=1&utm_medium=email&b=2&fbclid=x"
        );
    }

    #[test]
    fn test_tracking_params_keep_records_distinct() {
        let plain = normalize_url("https://example.com/a?id=1").unwrap();
        let tagged = normalize_url("https://example.com/a?id=1&utm_source=rss").unwrap();
        assert_ne!(plain, tagged);
    }

    #[test]
    fn test_whitespace_trimmed() {
        let result = normalize_url("  https://example.com/a \n").unwrap();
        assert_eq!(result.as_str(), "https://example.com/a");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.com/page");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(
            normalize_url("not a url").unwrap_err(),
            UrlError::Parse(_)
        ));
    }
}

use crate::UrlError;
use url::Url;

/// Returns the politeness key for a URL
///
/// The key is the lowercase host, followed by `:port` when the URL carries a
/// non-default port. Two servers on one host but different ports are paced
/// independently.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use corpus_harvester::url::domain_of;
///
/// let url = Url::parse("https://News.Example.com/path").unwrap();
/// assert_eq!(domain_of(&url).unwrap(), "news.example.com");
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(domain_of(&url).unwrap(), "127.0.0.1:8080");
/// ```
pub fn domain_of(url: &Url) -> Result<String, UrlError> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(UrlError::MissingDomain)?
        .to_lowercase();

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Returns the bare lowercase host of a URL, without any port
///
/// Configured domain patterns are matched against this value.
pub fn host_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Builds the robots.txt location for the server that hosts `url`
pub fn robots_url(url: &Url) -> Result<Url, UrlError> {
    let mut robots = url.clone();
    if robots.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    Ok(robots)
}

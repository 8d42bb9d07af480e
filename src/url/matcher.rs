/// A configured domain pattern
///
/// Two forms are supported:
/// 1. Exact: `example.com` matches only `example.com`
/// 2. Wildcard: `*.example.com` matches `example.com` itself and any
///    subdomain at any depth
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    Exact(String),
    Wildcard(String),
}

impl DomainPattern {
    /// Parses a pattern string, lowercasing it
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_lowercase();
        match pattern.strip_prefix("*.") {
            Some(base) => Self::Wildcard(base.to_string()),
            None => Self::Exact(pattern),
        }
    }

    /// Checks if a lowercase host matches this pattern
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(domain) => host == domain,
            Self::Wildcard(base) => {
                host == base
                    || host
                        .strip_suffix(base.as_str())
                        .map_or(false, |prefix| prefix.ends_with('.'))
            }
        }
    }

    /// More specific patterns sort first: exact before wildcard, longer before shorter
    pub fn specificity(&self) -> (u8, usize) {
        match self {
            Self::Exact(domain) => (1, domain.len()),
            Self::Wildcard(base) => (0, base.len()),
        }
    }
}

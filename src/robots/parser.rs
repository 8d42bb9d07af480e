//! Robots.txt parser implementation
//!
//! Allow/Disallow matching is delegated to the robotstxt crate. Crawl-delay
//! is not part of that crate's matcher, so it is parsed here once per file.

use robotstxt::DefaultMatcher;

/// Parsed robots.txt data
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    /// Raw robots.txt content
    content: String,
    /// Whether to allow all (no usable robots.txt)
    allow_all: bool,
    /// Crawl-delay per user-agent group, in file order
    delays: Vec<AgentDelay>,
}

#[derive(Debug, Clone)]
struct AgentDelay {
    agents: Vec<String>,
    seconds: f64,
}

impl ParsedRobots {
    /// Creates a new ParsedRobots from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            allow_all: false,
            delays: parse_crawl_delays(content),
        }
    }

    /// Creates a permissive ParsedRobots that allows everything
    ///
    /// Used whenever robots.txt is missing, unreachable or returns an error.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
            delays: Vec::new(),
        }
    }

    /// Returns true if this is the permissive fallback
    pub fn is_allow_all(&self) -> bool {
        self.allow_all
    }

    /// Returns the raw robots.txt content
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Checks if a URL is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `url` - An absolute URL or a path (e.g., "/page.html")
    /// * `user_agent` - The product token of the crawler (e.g., "CorpusBot")
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.allow_all || self.content.trim().is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Gets the crawl delay in seconds for a specific user agent
    ///
    /// A group naming the agent wins over the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let agent = user_agent.to_lowercase();
        let mut wildcard = None;

        for group in &self.delays {
            if group.agents.iter().any(|a| a != "*" && agent.contains(a.as_str())) {
                return Some(group.seconds);
            }
            if wildcard.is_none() && group.agents.iter().any(|a| a == "*") {
                wildcard = Some(group.seconds);
            }
        }

        wildcard
    }
}

/// Collects every Crawl-delay directive with the user-agent group it belongs to
///
/// A group is a run of consecutive `User-agent` lines followed by rules; the
/// next `User-agent` line after a rule starts a new group.
fn parse_crawl_delays(content: &str) -> Vec<AgentDelay> {
    let mut delays = Vec::new();
    let mut agents: Vec<String> = Vec::new();
    let mut in_rules = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if in_rules {
                    agents.clear();
                    in_rules = false;
                }
                if !value.is_empty() {
                    agents.push(value.to_lowercase());
                }
            }
            "crawl-delay" => {
                in_rules = true;
                if let Ok(seconds) = value.parse::<f64>() {
                    if !agents.is_empty() && seconds.is_finite() && seconds >= 0.0 {
                        delays.push(AgentDelay {
                            agents: agents.clone(),
                            seconds,
                        });
                    }
                }
            }
            _ => in_rules = true,
        }
    }

    delays
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let robots = ParsedRobots::allow_all();
        assert!(robots.is_allow_all());
        assert!(robots.is_allowed("https://example.com/admin", "TestBot"));
    }

    #[test]
    fn test_disallow_all() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /");
        assert!(!robots.is_allowed("https://example.com/", "TestBot"));
        assert!(!robots.is_allowed("https://example.com/page", "TestBot"));
    }

    #[test]
    fn test_disallow_specific_path() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /private");
        assert!(robots.is_allowed("https://example.com/news/1", "TestBot"));
        assert!(!robots.is_allowed("https://example.com/private/x", "TestBot"));
    }

    #[test]
    fn test_agent_specific_group() {
        let robots =
            ParsedRobots::from_content("User-agent: CorpusBot\nDisallow: /\n\nUser-agent: *\nAllow: /");
        assert!(!robots.is_allowed("https://example.com/page", "CorpusBot"));
        assert!(robots.is_allowed("https://example.com/page", "OtherBot"));
    }

    #[test]
    fn test_garbage_allows() {
        let robots = ParsedRobots::from_content("<html>not a robots file</html>");
        assert!(robots.is_allowed("https://example.com/any", "TestBot"));
        assert_eq!(robots.crawl_delay("TestBot"), None);
    }

    #[test]
    fn test_crawl_delay_wildcard() {
        let robots = ParsedRobots::from_content("User-agent: *\nCrawl-delay: 10\nDisallow: /admin");
        assert_eq!(robots.crawl_delay("TestBot"), Some(10.0));
    }

    #[test]
    fn test_crawl_delay_after_other_rules() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /admin\nCrawl-delay: 4");
        assert_eq!(robots.crawl_delay("TestBot"), Some(4.0));
    }

    #[test]
    fn test_crawl_delay_specific_beats_wildcard() {
        let robots = ParsedRobots::from_content(
            "User-agent: *\nCrawl-delay: 10\n\nUser-agent: testbot\nCrawl-delay: 5",
        );
        assert_eq!(robots.crawl_delay("TestBot/1.0"), Some(5.0));
        assert_eq!(robots.crawl_delay("OtherBot"), Some(10.0));
    }

    #[test]
    fn test_crawl_delay_shared_group() {
        let robots = ParsedRobots::from_content("User-agent: BotA\nUser-agent: BotB\nCrawl-delay: 3");
        assert_eq!(robots.crawl_delay("BotA"), Some(3.0));
        assert_eq!(robots.crawl_delay("BotB"), Some(3.0));
        assert_eq!(robots.crawl_delay("BotC"), None);
    }

    #[test]
    fn test_crawl_delay_new_group_resets_agents() {
        let robots = ParsedRobots::from_content(
            "User-agent: BotA\nDisallow: /x\nUser-agent: BotB\nCrawl-delay: 8",
        );
        assert_eq!(robots.crawl_delay("BotA"), None);
        assert_eq!(robots.crawl_delay("BotB"), Some(8.0));
    }

    #[test]
    fn test_crawl_delay_decimal_and_comments() {
        let robots = ParsedRobots::from_content("User-agent: * # everyone\nCrawl-delay: 2.5 # slow");
        assert_eq!(robots.crawl_delay("TestBot"), Some(2.5));
    }
}

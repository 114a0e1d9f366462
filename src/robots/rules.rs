//! robots.txt parsing and path matching.
//!
//! Follows the de-facto standard (RFC 9309): records are grouped by
//! `User-agent`, the most specific matching group applies, and the longest
//! matching rule wins with `Allow` winning ties. `*` and a trailing `$` are
//! supported in paths. Rule paths are percent-encoded the way `url` encodes
//! request paths, so both sides compare in the same form.

use std::time::Duration;

use crate::config::duration_from_secs;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    pattern: String,
    allow: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
}

/// Parsed robots.txt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    groups: Vec<Group>,
    sitemaps: Vec<String>,
}

impl RobotsRules {
    /// Rules that allow everything (missing robots.txt).
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse robots.txt content. Unknown lines are ignored.
    pub fn parse(content: &str) -> Self {
        let mut rules = Self::default();
        let mut current: Option<Group> = None;
        // Consecutive User-agent lines share one group
        let mut collecting_agents = false;

        for line in content.lines() {
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            };
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !collecting_agents {
                        if let Some(group) = current.take() {
                            rules.groups.push(group);
                        }
                        current = Some(Group::default());
                        collecting_agents = true;
                    }
                    if let Some(group) = current.as_mut() {
                        if !value.is_empty() {
                            group.agents.push(value.to_ascii_lowercase());
                        }
                    }
                }
                "allow" | "disallow" => {
                    collecting_agents = false;
                    let Some(group) = current.as_mut() else {
                        continue;
                    };
                    // An empty Disallow allows everything and adds no rule
                    if value.is_empty() {
                        continue;
                    }
                    group.rules.push(Rule {
                        pattern: normalize_pattern(value),
                        allow: key == "allow",
                    });
                }
                "crawl-delay" => {
                    collecting_agents = false;
                    if let (Some(group), Ok(secs)) = (current.as_mut(), value.parse::<f64>()) {
                        if secs.is_finite() && secs >= 0.0 {
                            group.crawl_delay = Some(duration_from_secs(secs));
                        }
                    }
                }
                "sitemap" => {
                    // Sitemap lines are global; the value itself contains a colon
                    if !value.is_empty() {
                        rules.sitemaps.push(value.to_string());
                    }
                }
                _ => {}
            }
        }

        if let Some(group) = current {
            rules.groups.push(group);
        }
        rules
    }

    /// Groups naming the agent's product token, falling back to `*`.
    fn groups_for(&self, user_agent: &str) -> Vec<&Group> {
        let token = product_token(user_agent);

        let named: Vec<&Group> = if token.is_empty() {
            Vec::new()
        } else {
            self.groups
                .iter()
                .filter(|group| group.agents.iter().any(|agent| *agent == token))
                .collect()
        };
        if !named.is_empty() {
            return named;
        }

        self.groups
            .iter()
            .filter(|group| group.agents.iter().any(|agent| agent == "*"))
            .collect()
    }

    /// Whether `user_agent` may fetch `path` (path plus optional query).
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        if path == "/robots.txt" {
            return true;
        }

        let mut best: Option<&Rule> = None;
        for group in self.groups_for(user_agent) {
            for rule in &group.rules {
                if !pattern_matches(&rule.pattern, path) {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some(current) => {
                        rule.pattern.len() > current.pattern.len()
                            || (rule.pattern.len() == current.pattern.len()
                                && rule.allow
                                && !current.allow)
                    }
                };
                if better {
                    best = Some(rule);
                }
            }
        }

        best.map(|rule| rule.allow).unwrap_or(true)
    }

    /// Crawl delay requested for `user_agent`, if any.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.groups_for(user_agent)
            .iter()
            .filter_map(|group| group.crawl_delay)
            .max()
    }

    /// Sitemap URLs listed in the file.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }
}

/// Lowercase product token of a user agent (`"Bot/1.0 (+url)"` -> `"bot"`).
fn product_token(user_agent: &str) -> String {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Encode a rule path the way `url` encodes request paths: non-ASCII
/// octets and the few ASCII characters outside the path set become `%XX`,
/// and existing escapes are uppercased.
fn normalize_pattern(pattern: &str) -> String {
    let bytes = pattern.as_bytes();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            out.push('%');
            out.push(bytes[i + 1].to_ascii_uppercase() as char);
            out.push(bytes[i + 2].to_ascii_uppercase() as char);
            i += 3;
            continue;
        }
        if b.is_ascii() && !matches!(b, b' ' | b'"' | b'<' | b'>' | b'`' | b'{' | b'}') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
        i += 1;
    }
    out
}

/// Match a robots path pattern with `*` wildcards and an optional `$` anchor.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() {
        return !anchored || pos == path.len();
    }

    for (i, part) in rest.iter().enumerate() {
        let last = i + 1 == rest.len();
        if last && anchored {
            return path[pos..].ends_with(part);
        }
        match path[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = "ladon-net/0.1 (+https://example.org/bot)";

    #[test]
    fn test_disallow_prefix() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /private\n");
        assert!(!rules.is_allowed(UA, "/private"));
        assert!(!rules.is_allowed(UA, "/private/file.html"));
        assert!(rules.is_allowed(UA, "/public"));
    }

    #[test]
    fn test_longest_match_wins() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /docs\nAllow: /docs/public\n",
        );
        assert!(!rules.is_allowed(UA, "/docs/secret"));
        assert!(rules.is_allowed(UA, "/docs/public/a.pdf"));
    }

    #[test]
    fn test_allow_wins_ties() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /page\nAllow: /page\n");
        assert!(rules.is_allowed(UA, "/page"));
    }

    #[test]
    fn test_wildcards_and_anchor() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /*.pdf$\nDisallow: /tmp*/cache\n",
        );
        assert!(!rules.is_allowed(UA, "/files/report.pdf"));
        assert!(rules.is_allowed(UA, "/files/report.pdf?download=1"));
        assert!(!rules.is_allowed(UA, "/tmp1/cache/x"));
        assert!(rules.is_allowed(UA, "/tmp1/other"));
    }

    #[test]
    fn test_specific_agent_group_preferred() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /\n\nUser-agent: ladon-net\nDisallow: /admin\n",
        );
        assert!(rules.is_allowed(UA, "/articles"));
        assert!(!rules.is_allowed(UA, "/admin"));
        assert!(!rules.is_allowed("OtherBot/2.0", "/articles"));
    }

    #[test]
    fn test_grouped_user_agents() {
        let rules = RobotsRules::parse(
            "User-agent: foo\nUser-agent: ladon-net\nDisallow: /shared\n",
        );
        assert!(!rules.is_allowed(UA, "/shared"));
        assert!(!rules.is_allowed("foo", "/shared"));
        assert!(rules.is_allowed("bar", "/shared"));
    }

    #[test]
    fn test_empty_disallow_allows_all() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n");
        assert!(rules.is_allowed(UA, "/anything"));
    }

    #[test]
    fn test_crawl_delay_and_sitemaps() {
        let rules = RobotsRules::parse(
            "# comment\nUser-agent: *\nCrawl-delay: 2.5\nDisallow: /x\n\
             Sitemap: https://example.com/sitemap.xml\n",
        );
        assert_eq!(rules.crawl_delay(UA), Some(Duration::from_millis(2500)));
        assert_eq!(rules.sitemaps(), ["https://example.com/sitemap.xml"]);
    }

    #[test]
    fn test_robots_txt_always_allowed() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /\n");
        assert!(rules.is_allowed(UA, "/robots.txt"));
        assert!(!rules.is_allowed(UA, "/"));
    }

    #[test]
    fn test_non_ascii_rules_match_encoded_paths() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /café\nAllow: /%e2%82%ac/\n");
        let path = url::Url::parse("https://example.com/café/menu").unwrap();
        assert_eq!(path.path(), "/caf%C3%A9/menu");
        assert!(!rules.is_allowed(UA, path.path()));
        assert!(rules.is_allowed(UA, "/cafe"));

        let rules = RobotsRules::parse("User-agent: *\nDisallow: /\nAllow: /%e2%82%ac/\n");
        let euro = url::Url::parse("https://example.com/€/price").unwrap();
        assert!(rules.is_allowed(UA, euro.path()));
    }

    #[test]
    fn test_agent_must_match_whole_product_token() {
        let rules = RobotsRules::parse(
            "User-agent: la\nDisallow: /\n\nUser-agent: net\nDisallow: /\n\nUser-agent: *\nAllow: /\n",
        );
        assert!(rules.is_allowed(UA, "/articles"));
        assert!(!rules.is_allowed("la/2.0", "/articles"));

        let rules = RobotsRules::parse("User-agent: LADON-NET\nDisallow: /admin\n");
        assert!(!rules.is_allowed(UA, "/admin"));
    }

    #[test]
    fn test_empty_agent_does_not_shadow_wildcard() {
        let rules = RobotsRules::parse(
            "User-agent:\nAllow: /\n\nUser-agent: *\nDisallow: /private\n",
        );
        assert!(!rules.is_allowed(UA, "/private"));
        assert!(rules.is_allowed(UA, "/public"));
    }

    #[test]
    fn test_garbage_is_ignored() {
        let rules = RobotsRules::parse("<html>not robots</html>\nDisallow: /orphan\n");
        assert!(rules.is_allowed(UA, "/orphan"));
        assert_eq!(rules, RobotsRules::allow_all());
    }
}

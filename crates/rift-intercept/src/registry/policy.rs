//! Real-network connection policy.

use crate::descriptor::Origin;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Selects hosts a net-connect rule applies to.
///
/// Rules are tested against both `host:port` and the bare host.
#[derive(Clone)]
pub enum HostMatcher {
    Exact(String),
    Pattern(Arc<Regex>),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl HostMatcher {
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(HostMatcher::Pattern(Arc::new(Regex::new(pattern)?)))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        HostMatcher::Predicate(Arc::new(f))
    }

    pub fn matches(&self, origin: &Origin) -> bool {
        let authority = origin.authority();
        let subjects = [authority.as_str(), origin.host.as_str()];
        let hit = subjects.iter().any(|&subject| match self {
            HostMatcher::Exact(expected) => expected.eq_ignore_ascii_case(subject),
            HostMatcher::Pattern(re) => re.is_match(subject),
            HostMatcher::Predicate(f) => f(subject),
        });
        hit
    }
}

impl fmt::Debug for HostMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostMatcher::Exact(h) => write!(f, "HostMatcher({h:?})"),
            HostMatcher::Pattern(re) => write!(f, "HostMatcher(/{}/)", re.as_str()),
            HostMatcher::Predicate(_) => f.write_str("HostMatcher(<predicate>)"),
        }
    }
}

impl From<&str> for HostMatcher {
    fn from(host: &str) -> Self {
        HostMatcher::Exact(host.to_string())
    }
}

impl From<String> for HostMatcher {
    fn from(host: String) -> Self {
        HostMatcher::Exact(host)
    }
}

impl From<Regex> for HostMatcher {
    fn from(re: Regex) -> Self {
        HostMatcher::Pattern(Arc::new(re))
    }
}

/// Whether unmatched requests may reach the real network.
///
/// Host rules are evaluated newest first; the first applicable rule decides
/// and the default applies when none does.
#[derive(Debug, Clone)]
pub struct NetConnectPolicy {
    default_allow: bool,
    rules: Vec<(HostMatcher, bool)>,
}

impl Default for NetConnectPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl NetConnectPolicy {
    pub fn allow_all() -> Self {
        Self {
            default_allow: true,
            rules: Vec::new(),
        }
    }

    pub fn deny_all() -> Self {
        Self {
            default_allow: false,
            rules: Vec::new(),
        }
    }

    /// Allow real connections, to every host (`None`) or to matching hosts.
    pub fn allow(&mut self, hosts: Option<HostMatcher>) {
        self.set(hosts, true);
    }

    /// Deny real connections, to every host (`None`) or to matching hosts.
    pub fn disallow(&mut self, hosts: Option<HostMatcher>) {
        self.set(hosts, false);
    }

    fn set(&mut self, hosts: Option<HostMatcher>, allow: bool) {
        match hosts {
            Some(matcher) => self.rules.push((matcher, allow)),
            None => {
                self.default_allow = allow;
                self.rules.clear();
            }
        }
    }

    pub fn allows(&self, origin: &Origin) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|(matcher, _)| matcher.matches(origin))
            .map_or(self.default_allow, |(_, allow)| *allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(s: &str) -> Origin {
        Origin::parse(s).unwrap()
    }

    #[test]
    fn test_default_allows() {
        assert!(NetConnectPolicy::default().allows(&origin("http://example.test")));
    }

    #[test]
    fn test_deny_with_localhost_exception() {
        let mut policy = NetConnectPolicy::default();
        policy.disallow(None);
        policy.allow(Some(HostMatcher::from("localhost")));
        assert!(policy.allows(&origin("http://localhost:3000")));
        assert!(!policy.allows(&origin("http://example.test")));
    }

    #[test]
    fn test_latest_rule_wins() {
        let mut policy = NetConnectPolicy::deny_all();
        policy.allow(Some(HostMatcher::pattern(r"\.test$").unwrap()));
        policy.disallow(Some(HostMatcher::from("blocked.test")));
        assert!(policy.allows(&origin("https://api.test")));
        assert!(!policy.allows(&origin("https://blocked.test")));
    }

    #[test]
    fn test_authority_form_and_reset() {
        let mut policy = NetConnectPolicy::deny_all();
        policy.allow(Some(HostMatcher::from("example.test:8080")));
        assert!(policy.allows(&origin("http://example.test:8080")));
        assert!(!policy.allows(&origin("http://example.test")));

        policy.allow(None);
        assert!(policy.allows(&origin("http://anything.test")));
        policy.disallow(None);
        assert!(!policy.allows(&origin("http://example.test:8080")));
    }

    #[test]
    fn test_predicate_rule() {
        let mut policy = NetConnectPolicy::deny_all();
        policy.allow(Some(HostMatcher::predicate(|h| h.starts_with("127."))));
        assert!(policy.allows(&origin("http://127.0.0.1:9000")));
    }
}

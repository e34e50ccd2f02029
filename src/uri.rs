//! Endpoint URIs: `<scheme>://<common-name>/<type>`.
//!
//! A `Uri` identifies a logical endpoint bound to a live session. The
//! broker itself is addressed by two related but distinct literals: the
//! three-slash form `<scheme>:///server` names the broker as a *target*,
//! while `<scheme>://server` is the broker's own *sender* identity on
//! messages it originates (see [`SERVER_TARGET`] / [`SERVER_SENDER`]).

use std::fmt;

/// A parsed endpoint identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    pub scheme: String,
    pub common_name: String,
    pub type_: String,
}

impl Uri {
    pub fn new(scheme: impl Into<String>, common_name: impl Into<String>, type_: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            common_name: common_name.into(),
            type_: type_.into(),
        }
    }

    /// Parse `<scheme>://<common-name>/<type>`. The common-name segment
    /// may be empty (the broker's own `<scheme>:///server` address).
    pub fn parse(s: &str) -> Option<Self> {
        let (scheme, rest) = s.split_once("://")?;
        let (common_name, type_) = rest.split_once('/')?;
        Some(Self {
            scheme: scheme.to_string(),
            common_name: common_name.to_string(),
            type_: type_.to_string(),
        })
    }

    /// `true` if this URI's segments match `pattern`'s, where `*` in a
    /// pattern segment matches any literal value in that segment
    /// (spec: wildcard expands one URI segment, not across segments).
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        let Some(p) = Uri::parse(pattern) else { return false };
        if p.scheme != self.scheme {
            return false;
        }
        segment_matches(&p.common_name, &self.common_name) && segment_matches(&p.type_, &self.type_)
    }
}

fn segment_matches(pattern_segment: &str, value: &str) -> bool {
    pattern_segment == "*" || pattern_segment == value
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.common_name, self.type_)
    }
}

/// Build the literal the broker is addressed by as a message *target*:
/// `<scheme>:///server` (empty common-name segment).
pub fn server_target(scheme: &str) -> String {
    format!("{scheme}:///server")
}

/// Build the literal the broker uses as its own *sender* identity on
/// broker-originated messages: `<scheme>://server`.
pub fn server_sender(scheme: &str) -> String {
    format!("{scheme}://server")
}

/// `true` if `target` is the broker's own address (the ingress pipeline's
/// "targets[0] == server" check, spec.md §4.4).
pub fn is_server_target(target: &str, scheme: &str) -> bool {
    target == server_target(scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_uri() {
        let u = Uri::parse("cth://agent-1/agent").unwrap();
        assert_eq!(u.scheme, "cth");
        assert_eq!(u.common_name, "agent-1");
        assert_eq!(u.type_, "agent");
    }

    #[test]
    fn parses_server_target_with_empty_common_name() {
        let u = Uri::parse("cth:///server").unwrap();
        assert_eq!(u.common_name, "");
        assert_eq!(u.type_, "server");
    }

    #[test]
    fn display_round_trips() {
        let u = Uri::new("cth", "agent-1", "agent");
        assert_eq!(u.to_string(), "cth://agent-1/agent");
        assert_eq!(Uri::parse(&u.to_string()).unwrap(), u);
    }

    #[test]
    fn wildcard_matches_any_common_name() {
        let u = Uri::new("cth", "agent-1", "agent");
        assert!(u.matches_pattern("cth://*/agent"));
        assert!(!u.matches_pattern("cth://*/controller"));
    }

    #[test]
    fn wildcard_does_not_cross_segments() {
        let u = Uri::new("cth", "agent-1", "agent");
        // A pattern with a literal common-name and literal type must match exactly.
        assert!(!u.matches_pattern("cth://agent-2/agent"));
        assert!(u.matches_pattern("cth://agent-1/agent"));
    }

    #[test]
    fn literal_pattern_is_not_a_match_for_unrelated_uri() {
        let u = Uri::new("cth", "agent-1", "agent");
        assert!(!u.matches_pattern("cth://ghost/agent"));
    }

    #[test]
    fn is_server_target_literal() {
        assert!(is_server_target("cth:///server", "cth"));
        assert!(!is_server_target("cth://server", "cth"));
    }
}

//! Relay domain validation

use regex_lite::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::TunnelError;

/// Relay domains look like `fenecon-ab12-cd34`
const RELAY_DOMAIN_PATTERN: &str = r"^fenecon-\w{4}-\w{4}$";

fn relay_domain_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(RELAY_DOMAIN_PATTERN).ok())
        .as_ref()
}

/// Check whether `candidate` is a well-formed relay domain
///
/// Pure string matching, no I/O.
pub fn is_valid_relay_domain(candidate: &str) -> bool {
    relay_domain_regex().is_some_and(|re| re.is_match(candidate))
}

/// A validated relay domain the tunnel proxy registers under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayDomain(String);

impl RelayDomain {
    /// Validate and wrap a relay domain
    pub fn parse(candidate: &str) -> Result<Self, TunnelError> {
        if is_valid_relay_domain(candidate) {
            Ok(Self(candidate.to_string()))
        } else {
            Err(TunnelError::InvalidDomain(candidate.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_domains() {
        assert!(is_valid_relay_domain("fenecon-ab12-cd34"));
        assert!(is_valid_relay_domain("fenecon-wx7q-99zz"));
        assert!(is_valid_relay_domain("fenecon-AB_1-____"));
    }

    #[test]
    fn test_invalid_domains() {
        for candidate in [
            "",
            "fenecon-ab12",
            "fenecon-ab1-cd34",
            "fenecon-ab123-cd34",
            "fenecon-ab12-cd345",
            "fenecon-ab12-cd3",
            "Fenecon-ab12-cd34",
            "xfenecon-ab12-cd34",
            "fenecon-ab12-cd34 ",
            "fenecon-ab-2-cd34",
            "fenecon-ab12-cd34\n",
            "fenecon-ab12-cd34; rm -rf /",
            "fenecon-äb12-cd34",
        ] {
            assert!(
                !is_valid_relay_domain(candidate),
                "{:?} should be rejected",
                candidate
            );
        }
    }

    #[test]
    fn test_parse_rejects_with_invalid_domain_error() {
        match RelayDomain::parse("fenecon-nope") {
            Err(TunnelError::InvalidDomain(domain)) => assert_eq!(domain, "fenecon-nope"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_and_display() {
        let domain = RelayDomain::parse("fenecon-ab12-cd34").unwrap();
        assert_eq!(domain.as_str(), "fenecon-ab12-cd34");
        assert_eq!(domain.to_string(), "fenecon-ab12-cd34");
    }
}

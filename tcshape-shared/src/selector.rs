//! Address/port selectors (`host[/mask]:port`).
//!
//! Either half of a selector may be a wildcard (`*`), which leaves the
//! corresponding field absent. The literal `none` matches nothing at all and
//! suppresses rule generation for that side.
//!
//! Parsing never fails: host syntax is passed through untouched for tc to
//! validate, and a port that is not a valid `u16` is treated as a wildcard.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Sentinel selecting no traffic.
pub const NONE_SENTINEL: &str = "none";

/// A parsed traffic selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Selector {
    /// `none`: no rule is generated for this side
    MatchNothing,
    /// Address and/or port constraint; absent fields match everything
    Match {
        network: Option<String>,
        port: Option<u16>,
    },
}

impl Selector {
    /// Selector matching every address and port (`*:*`).
    pub const fn match_all() -> Self {
        Selector::Match {
            network: None,
            port: None,
        }
    }

    /// Parses `host[/mask]:port`, `*:*`, `none` or an empty string.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == NONE_SENTINEL {
            return Selector::MatchNothing;
        }

        let (host, port) = match raw.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (raw, None),
        };

        let network = strip_wildcard(host);
        let port = port.and_then(strip_wildcard).and_then(|port| {
            port.parse::<u16>()
                .inspect_err(|e| {
                    warn!(
                        "Selector '{}' has unparsable port '{}' ({}), matching any port",
                        raw, port, e
                    )
                })
                .ok()
        });

        Selector::Match { network, port }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Selector::MatchNothing)
    }

    pub fn network(&self) -> Option<&str> {
        match self {
            Selector::Match { network, .. } => network.as_deref(),
            Selector::MatchNothing => None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Selector::Match { port, .. } => *port,
            Selector::MatchNothing => None,
        }
    }
}

/// Removes every `*` and returns `None` when nothing meaningful is left.
fn strip_wildcard(field: &str) -> Option<String> {
    let stripped: String = field.chars().filter(|c| *c != '*').collect();
    let stripped = stripped.trim();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

impl FromStr for Selector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Selector::parse(s))
    }
}

impl From<String> for Selector {
    fn from(raw: String) -> Self {
        Selector::parse(&raw)
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::MatchNothing => f.write_str(NONE_SENTINEL),
            Selector::Match { network, port } => {
                match network {
                    Some(network) => f.write_str(network)?,
                    None => f.write_str("*")?,
                }
                match port {
                    Some(port) => write!(f, ":{}", port),
                    None => f.write_str(":*"),
                }
            }
        }
    }
}

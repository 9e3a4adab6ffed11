//! JSON5 profile files describing a reusable shaping policy.
//!
//! Every field is optional; anything left out falls back to the command line
//! value or the built-in default.
//!
//! # Example Profile File
//!
//! ```json5
//! {
//!     description: "Congested DSL uplink",
//!     bandwidth: "rate 0.5mbit burst 10kb limit 10k",
//!     impairment: "delay 100ms 10ms 25% loss 0.1%",
//!     to: "*:80",
//!     exclude: [22, 53],
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{TcshapeError, TcshapeResult};
use crate::{RawParams, Selector, ShapingPolicy};

/// A shaping profile as written on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileFile {
    #[serde(default)]
    pub description: String,
    pub interface: Option<String>,
    /// tbf parameters
    pub bandwidth: Option<String>,
    /// netem parameters
    pub impairment: Option<String>,
    pub from: Option<Selector>,
    pub to: Option<Selector>,
    pub exclude: Option<Vec<u16>>,
    pub reorder: Option<bool>,
}

impl ProfileFile {
    /// Overlay the fields present in this profile onto `policy`.
    pub fn apply_to(&self, policy: &mut ShapingPolicy) {
        if let Some(ref interface) = self.interface {
            policy.interface = interface.clone();
        }
        if let Some(ref bandwidth) = self.bandwidth {
            policy.shaping.bandwidth_limit = RawParams::new(bandwidth.as_str());
        }
        if let Some(ref impairment) = self.impairment {
            policy.shaping.impairment = RawParams::new(impairment.as_str());
        }
        if let Some(ref from) = self.from {
            policy.from = from.clone();
        }
        if let Some(ref to) = self.to {
            policy.to = to.clone();
        }
        if let Some(ref exclude) = self.exclude {
            policy.exclude_ports = exclude.clone();
        }
        if let Some(reorder) = self.reorder {
            policy.shaping.reorder_on_jitter = reorder;
        }
    }
}

/// Parse a profile from JSON5 text.
pub fn parse_profile(content: &str, origin: &str) -> TcshapeResult<ProfileFile> {
    json5::from_str(content).map_err(|e| TcshapeError::ProfileError {
        path: origin.to_string(),
        message: e.to_string(),
    })
}

/// Read and parse a profile file.
pub fn parse_profile_file(path: &Path) -> TcshapeResult<ProfileFile> {
    let content = std::fs::read_to_string(path)?;
    parse_profile(&content, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_profile() {
        let profile = parse_profile(
            r#"{
                // trailing commas and comments are fine in JSON5
                description: "dsl",
                bandwidth: "rate 0.5mbit burst 10kb limit 10k",
                impairment: "delay 100ms 10ms 25% loss 0.1%",
                from: "none",
                to: "*:80",
                exclude: [22, 53],
                reorder: true,
            }"#,
            "inline",
        )
        .unwrap();

        assert_eq!(profile.description, "dsl");
        assert_eq!(profile.to, Some(Selector::parse("*:80")));
        assert_eq!(profile.from, Some(Selector::MatchNothing));
        assert_eq!(profile.exclude, Some(vec![22, 53]));
        assert_eq!(profile.reorder, Some(true));
    }

    #[test]
    fn test_apply_overlays_only_present_fields() {
        let profile = parse_profile(r#"{ impairment: "loss 1%" }"#, "inline").unwrap();
        let mut policy = ShapingPolicy::default();
        profile.apply_to(&mut policy);

        assert_eq!(
            policy.shaping.impairment.as_ref().map(|p| p.as_str()),
            Some("loss 1%")
        );
        assert!(policy.shaping.bandwidth_limit.is_none());
        assert_eq!(policy.exclude_ports, vec![22]);
        assert_eq!(policy.interface, "eth0");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = parse_profile(r#"{ delay: "100ms" }"#, "bad.json5").unwrap_err();
        assert!(err.to_string().contains("bad.json5"));
    }
}

//! CLI argument parsing for tcshape.
//!
//! This module handles command line argument parsing using clap and provides
//! a structured representation of CLI configuration. Options that can also
//! come from a profile are kept as `Option` so that an omitted flag does not
//! override the profile.

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use std::fmt;
use std::str::FromStr;

/// What the invocation should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Clear, then install the compiled policy
    Apply,
    /// Show installed qdiscs and filters
    Status,
    /// Remove everything tcshape installs
    Clear,
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "apply" => Ok(Action::Apply),
            "status" => Ok(Action::Status),
            "clear" => Ok(Action::Clear),
            other => Err(anyhow::anyhow!(
                "Invalid action '{}'. Must be 'apply', 'status' or 'clear'",
                other
            )),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Apply => write!(f, "apply"),
            Action::Status => write!(f, "status"),
            Action::Clear => write!(f, "clear"),
        }
    }
}

/// CLI configuration structure containing all parsed command line arguments
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub action: Action,
    pub verbose: bool,
    pub interface: Option<String>,
    pub mirror_device: Option<String>,
    pub bandwidth: Option<String>,
    pub impairment: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub exclude: Option<String>,
    pub reorder: bool,
    pub buffer_size: Option<u32>,
    pub profile: Option<String>,
    pub dry_run: bool,
    pub json: bool,
    pub skip_offload_check: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            action: Action::Status,
            verbose: false,
            interface: None,
            mirror_device: None,
            bandwidth: None,
            impairment: None,
            from: None,
            to: None,
            exclude: None,
            reorder: false,
            buffer_size: None,
            profile: None,
            dry_run: false,
            json: false,
            skip_offload_check: false,
        }
    }
}

impl CliConfig {
    /// Parse CLI arguments and create CliConfig
    pub fn from_args() -> Result<Self> {
        let matches = Self::build_cli().get_matches();
        Self::from_matches(&matches)
    }

    /// Create CliConfig from pre-parsed ArgMatches (useful for testing)
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let action = matches
            .get_one::<String>("action")
            .map(|s| s.parse::<Action>())
            .transpose()?
            .unwrap_or(Action::Status);

        Ok(Self {
            action,
            verbose: matches.get_flag("verbose"),
            interface: matches.get_one::<String>("interface").cloned(),
            mirror_device: matches.get_one::<String>("ifb").cloned(),
            bandwidth: matches.get_one::<String>("bandwidth").cloned(),
            impairment: matches.get_one::<String>("impairment").cloned(),
            from: matches.get_one::<String>("from").cloned(),
            to: matches.get_one::<String>("to").cloned(),
            exclude: matches.get_one::<String>("exclude").cloned(),
            reorder: matches.get_flag("reorder"),
            buffer_size: matches.get_one::<u32>("buffer-size").copied(),
            profile: matches.get_one::<String>("profile").cloned(),
            dry_run: matches.get_flag("dry-run"),
            json: matches.get_flag("json"),
            skip_offload_check: matches.get_flag("skip-offload-check"),
        })
    }

    /// Build the clap Command structure
    pub fn build_cli() -> Command {
        Command::new("tcshape")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Shape, delay and drop traffic on a network interface")
            .long_about("Compiles a bandwidth limit (tbf) and a delay/jitter/loss impairment (netem) \
                       into a prio qdisc hierarchy with u32 filters, installed on both the \
                       outbound path of an interface and, through an ifb mirror, its inbound path.")
            .arg(
                Arg::new("action")
                    .value_name("ACTION")
                    .help("What to do: apply, status or clear")
                    .value_parser(["apply", "status", "clear"])
                    .default_value("status"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .action(clap::ArgAction::SetTrue)
                    .help("Enable verbose logging")
                    .long_help("Enable debug logging, including every tc/ip command executed."),
            )
            .arg(
                Arg::new("interface")
                    .short('i')
                    .long("interface")
                    .value_name("IFACE")
                    .help("Interface to shape [default: eth0]"),
            )
            .arg(
                Arg::new("ifb")
                    .long("ifb")
                    .value_name("DEVICE")
                    .help("ifb device receiving the inbound mirror [default: ifb0]"),
            )
            .arg(
                Arg::new("bandwidth")
                    .short('b')
                    .long("bandwidth")
                    .value_name("TBF_PARAMS")
                    .help("tbf parameters, e.g. \"rate 0.5mbit burst 10kb limit 10k\"")
                    .long_help("Bandwidth limit passed verbatim to the tbf qdisc. Refused while \
                              segmentation offload is enabled on the interface."),
            )
            .arg(
                Arg::new("impairment")
                    .short('e')
                    .long("impairment")
                    .visible_alias("netem")
                    .value_name("NETEM_PARAMS")
                    .help("netem parameters, e.g. \"delay 100ms 10ms 25% loss 0.1%\"")
                    .long_help("Delay, jitter and loss passed verbatim to the netem qdisc. The netem \
                              queue limit is always set to the buffer size."),
            )
            .arg(
                Arg::new("from")
                    .short('f')
                    .long("from")
                    .value_name("HOST[/MASK]:PORT")
                    .help("Shape packets from this source; '*' wildcards, 'none' disables [default: none]"),
            )
            .arg(
                Arg::new("to")
                    .short('t')
                    .long("to")
                    .value_name("HOST[/MASK]:PORT")
                    .help("Shape packets to this destination; '*' wildcards, 'none' disables [default: *:*]"),
            )
            .arg(
                Arg::new("exclude")
                    .short('x')
                    .long("exclude")
                    .value_name("PORTS")
                    .help("Comma-separated ports never shaped; empty for none [default: 22]"),
            )
            .arg(
                Arg::new("reorder")
                    .short('r')
                    .long("reorder")
                    .action(clap::ArgAction::SetTrue)
                    .help("Let netem reorder packets when jitter is set")
                    .long_help("By default a very large rate is added to netem, which stops it from \
                              reordering jittered packets. This flag leaves netem's reordering in place."),
            )
            .arg(
                Arg::new("buffer-size")
                    .long("buffer-size")
                    .value_name("PACKETS")
                    .value_parser(clap::value_parser!(u32))
                    .help("netem queue limit in packets [default: 10000]"),
            )
            .arg(
                Arg::new("profile")
                    .short('p')
                    .long("profile")
                    .value_name("NAME|PATH")
                    .help("JSON5 profile to start from; flags override its fields")
                    .long_help("A path to a .json5 profile, or the name of one found in \
                              /usr/share/tcshape/profiles, ~/.config/tcshape/profiles or ./profiles."),
            )
            .arg(
                Arg::new("dry-run")
                    .short('n')
                    .long("dry-run")
                    .action(clap::ArgAction::SetTrue)
                    .help("Print the commands instead of running them"),
            )
            .arg(
                Arg::new("json")
                    .long("json")
                    .action(clap::ArgAction::SetTrue)
                    .help("Print results as JSON"),
            )
            .arg(
                Arg::new("skip-offload-check")
                    .long("skip-offload-check")
                    .action(clap::ArgAction::SetTrue)
                    .help("Apply a bandwidth limit even when segmentation offload is on"),
            )
    }
}

/// Parse a comma-separated port list; an empty string means no ports.
pub fn parse_port_list(raw: &str) -> Result<Vec<u16>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .map_err(|e| anyhow::anyhow!("Invalid excluded port '{}': {}", s, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_config_default_values() {
        let matches = CliConfig::build_cli()
            .try_get_matches_from(["tcshape"])
            .unwrap();

        let config = CliConfig::from_matches(&matches).unwrap();

        assert_eq!(config.action, Action::Status);
        assert!(!config.verbose);
        assert!(!config.reorder);
        assert!(!config.dry_run);
        assert!(config.interface.is_none());
        assert!(config.from.is_none());
        assert!(config.to.is_none());
        assert!(config.exclude.is_none());
        assert!(config.buffer_size.is_none());
    }

    #[test]
    fn test_cli_config_custom_values() {
        let matches = CliConfig::build_cli()
            .try_get_matches_from([
                "tcshape",
                "apply",
                "-i",
                "enp3s0",
                "--ifb",
                "ifb1",
                "-b",
                "rate 0.5mbit burst 10kb limit 10k",
                "--netem",
                "delay 100ms 10ms 25% loss 0.1%",
                "-f",
                "none",
                "-t",
                "*:80",
                "-x",
                "22,53",
                "-r",
                "--buffer-size",
                "500",
                "--dry-run",
                "--json",
            ])
            .unwrap();

        let config = CliConfig::from_matches(&matches).unwrap();

        assert_eq!(config.action, Action::Apply);
        assert_eq!(config.interface.as_deref(), Some("enp3s0"));
        assert_eq!(config.mirror_device.as_deref(), Some("ifb1"));
        assert_eq!(
            config.bandwidth.as_deref(),
            Some("rate 0.5mbit burst 10kb limit 10k")
        );
        assert_eq!(
            config.impairment.as_deref(),
            Some("delay 100ms 10ms 25% loss 0.1%")
        );
        assert_eq!(config.from.as_deref(), Some("none"));
        assert_eq!(config.to.as_deref(), Some("*:80"));
        assert_eq!(config.exclude.as_deref(), Some("22,53"));
        assert!(config.reorder);
        assert_eq!(config.buffer_size, Some(500));
        assert!(config.dry_run);
        assert!(config.json);
    }

    #[test]
    fn test_invalid_action_rejected() {
        let result = CliConfig::build_cli().try_get_matches_from(["tcshape", "restart"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_port_list() {
        assert_eq!(parse_port_list("22").unwrap(), vec![22]);
        assert_eq!(parse_port_list(" 22, 53 ,22").unwrap(), vec![22, 53, 22]);
        assert!(parse_port_list("").unwrap().is_empty());
        assert!(parse_port_list("ssh").is_err());
        assert!(parse_port_list("70000").is_err());
    }
}

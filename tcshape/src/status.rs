//! Status reporting and post-apply inspection.
//!
//! This module provides:
//! - Collection of current qdisc/filter state (with statistics) per device
//! - Detection of whether this tool's tree is installed
//! - The reorder advisory: netem builds that ignore `rate` keep reordering
//!   jittered packets, which can only be noticed after the fact

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

use tcshape_shared::errors::{TcshapeError, TcshapeResult};
use tcshape_shared::{Direction, ShapingPolicy};

use crate::commands::{TcCommand, TcCommandBuilder, TcOperation, TcTarget};
use crate::compiler::RuleIds;
use crate::executor::CommandRunner;

/// netem lines in `tc qdisc show` output
static NETEM_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^qdisc netem .*$").expect("static regex"));

/// `tc [-s] qdisc show dev <device>`
pub fn qdisc_show(device: &str, stats: bool) -> TcshapeResult<TcCommand> {
    let builder = TcCommandBuilder::qdisc()
        .operation(TcOperation::Show)
        .device(device);
    let builder = if stats { builder.with_stats() } else { builder };
    builder
        .build()
        .map_err(|e| TcshapeError::invalid_config(e.to_string()))
}

/// `tc -s filter show dev <device> parent <root>`
pub fn filter_show(device: &str, ids: &RuleIds) -> TcshapeResult<TcCommand> {
    TcCommandBuilder::filter()
        .operation(TcOperation::Show)
        .device(device)
        .target(TcTarget::Parent(ids.root))
        .with_stats()
        .build()
        .map_err(|e| TcshapeError::invalid_config(e.to_string()))
}

/// Warning text when a device's netem qdisc carries no `rate`.
///
/// Returns `None` when every netem line has a rate, or when there is no
/// netem qdisc to inspect.
pub fn reorder_advisory(device: &str, qdisc_output: &str) -> Option<String> {
    let missing_rate = NETEM_LINE
        .find_iter(qdisc_output)
        .any(|line| !line.as_str().split_whitespace().any(|token| token == "rate"));

    missing_rate.then(|| {
        format!(
            "netem on {} was installed without a rate; this kernel/iproute2 ignores the \
             reorder workaround, so jittered packets will be reordered",
            device
        )
    })
}

/// State of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub direction: Direction,
    pub device: String,
    /// True when this tool's root prio qdisc is installed
    pub active: bool,
    pub qdiscs: String,
    pub filters: String,
    /// Set when the device could not be queried (e.g. ifb absent)
    pub error: Option<String>,
    /// Set when the qdiscs were read but the filter query failed
    pub filters_error: Option<String>,
}

/// State of both directions.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub interface: String,
    pub devices: Vec<DeviceStatus>,
}

impl StatusReport {
    pub fn is_active(&self) -> bool {
        self.devices.iter().any(|d| d.active)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_active() { "active" } else { "inactive" };
        writeln!(f, "Traffic shaping on {}: {}", self.interface, state)?;

        for device in &self.devices {
            writeln!(f)?;
            writeln!(f, "=== {} ({}) ===", device.device, device.direction)?;
            if let Some(ref error) = device.error {
                writeln!(f, "unavailable: {}", error)?;
                continue;
            }
            writeln!(f, "--- qdiscs ---")?;
            writeln!(f, "{}", device.qdiscs.trim_end())?;
            if device.active {
                writeln!(f, "--- filters ---")?;
                match device.filters_error {
                    Some(ref error) => writeln!(f, "unavailable: {}", error)?,
                    None => writeln!(f, "{}", device.filters.trim_end())?,
                }
            }
        }
        Ok(())
    }
}

/// Whether `qdisc_output` shows this direction's root prio qdisc.
fn root_installed(qdisc_output: &str, ids: &RuleIds) -> bool {
    let marker = format!("qdisc prio {} root", ids.root);
    qdisc_output.lines().any(|line| line.starts_with(&marker))
}

/// Query both devices of `policy`.
pub async fn collect<R: CommandRunner>(
    runner: &R,
    policy: &ShapingPolicy,
) -> TcshapeResult<StatusReport> {
    let mut devices = Vec::with_capacity(2);

    for direction in Direction::ALL {
        let ids = RuleIds::for_direction(direction);
        let device = policy.device_for(direction).to_string();

        let qdiscs = runner.run(&qdisc_show(&device, true)?).await?;
        if !qdiscs.success {
            debug!("Could not query {}: {}", device, qdiscs.stderr);
            devices.push(DeviceStatus {
                direction,
                device,
                active: false,
                qdiscs: String::new(),
                filters: String::new(),
                error: Some(qdiscs.stderr),
                filters_error: None,
            });
            continue;
        }

        let active = root_installed(&qdiscs.stdout, &ids);
        let (filters, filters_error) = if active {
            let output = runner.run(&filter_show(&device, &ids)?).await?;
            if output.success {
                (output.stdout, None)
            } else {
                debug!("Could not query filters of {}: {}", device, output.stderr);
                (String::new(), Some(output.stderr))
            }
        } else {
            (String::new(), None)
        };

        devices.push(DeviceStatus {
            direction,
            device,
            active,
            qdiscs: qdiscs.stdout,
            filters,
            error: None,
            filters_error,
        });
    }

    Ok(StatusReport {
        interface: policy.interface.clone(),
        devices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutput;

    /// Answers qdisc queries with `qdiscs` and fails every filter query
    struct FilterlessRunner {
        qdiscs: &'static str,
    }

    impl CommandRunner for FilterlessRunner {
        async fn run(&self, command: &TcCommand) -> TcshapeResult<CommandOutput> {
            if command.args().iter().any(|arg| arg == "filter") {
                Ok(CommandOutput::failed("RTNETLINK answers: Resource busy"))
            } else {
                Ok(CommandOutput::ok(self.qdiscs))
            }
        }
    }

    const WITH_RATE: &str = "\
qdisc prio 1: root refcnt 2 bands 3 priomap 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
qdisc netem 20: parent 1:3 limit 10000 delay 100ms  10ms 25% rate 1Tbit
";

    const WITHOUT_RATE: &str = "\
qdisc prio 1: root refcnt 2 bands 3 priomap 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
qdisc netem 20: parent 1:3 limit 10000 delay 100ms  10ms 25%
";

    #[test]
    fn test_advisory_when_rate_missing() {
        assert!(reorder_advisory("eth0", WITH_RATE).is_none());
        let warning = reorder_advisory("eth0", WITHOUT_RATE).unwrap();
        assert!(warning.contains("eth0"));
    }

    #[test]
    fn test_no_advisory_without_netem() {
        assert!(reorder_advisory("eth0", "qdisc fq_codel 0: root refcnt 2").is_none());
    }

    #[test]
    fn test_root_detection() {
        let outbound = RuleIds::for_direction(Direction::Outbound);
        let inbound = RuleIds::for_direction(Direction::Inbound);
        assert!(root_installed(WITH_RATE, &outbound));
        assert!(!root_installed(WITH_RATE, &inbound));
        assert!(!root_installed("qdisc noqueue 0: root refcnt 2", &outbound));
    }

    #[test]
    fn test_show_commands() {
        let ids = RuleIds::for_direction(Direction::Inbound);
        assert_eq!(
            qdisc_show("ifb0", true).unwrap().to_string(),
            "tc -s qdisc show dev ifb0"
        );
        assert_eq!(
            filter_show("ifb0", &ids).unwrap().to_string(),
            "tc -s filter show dev ifb0 parent 2:"
        );
    }

    #[tokio::test]
    async fn test_failed_filter_query_is_reported() {
        let runner = FilterlessRunner { qdiscs: WITH_RATE };
        let report = collect(&runner, &ShapingPolicy::default()).await.unwrap();

        let outbound = &report.devices[0];
        assert!(outbound.active);
        assert!(outbound.error.is_none());
        assert_eq!(
            outbound.filters_error.as_deref(),
            Some("RTNETLINK answers: Resource busy")
        );
        assert!(report.to_string().contains("unavailable: RTNETLINK answers: Resource busy"));

        // Inbound root is not installed, so its filters are never queried
        assert!(report.devices[1].filters_error.is_none());
    }
}

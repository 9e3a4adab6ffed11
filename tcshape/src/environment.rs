//! Preconditions checked before touching the platform.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

use tcshape_shared::errors::{TcshapeError, TcshapeResult};

use crate::commands::TcCommand;
use crate::executor::CommandRunner;

/// Offload features that make tbf under-shape: the qdisc sees super-packets.
pub const OFFLOAD_FEATURES: &[&str] = &[
    "tcp-segmentation-offload",
    "generic-segmentation-offload",
    "generic-receive-offload",
];

static FEATURE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([a-z0-9-]+):\s+(on|off)\b").expect("static regex")
});

/// Offload features reported as `on` in `ethtool -k` output.
pub fn enabled_offloads(ethtool_output: &str) -> Vec<String> {
    FEATURE_LINE
        .captures_iter(ethtool_output)
        .filter(|caps| &caps[2] == "on" && OFFLOAD_FEATURES.contains(&&caps[1]))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Refuse bandwidth limiting when segmentation offload is enabled.
///
/// If ethtool itself cannot be run or fails, the check is skipped with a
/// warning rather than blocking the apply.
pub async fn check_offload<R: CommandRunner>(runner: &R, interface: &str) -> TcshapeResult<()> {
    let command = TcCommand::ethtool(["-k", interface]);
    let output = match runner.run(&command).await {
        Ok(output) if output.success => output,
        Ok(output) => {
            warn!(
                "Could not query offload features of {}: {}",
                interface, output.stderr
            );
            return Ok(());
        }
        Err(e) => {
            warn!("Could not run ethtool for {}: {}", interface, e);
            return Ok(());
        }
    };

    let enabled = enabled_offloads(&output.stdout);
    if enabled.is_empty() {
        debug!("No segmentation offload enabled on {}", interface);
        return Ok(());
    }

    Err(TcshapeError::OffloadEnabled {
        interface: interface.to_string(),
        features: enabled.join(", "),
    })
}

/// Modifying qdiscs requires root.
pub fn ensure_privileged(action: &str) -> TcshapeResult<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(TcshapeError::NotPrivileged {
            action: action.to_string(),
        })
    }
}

/// The interface must exist before anything is installed on it.
pub fn ensure_interface_exists(interface: &str) -> TcshapeResult<()> {
    ensure_interface_exists_in(Path::new("/sys/class/net"), interface)
}

fn ensure_interface_exists_in(sysfs_net: &Path, interface: &str) -> TcshapeResult<()> {
    if sysfs_net.join(interface).exists() {
        Ok(())
    } else {
        Err(TcshapeError::InterfaceNotFound {
            interface: interface.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutput;

    const ETHTOOL_K: &str = "\
Features for eth0:
rx-checksumming: on
tx-checksumming: on
tcp-segmentation-offload: on
\ttx-tcp-segmentation: on
generic-segmentation-offload: off
generic-receive-offload: on
large-receive-offload: off [fixed]
";

    struct FixedRunner(CommandOutput);

    impl CommandRunner for FixedRunner {
        async fn run(&self, _command: &TcCommand) -> TcshapeResult<CommandOutput> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_enabled_offloads() {
        assert_eq!(
            enabled_offloads(ETHTOOL_K),
            vec!["tcp-segmentation-offload", "generic-receive-offload"]
        );
        assert!(enabled_offloads("generic-segmentation-offload: off").is_empty());
    }

    #[tokio::test]
    async fn test_offload_check_fails_when_enabled() {
        let runner = FixedRunner(CommandOutput::ok(ETHTOOL_K));
        let err = check_offload(&runner, "eth0").await.unwrap_err();
        assert!(matches!(err, TcshapeError::OffloadEnabled { .. }));
        assert!(err.to_string().contains("tcp-segmentation-offload"));
    }

    #[tokio::test]
    async fn test_offload_check_is_advisory_when_ethtool_fails() {
        let runner = FixedRunner(CommandOutput::failed("Cannot get device feature names"));
        assert!(check_offload(&runner, "eth0").await.is_ok());
    }

    #[test]
    fn test_interface_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("eth7")).unwrap();

        assert!(ensure_interface_exists_in(dir.path(), "eth7").is_ok());
        assert!(matches!(
            ensure_interface_exists_in(dir.path(), "eth8"),
            Err(TcshapeError::InterfaceNotFound { .. })
        ));
    }
}

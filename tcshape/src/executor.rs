//! Runs compiled policies against the platform.
//!
//! [`Shaper`] owns the clear-then-build sequence: environment check, clear
//! whatever is installed, set up inbound mirroring, install both rule sets,
//! then inspect the result for the reorder workaround. Commands are executed
//! through a [`CommandRunner`] so the whole sequence can be exercised without
//! touching the kernel.
//!
//! Failures are not retried and nothing is rolled back: a failed command
//! leaves the partially applied tree in place, and callers are expected to
//! run `clear` before trying again.

use regex::Regex;
use serde::Serialize;
use std::future::Future;
use std::sync::{LazyLock, Mutex};
use tracing::{debug, info, instrument, warn};

use tcshape_shared::errors::{TcshapeError, TcshapeResult};
use tcshape_shared::{CompiledPolicy, RuleSet, ShapingPolicy};

use crate::commands::{TcCommand, TcCommandBuilder, TcOperation, TcTarget};
use crate::compiler::{self, CompilerConfig};
use crate::{environment, mirror, status};

/// stderr of delete commands when there was nothing to delete
static NOTHING_TO_DELETE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(cannot find|no such|handle of zero|invalid handle|does not exist)")
        .expect("static regex")
});

/// stderr of `ip link add` when the device is already there
static ALREADY_EXISTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)file exists").expect("static regex"));

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Executes platform commands.
///
/// A non-zero exit is reported through [`CommandOutput::success`]; an `Err`
/// means the command could not be run at all.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &TcCommand) -> impl Future<Output = TcshapeResult<CommandOutput>> + Send;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, command: &TcCommand) -> TcshapeResult<CommandOutput> {
        debug!("Executing: {}", command);
        let output = command.to_command().output().await?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Records commands instead of running them; every command succeeds.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    commands: Mutex<Vec<TcCommand>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands seen so far, in order
    pub fn commands(&self) -> Vec<TcCommand> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }
}

impl CommandRunner for DryRunRunner {
    async fn run(&self, command: &TcCommand) -> TcshapeResult<CommandOutput> {
        info!("[dry-run] {}", command);
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.clone());
        }
        Ok(CommandOutput::ok(""))
    }
}

/// Outcome of a successful apply.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// What was installed
    pub compiled: CompiledPolicy,
    /// Number of qdisc and filter commands issued for the rule sets
    pub rules_installed: usize,
    /// Non-fatal advisories (e.g. reorder workaround ignored)
    pub warnings: Vec<String>,
}

/// tc commands installing one rule set, qdiscs first.
pub fn rule_set_commands(rules: &RuleSet) -> TcshapeResult<Vec<TcCommand>> {
    let qdiscs = rules.qdiscs.iter().map(TcCommand::from_qdisc);
    let filters = rules.filters.iter().map(TcCommand::from_filter);

    qdiscs
        .chain(filters)
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|e| TcshapeError::invalid_config(e.to_string()))
}

/// Applies, clears and inspects one policy on one interface.
pub struct Shaper<R> {
    runner: R,
    policy: ShapingPolicy,
    config: CompilerConfig,
    check_offload: bool,
}

impl<R: CommandRunner> Shaper<R> {
    pub fn new(runner: R, policy: ShapingPolicy, config: CompilerConfig) -> Self {
        Self {
            runner,
            policy,
            config,
            check_offload: true,
        }
    }

    /// Do not refuse to apply when segmentation offload is enabled
    pub fn skip_offload_check(mut self) -> Self {
        self.check_offload = false;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Compile without touching the platform
    pub fn plan(&self) -> CompiledPolicy {
        compiler::compile(&self.policy, &self.config)
    }

    /// Replace whatever is installed with this policy.
    #[instrument(skip(self), fields(interface = %self.policy.interface))]
    pub async fn apply(&self) -> TcshapeResult<ApplyReport> {
        if self.check_offload && self.policy.shaping.bandwidth_limit.is_some() {
            environment::check_offload(&self.runner, &self.policy.interface).await?;
        }

        let compiled = self.plan();
        let rule_commands = compiled
            .rule_sets()
            .into_iter()
            .map(rule_set_commands)
            .collect::<TcshapeResult<Vec<_>>>()?;

        self.clear().await?;
        self.setup_mirror().await?;

        let mut rules_installed = 0;
        for commands in &rule_commands {
            for command in commands {
                self.run_checked(command).await?;
                rules_installed += 1;
            }
        }
        info!(
            "Installed {} rules on {} and {}",
            rules_installed, self.policy.interface, self.policy.mirror_device
        );

        let warnings = if self.policy.shaping.injects_reorder_workaround() {
            self.reorder_advisories(&compiled).await
        } else {
            Vec::new()
        };

        Ok(ApplyReport {
            compiled,
            rules_installed,
            warnings,
        })
    }

    /// Remove every qdisc this tool installs, plus the mirror.
    #[instrument(skip(self), fields(interface = %self.policy.interface))]
    pub async fn clear(&self) -> TcshapeResult<()> {
        for device in [&self.policy.interface, &self.policy.mirror_device] {
            let command = TcCommandBuilder::qdisc()
                .operation(TcOperation::Delete)
                .device(device.as_str())
                .target(TcTarget::Root)
                .build()
                .map_err(|e| TcshapeError::invalid_config(e.to_string()))?;
            self.run_tolerant(&command, &NOTHING_TO_DELETE).await?;
        }

        let teardown = mirror::teardown_commands(&self.policy.interface, &self.policy.mirror_device)
            .map_err(|e| TcshapeError::invalid_config(e.to_string()))?;
        for command in &teardown {
            self.run_tolerant(command, &NOTHING_TO_DELETE).await?;
        }

        info!("Cleared traffic shaping on {}", self.policy.interface);
        Ok(())
    }

    /// Report what is currently installed on both devices.
    pub async fn status(&self) -> TcshapeResult<status::StatusReport> {
        status::collect(&self.runner, &self.policy).await
    }

    async fn setup_mirror(&self) -> TcshapeResult<()> {
        let device = &self.policy.mirror_device;
        self.run_tolerant(&mirror::create_device(device), &ALREADY_EXISTS)
            .await?;

        let setup = mirror::setup_commands(&self.policy.interface, device)
            .map_err(|e| TcshapeError::invalid_config(e.to_string()))?;
        for command in &setup {
            self.run_checked(command).await?;
        }
        debug!("Mirroring ingress of {} to {}", self.policy.interface, device);
        Ok(())
    }

    /// Inspect the installed netem qdiscs; never fails once rules are in.
    async fn reorder_advisories(&self, compiled: &CompiledPolicy) -> Vec<String> {
        let mut warnings = Vec::new();
        for rules in compiled.rule_sets() {
            let queried = match status::qdisc_show(&rules.device, false) {
                Ok(command) => self.runner.run(&command).await,
                Err(e) => Err(e),
            };
            let warning = match queried {
                Ok(output) if output.success => {
                    status::reorder_advisory(&rules.device, &output.stdout)
                }
                Ok(output) => Some(format!(
                    "could not verify reorder workaround on {}: {}",
                    rules.device, output.stderr
                )),
                Err(e) => Some(format!(
                    "could not verify reorder workaround on {}: {}",
                    rules.device, e
                )),
            };
            if let Some(warning) = warning {
                warn!("{}", warning);
                warnings.push(warning);
            }
        }
        warnings
    }

    /// Run a command; any failure is an error.
    async fn run_checked(&self, command: &TcCommand) -> TcshapeResult<CommandOutput> {
        let output = self.runner.run(command).await?;
        if !output.success {
            return Err(TcshapeError::CommandFailed {
                command: command.to_string(),
                message: output.stderr,
            });
        }
        Ok(output)
    }

    /// Run a command, ignoring failures whose stderr matches `tolerated`.
    async fn run_tolerant(
        &self,
        command: &TcCommand,
        tolerated: &Regex,
    ) -> TcshapeResult<CommandOutput> {
        let output = self.runner.run(command).await?;
        if !output.success {
            if tolerated.is_match(&output.stderr) {
                debug!("Ignoring failure of `{}`: {}", command, output.stderr);
            } else {
                return Err(TcshapeError::CommandFailed {
                    command: command.to_string(),
                    message: output.stderr,
                });
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcshape_shared::{RawParams, Selector, ShapingSpec};

    fn policy() -> ShapingPolicy {
        ShapingPolicy {
            shaping: ShapingSpec {
                bandwidth_limit: None,
                impairment: RawParams::new("delay 100ms 10ms"),
                reorder_on_jitter: true,
            },
            to: Selector::parse("*:443"),
            ..Default::default()
        }
    }

    #[test]
    fn test_rule_set_commands_put_qdiscs_first() {
        let compiled = compiler::compile(&policy(), &CompilerConfig::default());
        let commands = rule_set_commands(&compiled.outbound).unwrap();

        assert_eq!(commands.len(), 2 + 3);
        assert!(commands[0].args().starts_with(&["qdisc".to_string()]));
        assert!(commands[1].args().starts_with(&["qdisc".to_string()]));
        assert!(commands[2..].iter().all(|c| c.args()[0] == "filter"));
    }

    #[tokio::test]
    async fn test_dry_run_records_full_sequence() {
        let shaper = Shaper::new(DryRunRunner::new(), policy(), CompilerConfig::default());
        let report = shaper.apply().await.unwrap();

        assert_eq!(report.rules_installed, 10);
        assert!(report.warnings.is_empty());

        let rendered: Vec<String> = shaper
            .runner()
            .commands()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(rendered[0], "tc qdisc del dev eth0 root");
        assert!(rendered.contains(&"ip link add ifb0 type ifb".to_string()));
        assert_eq!(
            rendered.last().map(String::as_str),
            Some("tc filter add dev ifb0 parent 2: protocol ip prio 2 u32 match ip dst 0.0.0.0/0 match ip dport 443 0xffff flowid 2:3")
        );
    }
}

//! Application configuration for tcshape.
//!
//! Folds defaults, an optional profile and command line flags (in that order
//! of precedence) into one immutable [`AppConfig`] that is threaded through
//! the rest of the program.

use anyhow::Result;
use std::env;

use tcshape_shared::{RawParams, Selector, ShapingPolicy};

use super::cli::{Action, CliConfig, parse_port_list};
use super::profile_loader::ProfileLoader;
use crate::compiler::CompilerConfig;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing level
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub action: Action,
    pub policy: ShapingPolicy,
    pub compiler: CompilerConfig,
    pub log_level: LogLevel,
    pub dry_run: bool,
    pub json: bool,
    pub check_offload: bool,
}

impl AppConfig {
    /// Create application configuration from CLI config, loading the
    /// referenced profile from the default directories.
    pub fn from_cli(cli_config: &CliConfig) -> Result<Self> {
        Self::from_cli_with_loader(cli_config, &ProfileLoader::new())
    }

    /// Same as [`AppConfig::from_cli`] with an explicit profile loader.
    pub fn from_cli_with_loader(cli_config: &CliConfig, loader: &ProfileLoader) -> Result<Self> {
        let log_level = if cli_config.verbose {
            LogLevel::Debug
        } else {
            match env::var("RUST_LOG") {
                Ok(level_str) => Self::parse_log_level(&level_str),
                Err(_) => LogLevel::Info,
            }
        };

        let mut policy = ShapingPolicy::default();
        if let Some(ref reference) = cli_config.profile {
            loader.load(reference)?.apply_to(&mut policy);
        }
        Self::apply_cli_overrides(cli_config, &mut policy)?;

        let mut compiler = CompilerConfig::default();
        if let Some(buffer_size) = cli_config.buffer_size {
            compiler.buffer_size = buffer_size;
        }

        Ok(Self {
            action: cli_config.action,
            policy,
            compiler,
            log_level,
            dry_run: cli_config.dry_run,
            json: cli_config.json,
            check_offload: !cli_config.skip_offload_check,
        })
    }

    fn apply_cli_overrides(cli: &CliConfig, policy: &mut ShapingPolicy) -> Result<()> {
        if let Some(ref interface) = cli.interface {
            policy.interface = interface.clone();
        }
        if let Some(ref mirror_device) = cli.mirror_device {
            policy.mirror_device = mirror_device.clone();
        }
        if let Some(ref bandwidth) = cli.bandwidth {
            policy.shaping.bandwidth_limit = RawParams::new(bandwidth.as_str());
        }
        if let Some(ref impairment) = cli.impairment {
            policy.shaping.impairment = RawParams::new(impairment.as_str());
        }
        if let Some(ref from) = cli.from {
            policy.from = Selector::parse(from);
        }
        if let Some(ref to) = cli.to {
            policy.to = Selector::parse(to);
        }
        if let Some(ref exclude) = cli.exclude {
            policy.exclude_ports = parse_port_list(exclude)?;
        }
        if cli.reorder {
            policy.shaping.reorder_on_jitter = true;
        }
        Ok(())
    }

    /// Parse log level from string
    fn parse_log_level(level_str: &str) -> LogLevel {
        // Extract the main level from complex RUST_LOG format
        let main_level = level_str
            .split(',')
            .next()
            .unwrap_or(level_str)
            .split('=')
            .next()
            .unwrap_or(level_str)
            .to_lowercase();

        match main_level.as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> Result<()> {
        // Logs go to stderr so that --json output stays parseable
        tracing_subscriber::fmt()
            .with_max_level(self.log_level.to_tracing_level())
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true)
            .event_format(
                tracing_subscriber::fmt::format()
                    .with_target(false)
                    .compact(),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

        tracing::debug!("Logging initialized with level: {:?}", self.log_level);
        Ok(())
    }

    /// Validate application configuration
    pub fn validate(&self) -> Result<()> {
        if self.policy.interface.is_empty() {
            return Err(anyhow::anyhow!("Interface name cannot be empty"));
        }

        if self.policy.mirror_device.is_empty() {
            return Err(anyhow::anyhow!("ifb device name cannot be empty"));
        }

        if self.policy.mirror_device == self.policy.interface {
            return Err(anyhow::anyhow!(
                "ifb device must differ from the shaped interface '{}'",
                self.policy.interface
            ));
        }

        if self.compiler.buffer_size == 0 {
            return Err(anyhow::anyhow!("Buffer size must be greater than 0"));
        }

        if self.action == Action::Apply && self.policy.shaping.is_empty() {
            return Err(anyhow::anyhow!(
                "Nothing to apply: give a bandwidth limit (-b) and/or an impairment (-e)"
            ));
        }

        Ok(())
    }
}

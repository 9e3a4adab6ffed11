use anyhow::Result;
use serde_json::{Value, json};
use tracing::{info, warn};

use tcshape::config::{Action, AppConfig, CliConfig};
use tcshape::environment;
use tcshape::executor::{CommandRunner, DryRunRunner, Shaper, SystemRunner};

/// Result of one action, in both output forms
struct Outcome {
    json: Value,
    text: String,
}

/// Run the requested action.
async fn run<R: CommandRunner>(shaper: &Shaper<R>, config: &AppConfig) -> Result<Outcome> {
    let interface = &config.policy.interface;
    let outcome = match config.action {
        Action::Apply => {
            let report = shaper.apply().await?;
            let mut text = format!(
                "Shaping applied on {} ({} rules)\n",
                interface, report.rules_installed
            );
            for warning in &report.warnings {
                text.push_str(&format!("warning: {}\n", warning));
            }
            Outcome {
                json: serde_json::to_value(&report)?,
                text,
            }
        }
        Action::Status => {
            let report = shaper.status().await?;
            Outcome {
                json: serde_json::to_value(&report)?,
                text: report.to_string(),
            }
        }
        Action::Clear => {
            shaper.clear().await?;
            Outcome {
                json: json!({ "cleared": interface }),
                text: format!("Shaping cleared on {}\n", interface),
            }
        }
    };
    Ok(outcome)
}

/// Single JSON document for a dry run: the result plus the commands it would run.
fn dry_run_document(result: Value, commands: &[String]) -> Value {
    json!({ "result": result, "commands": commands })
}

fn shaper_for<R: CommandRunner>(runner: R, config: &AppConfig) -> Shaper<R> {
    let shaper = Shaper::new(runner, config.policy.clone(), config.compiler.clone());
    if config.check_offload {
        shaper
    } else {
        shaper.skip_offload_check()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_config = CliConfig::from_args()?;
    let config = AppConfig::from_cli(&cli_config)?;

    config.init_logging()?;
    config.validate()?;

    info!(
        "{} on {} (inbound via {})",
        config.action, config.policy.interface, config.policy.mirror_device
    );

    if config.dry_run {
        let shaper = shaper_for(DryRunRunner::new(), &config);
        let outcome = run(&shaper, &config).await?;

        let commands: Vec<String> = shaper
            .runner()
            .commands()
            .iter()
            .map(ToString::to_string)
            .collect();
        if config.json {
            let document = dry_run_document(outcome.json, &commands);
            println!("{}", serde_json::to_string_pretty(&document)?);
        } else {
            print!("{}", outcome.text);
            println!();
            for command in &commands {
                println!("{}", command);
            }
        }
        return Ok(());
    }

    if config.action != Action::Status {
        environment::ensure_privileged(&config.action.to_string())?;
        environment::ensure_interface_exists(&config.policy.interface)?;
    } else if environment::ensure_interface_exists(&config.policy.interface).is_err() {
        warn!("Interface {} does not exist", config.policy.interface);
    }

    let shaper = shaper_for(SystemRunner, &config);
    let outcome = run(&shaper, &config).await?;
    if config.json {
        println!("{}", serde_json::to_string_pretty(&outcome.json)?);
    } else {
        print!("{}", outcome.text);
    }
    Ok(())
}

// harness-cli/src/main.rs
// agent-loadtest - lifecycle and load test runner for the agent binary

use agent_harness::observability::{init_tracing, LogFormat};
use agent_harness::{HarnessConfig, ScenarioKind, ScenarioRunner, Suite};
use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::Path;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod console;

fn cli() -> Command {
    Command::new("agent-loadtest")
        .version(env!("CARGO_PKG_VERSION"))
        .author("SentinelEdge Team")
        .about("Lifecycle and load test harness for the agent binary")
        .arg(
            Arg::new("agent-binary")
                .help("Path to the agent binary under test")
                .required_unless_present("dump-config"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Agent configuration file to use instead of a generated test config"),
        )
        .arg(
            Arg::new("harness-config")
                .long("harness-config")
                .help("Harness configuration file (TOML)"),
        )
        .arg(
            Arg::new("suite")
                .short('s')
                .long("suite")
                .help("Scenario suite: lifecycle, performance or full")
                .default_value("full"),
        )
        .arg(
            Arg::new("scenario")
                .long("scenario")
                .help("Run only the named scenario (repeatable)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Write the JSON report to this file"),
        )
        .arg(
            Arg::new("duration")
                .long("duration")
                .help("Memory soak duration in minutes")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .help("Seed for the simulated workload")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .help("Log output format: text or json")
                .default_value("text"),
        )
        .arg(
            Arg::new("dump-config")
                .long("dump-config")
                .help("Print the effective harness configuration as TOML and exit")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let log_format: LogFormat = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or("text")
        .parse()?;
    init_tracing(log_format, "info")?;

    let harness_config = matches.get_one::<String>("harness-config").map(Path::new);
    let mut config =
        HarnessConfig::load(harness_config).context("failed to load harness configuration")?;
    if let Some(minutes) = matches.get_one::<u64>("duration") {
        config = config.with_soak_minutes(*minutes);
    }
    if let Some(seed) = matches.get_one::<u64>("seed") {
        config.workload.seed = Some(*seed);
    }
    config
        .validate()
        .into_result()
        .context("invalid harness configuration")?;

    if matches.get_flag("dump-config") {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let binary = matches
        .get_one::<String>("agent-binary")
        .context("agent binary path is required")?;
    if !Path::new(binary).exists() {
        warn!("⚠️  Agent binary not found: {}", binary);
    }

    let scenarios = matches
        .get_many::<String>("scenario")
        .map(|names| names.map(|n| n.parse::<ScenarioKind>()).collect::<Result<Vec<_>, _>>())
        .transpose()?
        .unwrap_or_default();
    let suite = if scenarios.is_empty() {
        matches
            .get_one::<String>("suite")
            .map(String::as_str)
            .unwrap_or("full")
            .parse::<Suite>()?
    } else {
        Suite::Custom
    };

    // Ctrl-C stops the run between scenarios; cleanup still happens
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, stopping after the current scenario");
            interrupt.cancel();
        }
    });

    console::print_banner(suite, binary);

    let mut runner = ScenarioRunner::new(binary, config)
        .with_cancellation(cancel)
        .with_observer(console::print_record);
    if let Some(agent_config) = matches.get_one::<String>("config") {
        runner = runner.with_agent_config(agent_config);
    }

    let report = if scenarios.is_empty() {
        runner.run(suite).await
    } else {
        runner.run_scenarios(suite, &scenarios).await
    }
    .context("harness run failed")?;

    console::print_summary(&report);

    if let Some(output) = matches.get_one::<String>("output") {
        report
            .write_json(Path::new(output))
            .with_context(|| format!("failed to write report to {}", output))?;
        println!("📄 Report saved to: {}", output);
    }

    info!("Exiting with code {}", report.exit_code());
    std::process::exit(report.exit_code());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_repeated_scenarios() {
        let matches = cli()
            .try_get_matches_from([
                "agent-loadtest",
                "/usr/bin/agent",
                "--scenario",
                "memory-soak",
                "--scenario",
                "Stress Burst",
                "--seed",
                "42",
            ])
            .unwrap();

        let names: Vec<&String> = matches.get_many::<String>("scenario").unwrap().collect();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].parse::<ScenarioKind>().unwrap(), ScenarioKind::MemorySoak);
        assert_eq!(matches.get_one::<u64>("seed"), Some(&42));
        assert_eq!(matches.get_one::<String>("suite").unwrap(), "full");
    }

    #[test]
    fn test_binary_optional_when_dumping_config() {
        assert!(cli().try_get_matches_from(["agent-loadtest"]).is_err());
        assert!(cli()
            .try_get_matches_from(["agent-loadtest", "--dump-config"])
            .is_ok());
    }

    #[test]
    fn test_default_config_dumps_as_toml() {
        let text = toml::to_string_pretty(&HarnessConfig::default()).unwrap();
        assert!(text.contains("[sampling]"));
        assert!(text.contains("interval_ms = 1000"));
    }
}

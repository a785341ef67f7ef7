use murk_core::config::{MurkConfig, TargetSettings};
use murk_core::engine::{FuzzSession, Fuzzer, StopHandle};
use murk_core::executor::CommandExecutor;
use murk_core::monitor::CrashStore;
use murk_core::stats::RunSummary;
use murk_core::store::CoverageStore;

use clap::Parser;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::thread;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Target command line, split on whitespace. Replaces the configured command.
    #[clap(long)]
    target_command: Option<String>,
    #[clap(short, long)]
    iterations: Option<u64>,
    /// Seed directory.
    #[clap(long)]
    seeds: Option<PathBuf>,
    /// Crash output directory.
    #[clap(long)]
    crashes: Option<PathBuf>,
    #[clap(long)]
    no_dictionary: bool,
    /// Seed for the random stream, for reproducible runs.
    #[clap(long)]
    seed: Option<u64>,
    #[clap(short, long)]
    workers: Option<usize>,
    #[clap(long)]
    status_interval: Option<u64>,
    /// Print the effective configuration and exit.
    #[clap(long)]
    dry_run: bool,
}

const DEFAULT_CONFIG_FILE: &str = "murk.toml";

fn load_config(config_file: Option<&Path>) -> Result<MurkConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            MurkConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!("No config file specified via CLI, loading default: {default_config_path:?}");
                MurkConfig::load_from_file(&default_config_path)
            } else {
                info!("No '{DEFAULT_CONFIG_FILE}' found, using built-in defaults.");
                Ok(MurkConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut MurkConfig, cli: &Cli) {
    if let Some(iterations) = cli.iterations {
        config.fuzzer.max_iterations = iterations;
    }
    if let Some(seed) = cli.seed {
        config.fuzzer.seed = Some(seed);
    }
    if let Some(workers) = cli.workers {
        config.fuzzer.workers = workers;
    }
    if let Some(interval) = cli.status_interval {
        config.fuzzer.status_interval = interval;
    }
    if let Some(seeds) = &cli.seeds {
        config.corpus.seed_dir = seeds.clone();
    }
    if let Some(crashes) = &cli.crashes {
        config.corpus.crash_dir = crashes.clone();
    }
    if cli.no_dictionary {
        config.mutator.use_dictionary = false;
    }
    if let Some(target_cmd_str) = &cli.target_command {
        let command: Vec<String> = target_cmd_str.split_whitespace().map(str::to_string).collect();
        match config.target.as_mut() {
            Some(target) => target.command = command,
            None => config.target = Some(TargetSettings::from_command(command)),
        }
    }
}

/// Waits for Ctrl-C on a helper thread and trips `stop` when it arrives.
fn install_interrupt_handler(stop: StopHandle) -> Result<(), anyhow::Error> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::Builder::new()
        .name("murk-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        warn!("Interrupt received, stopping after the in-flight execution");
                        stop.stop();
                    }
                    Err(e) => error!("Failed to listen for Ctrl-C: {e}"),
                }
            });
        })?;
    Ok(())
}

/// Text printed to stdout once the run ends.
fn final_report(summary: &RunSummary, crash_dir: &Path) -> String {
    let mut report = summary.to_string();
    if summary.unique_crashes > 0 {
        report.push_str(&format!(
            "\n{} unique crash(es) saved to {crash_dir:?}",
            summary.unique_crashes
        ));
    }
    report
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = load_config(cli.config_file.as_deref())?;
    apply_overrides(&mut config, &cli);

    if cli.dry_run {
        println!("Effective configuration: {config:#?}");
        return Ok(());
    }
    debug!("Effective configuration: {config:#?}");

    let target = config.target.as_ref().ok_or_else(|| {
        anyhow::anyhow!("No target configured: add a [target] section or pass --target-command")
    })?;
    if target.command.is_empty() {
        anyhow::bail!("Target command is empty");
    }
    let exec_config = target.executor_config();

    let options = config.fuzzer_options();
    let crashes = CrashStore::new(&config.corpus.crash_dir)?;
    let store = CoverageStore::load(&config.corpus.seed_dir);
    let mut session = FuzzSession::new(store, crashes);

    let fuzzer = Fuzzer::new(config.mutator.build(), options.clone());
    install_interrupt_handler(fuzzer.stop_handle())?;

    let summary = if options.workers > 1 {
        fuzzer.run_parallel(&mut session, options.workers, |_worker| {
            CommandExecutor::new(exec_config.clone())
        })
    } else {
        let mut executor = CommandExecutor::new(exec_config);
        fuzzer.run(&mut session, &mut executor)
    };

    println!("{}", final_report(&summary, session.crashes.dir()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use murk_core::config::ConfigInputDelivery;
    use murk_core::stats::StopReason;
    use std::time::Duration;

    fn summary_with_crashes(unique_crashes: u64) -> RunSummary {
        RunSummary {
            total_executions: 40,
            unique_crashes,
            unique_paths: 3,
            corpus_len: 4,
            runtime: Duration::from_millis(1500),
            reason: StopReason::Interrupted,
        }
    }

    #[test]
    fn cli_overrides_replace_config_values() {
        let cli = Cli::try_parse_from([
            "murk",
            "--iterations",
            "25",
            "--seeds",
            "corpus/in",
            "--crashes",
            "corpus/out",
            "--no-dictionary",
            "--seed",
            "42",
            "--workers",
            "3",
            "--status-interval",
            "5",
            "--target-command",
            "./target --parse",
        ])
        .unwrap();
        let mut config = MurkConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.fuzzer.max_iterations, 25);
        assert_eq!(config.fuzzer.seed, Some(42));
        assert_eq!(config.fuzzer.workers, 3);
        assert_eq!(config.fuzzer.status_interval, 5);
        assert_eq!(config.corpus.seed_dir, PathBuf::from("corpus/in"));
        assert_eq!(config.corpus.crash_dir, PathBuf::from("corpus/out"));
        assert!(!config.mutator.use_dictionary);
        let target = config.target.unwrap();
        assert_eq!(target.command, vec!["./target", "--parse"]);
        assert_eq!(target.input_delivery, ConfigInputDelivery::StdIn);
    }

    #[test]
    fn target_command_keeps_configured_delivery() {
        let mut config = MurkConfig::from_toml_str(
            r#"
            [target]
            command = ["old"]
            input-delivery = { file = { template = "{}" } }
            timeout-ms = 100
            "#,
        )
        .unwrap();
        let cli = Cli::try_parse_from(["murk", "--target-command", "new-target"]).unwrap();
        apply_overrides(&mut config, &cli);

        let target = config.target.unwrap();
        assert_eq!(target.command, vec!["new-target"]);
        assert_eq!(target.timeout_ms, 100);
        assert!(matches!(target.input_delivery, ConfigInputDelivery::File { .. }));
    }

    #[test]
    fn no_flags_leave_config_untouched() {
        let cli = Cli::try_parse_from(["murk"]).unwrap();
        let mut config = MurkConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.fuzzer.max_iterations, 10_000);
        assert!(config.mutator.use_dictionary);
        assert!(config.target.is_none());
        assert!(!cli.dry_run);
    }

    #[test]
    fn final_report_includes_summary_totals() {
        let report = final_report(&summary_with_crashes(0), Path::new("crashes"));
        assert!(report.starts_with("Fuzzing complete (interrupted)"));
        assert!(report.contains("Total executions:  40"));
        assert!(report.contains("Final corpus size: 4"));
        assert!(!report.contains("saved to"));
    }

    #[test]
    fn final_report_points_at_crash_dir() {
        let report = final_report(&summary_with_crashes(2), Path::new("out/crashes"));
        assert!(report.contains("Unique crashes:    2"));
        assert!(report.ends_with("2 unique crash(es) saved to \"out/crashes\""));
    }
}

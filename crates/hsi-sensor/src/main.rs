//! HSI Sensor - HTTP stream inspection
//!
//! Runs reassembled HTTP/1.x traffic through the section inspector and
//! reports protocol anomalies.

mod flow_table;
mod replay;
mod workers;

use clap::{Parser, Subcommand};
use hsi_core::config::{ConfigLoader, HsiConfig};
use hsi_core::{create_metrics, TestInput};
use hsi_export::{EventExporter, JsonlExporter, JsonlExporterConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use workers::{WorkerConfig, WorkerPool};

#[derive(Parser)]
#[command(name = "hsi-sensor")]
#[command(version)]
#[command(about = "HTTP stream inspection sensor", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "HSI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded test traffic through the inspector
    Replay {
        /// Test input script
        input: PathBuf,

        /// Write each section's dump to a per-test-case file
        #[arg(long)]
        test_output: bool,

        /// Prefix of the per-test-case files
        #[arg(long)]
        output_prefix: Option<String>,

        /// Export anomaly events as JSONL to this file
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Worker tasks (forced to 1 with --test-output)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Print metrics in Prometheus format when done
        #[arg(long)]
        metrics: bool,
    },

    /// Print the effective configuration
    Config,

    /// Show sensor status and capabilities
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration file
    let config = load_config(cli.config.clone());

    // Setup logging - CLI verbose flag takes precedence, then config, then default
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config.sensor.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Replay {
            input,
            test_output,
            output_prefix,
            export,
            workers,
            metrics,
        } => {
            let options = merge_replay_options(&config, test_output, output_prefix, export, workers);
            replay_command(&config, &input, options, metrics).await
        }
        Commands::Config => config_command(&config, cli.config),
        Commands::Status => status_command(&config).await,
    }
}

/// Load configuration from file/env, with fallback to defaults
fn load_config(cli_path: Option<PathBuf>) -> HsiConfig {
    let loader = ConfigLoader::new().with_cli_path(cli_path);
    match loader.load() {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            warn!("Failed to load configuration: {}, using defaults", e);
            HsiConfig::default()
        }
    }
}

/// Replay settings after CLI arguments override the config file
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplayOptions {
    test_output: Option<String>,
    export: Option<PathBuf>,
    workers: usize,
}

fn merge_replay_options(
    config: &HsiConfig,
    test_output: bool,
    output_prefix: Option<String>,
    export: Option<PathBuf>,
    workers: Option<usize>,
) -> ReplayOptions {
    let test_output = (test_output || config.test.output)
        .then(|| output_prefix.unwrap_or_else(|| config.test.output_prefix.clone()));
    let export = export.or_else(|| {
        config
            .export
            .jsonl
            .enabled
            .then(|| PathBuf::from(&config.export.jsonl.path))
    });
    // Per-test-case files are written by one inspector in input order
    let workers = if test_output.is_some() {
        1
    } else {
        workers.unwrap_or(config.sensor.workers)
    };

    ReplayOptions {
        test_output,
        export,
        workers,
    }
}

async fn replay_command(
    config: &HsiConfig,
    input: &PathBuf,
    options: ReplayOptions,
    print_metrics: bool,
) -> anyhow::Result<()> {
    let script = TestInput::from_file(input)?;
    info!(input = %input.display(), steps = script.steps().len(), "Replaying test input");

    let exporter: Option<Arc<dyn EventExporter>> = match &options.export {
        Some(path) => {
            let mut exporter_config = JsonlExporterConfig::from(&config.export.jsonl);
            exporter_config.path = path.clone();
            Some(Arc::new(JsonlExporter::open(exporter_config)?))
        }
        None => None,
    };

    let metrics = create_metrics();
    let pool = WorkerPool::spawn(
        WorkerConfig {
            workers: options.workers,
            settings: config.inspect.clone(),
            test_output: options.test_output.clone(),
            ..Default::default()
        },
        metrics.clone(),
        exporter,
    );

    info!(workers = pool.workers(), "Submitting test input");
    let stats = replay::replay(script, &pool).await?;
    let report = pool.shutdown().await?;

    println!();
    println!("Replay of {}", input.display());
    println!("  Test cases: {}", stats.tests);
    println!(
        "  Chunks:     {} submitted, {} inspected ({} octets)",
        stats.chunks, report.chunks, stats.octets
    );
    println!("  Events:     {}", report.events);
    if options.export.is_some() {
        println!("  Exported:   {}", report.events_exported);
    }
    if report.flows_failed > 0 {
        println!("  Failed:     {}", report.flows_failed);
    }
    println!();

    if print_metrics {
        print!("{}", metrics.to_prometheus());
    }

    Ok(())
}

fn config_command(config: &HsiConfig, cli_path: Option<PathBuf>) -> anyhow::Result<()> {
    let loader = ConfigLoader::new().with_cli_path(cli_path);
    loader.validate(config)?;
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn status_command(config: &HsiConfig) -> anyhow::Result<()> {
    println!();
    println!("HSI Sensor v{}", hsi_core::SENSOR_VERSION);
    println!();

    // Platform
    println!(
        "Platform: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    match ConfigLoader::default_config_path() {
        Some(path) if path.exists() => println!("Config file: {}", path.display()),
        Some(path) => println!("Config file: {} (not present)", path.display()),
        None => println!("Config file: none"),
    }
    println!("Workers: {}", config.sensor.workers);
    println!(
        "Limits: {} headers, {} pipelined requests",
        config.inspect.max_headers, config.inspect.max_pipeline_depth
    );

    #[cfg(target_os = "linux")]
    {
        // Check if running as root
        let uid = unsafe { libc::getuid() };
        println!("Running as root: {}", uid == 0);
    }

    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_cli_overrides_config() {
        let mut config = HsiConfig::default();
        config.sensor.workers = 8;
        config.export.jsonl.enabled = true;
        config.export.jsonl.path = "/tmp/from-config.jsonl".to_string();

        let options = merge_replay_options(&config, false, None, None, None);
        assert_eq!(options.workers, 8);
        assert_eq!(options.test_output, None);
        assert_eq!(options.export, Some(PathBuf::from("/tmp/from-config.jsonl")));

        let options = merge_replay_options(
            &config,
            true,
            Some("out_".to_string()),
            Some(PathBuf::from("/tmp/cli.jsonl")),
            Some(3),
        );
        assert_eq!(options.workers, 1);
        assert_eq!(options.test_output.as_deref(), Some("out_"));
        assert_eq!(options.export, Some(PathBuf::from("/tmp/cli.jsonl")));
    }

    #[test]
    fn test_test_output_from_config() {
        let mut config = HsiConfig::default();
        config.test.output = true;
        let options = merge_replay_options(&config, false, None, None, Some(6));
        assert_eq!(options.test_output.as_deref(), Some("nhttp_out_"));
        assert_eq!(options.workers, 1);
    }
}

//! CLI for the hbtree heartbeat library.
//!
//! Runs an instrumented demo pipeline, inspects heartbeat logs, and
//! benchmarks registration.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use hbtree::{
    EnergyBackend, FnBackend, Heartbeat, HeartbeatBuilder, HeartbeatConfig, LogFormat,
    RaplBackend, Record,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// hbtree - Heartbeat instrumentation for applications and pipelines.
#[derive(Parser)]
#[command(name = "hbtree", version, about)]
struct Cli {
    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a receive/work/send pipeline instrumented with a heartbeat tree.
    Pipeline {
        /// Number of pipeline iterations.
        iterations: u64,

        /// Directory for the per-node heartbeat logs.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Node configuration file (JSON); overrides --window and --depth.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Heartbeats covered by window metrics.
        #[arg(long, default_value = "20")]
        window: usize,

        /// Records retained per node.
        #[arg(long, default_value = "20")]
        depth: usize,

        /// Simulated time spent in each stage, in milliseconds.
        #[arg(long, default_value = "100")]
        stage_ms: u64,

        /// Where energy readings come from.
        #[arg(long, default_value = "simulated")]
        energy: EnergySource,

        /// Log line format.
        #[arg(long, default_value = "text")]
        log_format: LogFileFormat,
    },

    /// Summarize a heartbeat log.
    Inspect {
        /// Path to the log file.
        log_path: PathBuf,

        /// Format of the log file.
        #[arg(long, default_value = "text")]
        log_format: LogFileFormat,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a registration microbenchmark.
    Bench {
        /// Number of heartbeats to register.
        #[arg(long, default_value = "10000000")]
        beats: u64,

        /// Window size of the benchmarked node.
        #[arg(long, default_value = "20")]
        window: usize,
    },
}

/// Energy source for the pipeline.
#[derive(Clone, Copy, ValueEnum)]
enum EnergySource {
    /// Counter that grows by 1 000 000 units per reading.
    Simulated,
    /// Linux powercap RAPL package counter.
    Rapl,
    /// No energy readings.
    None,
}

/// Heartbeat log format.
#[derive(Clone, Copy, ValueEnum)]
enum LogFileFormat {
    /// Tab-separated text with a header line.
    Text,
    /// One JSON object per line.
    JsonLines,
}

impl From<LogFileFormat> for LogFormat {
    fn from(format: LogFileFormat) -> Self {
        match format {
            LogFileFormat::Text => LogFormat::Text,
            LogFileFormat::JsonLines => LogFormat::JsonLines,
        }
    }
}

/// Output format for summaries.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable text.
    Text,
    /// JSON object.
    Json,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Pipeline {
            iterations,
            output_dir,
            config,
            window,
            depth,
            stage_ms,
            energy,
            log_format,
        } => cmd_pipeline(&PipelineArgs {
            iterations,
            output_dir,
            config,
            window,
            depth,
            stage_delay: Duration::from_millis(stage_ms),
            energy,
            log_format: log_format.into(),
        }),
        Commands::Inspect {
            log_path,
            log_format,
            format,
        } => cmd_inspect(&log_path, log_format.into(), &format),
        Commands::Bench { beats, window } => cmd_bench(beats, window),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

struct PipelineArgs {
    iterations: u64,
    output_dir: PathBuf,
    config: Option<PathBuf>,
    window: usize,
    depth: usize,
    stage_delay: Duration,
    energy: EnergySource,
    log_format: LogFormat,
}

/// Implements `hbtree pipeline <iterations>`.
fn cmd_pipeline(args: &PipelineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let base = match &args.config {
        Some(path) => HeartbeatConfig::load(path)?,
        None => HeartbeatConfig::new(args.window, args.depth)?,
    };
    std::fs::create_dir_all(&args.output_dir)?;

    let extension = match args.log_format {
        LogFormat::Text => "log",
        LogFormat::JsonLines => "jsonl",
    };
    let node_config = |name: &str| {
        base.clone().with_log(
            args.output_dir.join(format!("{name}.{extension}")),
            args.log_format,
        )
    };

    let mut iteration = HeartbeatBuilder::new(node_config("heartbeat"))
        .energy_backends(energy_backends(args.energy))
        .build()?;
    let mut recv = HeartbeatBuilder::new(node_config("heartbeat_recv")).build_child(&iteration)?;
    let mut work = HeartbeatBuilder::new(node_config("heartbeat_work")).build_child(&iteration)?;
    let mut send = HeartbeatBuilder::new(node_config("heartbeat_send")).build_child(&iteration)?;

    info!(
        iterations = args.iterations,
        sources = ?iteration.shared().backend_sources(),
        "starting pipeline"
    );

    for i in 0..args.iterations {
        thread::sleep(args.stage_delay);
        recv.register(i, 0, Some(0.0), send.baseline());

        thread::sleep(args.stage_delay);
        work.register(i, 1, Some(1.0), recv.baseline());

        thread::sleep(args.stage_delay);
        send.register(i, 0, Some(0.0), work.baseline());

        iteration.register(i, 1, Some(1.0), None);
    }

    println!("Pipeline: {} iterations", args.iterations);
    println!();
    for (name, node) in [
        ("recv", &recv),
        ("work", &work),
        ("send", &send),
        ("iteration", &iteration),
    ] {
        print_node_summary(name, node);
    }
    println!();
    println!("Logs written to {}", args.output_dir.display());

    recv.finish()?;
    work.finish()?;
    send.finish()?;
    iteration.finish()?;

    Ok(())
}

fn energy_backends(source: EnergySource) -> Vec<Box<dyn EnergyBackend>> {
    let backend: Box<dyn EnergyBackend> = match source {
        EnergySource::Simulated => {
            let mut energy = 0.0;
            Box::new(FnBackend::new("simulated", move || {
                energy += 1_000_000.0;
                energy
            }))
        }
        EnergySource::Rapl => Box::new(RaplBackend::default()),
        EnergySource::None => return Vec::new(),
    };
    vec![backend]
}

fn print_node_summary(name: &str, node: &Heartbeat) {
    let latency_ms = node.current().map_or(0.0, |r| latency_ms(&r));
    let beats = node.beats();
    let rate = node.window_rate();
    let power = node.window_power();
    println!(
        "  {name:<10} beats={beats:<6} latency={latency_ms:>9.3} ms  \
         window_rate={rate:>9.3}/s  window_power={power:>12.3}"
    );
}

#[allow(clippy::cast_precision_loss)] // Display-only
fn latency_ms(record: &Record) -> f64 {
    record.latency() as f64 / 1_000_000.0
}

/// Implements `hbtree inspect <log_path>`.
#[allow(clippy::cast_precision_loss)] // Summary stats are fine with f64 precision
fn cmd_inspect(
    log_path: &Path,
    log_format: LogFormat,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = hbtree::read_log(log_path, log_format)?;
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return Err(format!("No records in '{}'", log_path.display()).into());
    };

    let count = records.len();
    let span_ns = last.timestamp() - first.timestamp();
    let total_work: u64 = records.iter().map(Record::work).sum();
    let total_energy: f64 = records.iter().map(Record::energy).sum();
    let mean_latency_ms = records.iter().map(latency_ms).sum::<f64>() / count as f64;
    let mean_instant_rate = records.iter().map(Record::instant_rate).sum::<f64>() / count as f64;

    match format {
        OutputFormat::Text => {
            println!("Log: {}", log_path.display());
            println!(
                "  Records: {count} (beats {}..={})",
                first.beat_number(),
                last.beat_number()
            );
            println!("  Span: {:.3} s", span_ns as f64 / 1e9);
            println!("  Total work: {total_work}");
            println!("  Total energy: {total_energy:.3}");
            println!("  Mean latency: {mean_latency_ms:.3} ms");
            println!("  Mean instant rate: {mean_instant_rate:.3}/s");
            println!();
            println!("Latest:");
            println!(
                "  Rate: global={:.3} window={:.3} instant={:.3}",
                last.global_rate(),
                last.window_rate(),
                last.instant_rate()
            );
            println!(
                "  Accuracy: global={:.3} window={:.3} instant={:.3}",
                last.global_accuracy(),
                last.window_accuracy(),
                last.instant_accuracy()
            );
            println!(
                "  Power: global={:.3} window={:.3} instant={:.3}",
                last.global_power(),
                last.window_power(),
                last.instant_power()
            );
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "log": log_path.display().to_string(),
                "count": count,
                "first_beat": first.beat_number(),
                "last_beat": last.beat_number(),
                "span_ns": span_ns,
                "total_work": total_work,
                "total_energy": total_energy,
                "mean_latency_ms": mean_latency_ms,
                "mean_instant_rate": mean_instant_rate,
                "latest": last,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `hbtree bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(beats: u64, window: usize) -> Result<(), Box<dyn std::error::Error>> {
    println!("hbtree registration benchmark");
    println!("  Beats: {beats}");
    println!("  Window: {window}");
    println!();

    let mut node = HeartbeatBuilder::new(HeartbeatConfig::new(window, window)?).build()?;

    let start = Instant::now();
    for i in 0..beats {
        node.beat(i, 1);
    }
    let elapsed = start.elapsed();

    let ns_per_beat = elapsed.as_nanos() as f64 / beats.max(1) as f64;
    let beats_per_sec = beats as f64 / elapsed.as_secs_f64();

    println!("Results:");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_beat:.1} ns/beat");
    println!("  Throughput: {beats_per_sec:.0} beats/sec");
    println!("  Final window rate: {:.0}/s", node.window_rate());

    node.finish()?;
    Ok(())
}

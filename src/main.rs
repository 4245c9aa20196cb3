use clap::{Parser, Subcommand};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use rusty_ws::config::{CountStrategy, MonitorConfig};
use rusty_ws::error::WsError;
use rusty_ws::monitor::Monitor;
use rusty_ws::quant::{Passthrough, UniformQuantizer, WeightMaterializer};
use rusty_ws::report;
use rusty_ws::trace::{SyntheticSpec, Trace};

#[derive(Parser, Debug)]
#[command(about = "Count weight/spike interactions of ternary-quantized spiking convolutions")]
struct Args {
    /// The monitoring configuration (JSON); defaults to layers ConvLif2 to ConvLif6
    #[arg(long)]
    config: Option<PathBuf>,
    /// The CSV report path, overriding the configured one
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Also save the per-layer totals as JSON
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Count from materialized patches instead of streaming over the activations
    #[arg(long)]
    materialized: bool,
    /// The directory of the log files
    #[arg(long, default_value = "log")]
    log_dir: PathBuf,
    /// Log every observation
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded trace of layer invocations
    Replay {
        /// The trace file (JSON)
        trace: PathBuf,
        /// The weights in the trace are already quantized
        #[arg(long)]
        quantized: bool,
    },
    /// Sample a synthetic trace and count its interactions
    Synth {
        /// The seed used for trace sampling
        #[arg(long, default_value = "23")]
        seed: u64,
        /// The batch size
        #[arg(short = 'N', long, default_value = "2")]
        batch_size: usize,
        /// The number of forward passes through the network
        #[arg(long, default_value = "1")]
        steps: usize,
        /// The probability for an input element to spike
        #[arg(long, default_value = "0.1")]
        firing_rate: f64,
        /// Save the sampled trace
        #[arg(long)]
        save_trace: Option<PathBuf>,
    },
}

fn init_logging(args: &Args) -> Result<(), WsError> {
    let mut hasher = Sha256::new();
    hasher.update(format!("{:?}", args));
    let hash = hasher.finalize();
    let log_path = args.log_dir.join(format!("{:x}.log", hash));

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} - {m}\n")))
        .build(log_path)
        .map_err(|e| WsError::IOError(e.to_string()))?;
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} - {m}\n")))
        .target(log4rs::append::console::Target::Stderr)
        .build();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(
            Root::builder()
                .appender("logfile")
                .appender("stderr")
                .build(level),
        )
        .map_err(|e| WsError::IOError(e.to_string()))?;

    log4rs::init_config(config).map_err(|e| WsError::IOError(e.to_string()))?;
    Ok(())
}

fn run<M: WeightMaterializer>(
    config: &MonitorConfig,
    materializer: M,
    trace: &Trace,
    snapshot_path: Option<&PathBuf>,
) -> Result<(), WsError> {
    let mut monitor = Monitor::from_config(config, materializer);
    let outcome = monitor.replay(trace);

    // Totals gathered before a failure are still reported.
    let snapshot = monitor.snapshot();
    report::write_csv(&config.output, &snapshot)?;
    if let Some(path) = snapshot_path {
        snapshot.save_to(path)?;
        log::info!("Snapshot saved to {}", path.display());
    }
    for stats in snapshot.iter() {
        log::info!(
            "{}: W=1 & S!=0 = {}, W=-1 & S!=0 = {}",
            stats.layer,
            stats.pos_total,
            stats.neg_total
        );
    }
    outcome.map(|_| ())
}

fn main() -> Result<(), WsError> {
    let args = Args::parse();
    init_logging(&args)?;
    log::info!("{:?}", args);

    let mut config = match &args.config {
        Some(path) => MonitorConfig::load_from(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if args.materialized {
        config.strategy = CountStrategy::Materialized;
    }
    log::info!("Monitoring layers {:?}", config.layers);

    match &args.command {
        Command::Replay { trace, quantized } => {
            let trace = Trace::load_from(trace)?;
            log::info!("Trace loading: done! {} invocations", trace.len());
            if *quantized {
                run(&config, Passthrough, &trace, args.snapshot.as_ref())?;
            } else {
                run(&config, UniformQuantizer, &trace, args.snapshot.as_ref())?;
            }
        }
        Command::Synth {
            seed,
            batch_size,
            steps,
            firing_rate,
            save_trace,
        } => {
            let spec = SyntheticSpec {
                batch_size: *batch_size,
                steps: *steps,
                firing_rate: *firing_rate,
                ..SyntheticSpec::default()
            };
            let mut rng = ChaCha8Rng::seed_from_u64(*seed);
            let trace = Trace::rand(&spec, &mut rng)?;
            log::info!("Trace sampling: done! {} invocations", trace.len());
            if let Some(path) = save_trace {
                trace.save_to(path)?;
                log::info!("Trace saved to {}", path.display());
            }
            run(&config, UniformQuantizer, &trace, args.snapshot.as_ref())?;
        }
    }

    log::info!("Ws computation statistics saved to {}", config.output.display());
    Ok(())
}

//! fanjoin CLI: run a traced mixed wave, the hello wave, or inspect a trace.

use clap::{Args, Parser, Subcommand};
use fanjoin::prelude::*;
use fanjoin::{trace, workload};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fanjoin", version, about = "Fan-out/join waves with scheduler tracing")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run compute-bound and blocking units together, tracing the run
    Run(RunArgs),
    /// Fan out units that each print their identifier
    Hello {
        /// Number of units
        #[arg(long, default_value_t = 11)]
        units: usize,
    },
    /// Summarize a trace artifact
    Inspect {
        /// Artifact written by `run`
        path: PathBuf,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Where to write the trace artifact
    #[arg(long, default_value = "trace.out")]
    trace: PathBuf,
    /// Skip tracing entirely
    #[arg(long)]
    no_trace: bool,
    /// Worker threads (defaults to FANJOIN_THREADS, then the host core count)
    #[arg(long)]
    threads: Option<usize>,
    /// Compute-bound units
    #[arg(long, default_value_t = 6)]
    compute: usize,
    /// Blocking units
    #[arg(long, default_value_t = 4)]
    blocking: usize,
    /// How long each blocking unit stays parked
    #[arg(long, default_value_t = 300)]
    delay_ms: u64,
    /// Seed for the compute iteration counts
    #[arg(long)]
    seed: Option<u64>,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            trace: PathBuf::from("trace.out"),
            no_trace: false,
            threads: None,
            compute: 6,
            blocking: 4,
            delay_ms: 300,
            seed: None,
        }
    }
}

fn config_for(threads: Option<usize>) -> Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(n) = threads {
        config.num_threads = Some(n);
    }
    config.validate()?;
    Ok(config)
}

fn run(args: RunArgs) -> Result<()> {
    let delay = Duration::from_millis(args.delay_ms);
    let mut config = config_for(args.threads)?;
    config.block_delay = delay;

    let rt = Runtime::with_recorder(config, TraceRecorder::global())?;
    let mut rng = match args.seed {
        Some(seed) => Pcg64::seed_from_u64(seed),
        None => Pcg64::from_entropy(),
    };
    let units = workload::mixed_wave(args.compute, args.blocking, None, &mut rng);

    let guard = if args.no_trace {
        None
    } else {
        Some(rt.recorder().start(&args.trace)?)
    };

    let barrier = CompletionBarrier::new();
    let report = rt.launcher().launch(units, &barrier).wait();

    if let Some(guard) = guard {
        let stats = guard.finish()?;
        println!(
            "done in {:.0?}; trace written to {} ({} events)",
            report.elapsed,
            stats.path.display(),
            stats.events
        );
    } else {
        println!("done in {:.0?}", report.elapsed);
    }

    for failure in &report.failures {
        println!("unit {} ({}) failed: {}", failure.unit, failure.kind, failure.error);
    }
    report.into_result().map(|_| ())
}

fn hello(units: usize) -> Result<()> {
    let rt = Runtime::new(config_for(None)?)?;
    let wave = (0..units)
        .map(|i| {
            WorkUnit::from_fn(i, UnitKind::Compute, move |_| {
                println!("Printing value of i in unit - {}", i);
                Ok(())
            })
        })
        .collect();

    rt.run(wave).into_result()?;
    println!("Hello, welcome to fan-out units");
    Ok(())
}

fn inspect(path: PathBuf) -> Result<()> {
    let log = trace::read_artifact(&path)?;
    println!("{}", log.summary());
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Command::Run(args)) => run(args),
        Some(Command::Hello { units }) => hello(units),
        Some(Command::Inspect { path }) => inspect(path),
        None => run(RunArgs::default()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

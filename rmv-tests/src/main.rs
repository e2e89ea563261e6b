use std::{
    fs::File,
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use clap::{Args, Parser, Subcommand};
use rmv::{
    config::{STORE_URL_ENV, ScenarioConfig, StoreUrl},
    runner::{RunOptions, run},
    scenario::ReadModifyVerify,
    store::{Namespace, Timestamp, WriteConcern, in_memory::InMemoryStore},
    touch_log::{MemoryTouchLog, TouchLog, file::FileTouchLog},
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Args)]
struct RunArgs {
    #[arg(long, env = STORE_URL_ENV, default_value = "memory://")]
    url: StoreUrl,
    #[arg(long, default_value = "testdb")]
    database: String,
    #[arg(long, default_value = "testcollection")]
    collection: String,
    /// Records created in the in-memory store before setup.
    #[arg(long, default_value_t = 10)]
    seed_records: u64,
    #[arg(long, default_value_t = 5)]
    sample_size: u64,
    /// Milliseconds each update path adds to `updateTime`.
    #[arg(long, default_value_t = 1)]
    increment: i64,
    #[arg(long, default_value_t = 1)]
    virtual_users: usize,
    #[arg(long, default_value_t = 1)]
    iterations: u64,
    /// Send writes without waiting for the store to acknowledge them.
    #[arg(long)]
    unacknowledged: bool,
    /// Keep the touch log in this file instead of in memory.
    #[arg(long)]
    touch_log: Option<PathBuf>,
    /// Seed for the sampler.
    #[arg(long)]
    seed: Option<u64>,
    /// Run the iterations even when there is nothing to sample.
    #[arg(long)]
    allow_empty: bool,
}

#[derive(Subcommand)]
enum TestName {
    /// Sample, mutate and verify in one process.
    ReadModifyVerify(RunArgs),
}

#[derive(Parser)]
struct Cli {
    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    test: TestName,
}

fn init_logging(log_file: Option<&PathBuf>) -> std::io::Result<()> {
    let builder = FmtSubscriber::builder()
        .with_thread_names(true)
        .with_env_filter(EnvFilter::from_default_env())
        .pretty();

    match log_file {
        Some(path) => builder.with_writer(Mutex::new(File::create(path)?)).init(),
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

fn now() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    Timestamp::from_millis(i64::try_from(millis).unwrap_or(i64::MAX))
}

fn read_modify_verify(args: RunArgs) -> ExitCode {
    let write_concern = if args.unacknowledged {
        WriteConcern::Unacknowledged
    } else {
        WriteConcern::Acknowledged
    };

    let store = match args.url {
        StoreUrl::Memory => InMemoryStore::with_write_concern(write_concern),
    };

    let namespace = Namespace::new(args.database, args.collection);
    store.seed(&namespace, args.seed_records, now());

    let touch_log: Box<dyn TouchLog> = match args.touch_log {
        Some(path) => Box::new(FileTouchLog::new(path)),
        None => Box::new(MemoryTouchLog::new()),
    };

    let config = ScenarioConfig {
        namespace,
        sample_size: args.sample_size,
        increment: args.increment,
        abort_on_empty: !args.allow_empty,
        seed: args.seed,
    };

    let scenario = ReadModifyVerify::new(&store, config).with_touch_log(touch_log.as_ref());
    let options = RunOptions {
        virtual_users: args.virtual_users,
        iterations: args.iterations,
    };

    let report = match run(&scenario, &options) {
        Ok(report) => report,
        Err(error) => {
            error!(%error, "run aborted");

            return ExitCode::FAILURE;
        }
    };

    info!(
        iterations_ok = report.iterations_ok,
        iterations_failed = report.iterations_failed,
        mutated = report.totals.mutated,
        unacknowledged = report.totals.unacknowledged,
        elapsed = ?report.elapsed,
        "test completed"
    );

    println!("{}", report.checks);
    println!(
        "iterations: {} ok, {} failed",
        report.iterations_ok, report.iterations_failed
    );
    println!(
        "records mutated: {}, unacknowledged writes: {}",
        report.totals.mutated, report.totals.unacknowledged
    );

    if report.checks.all_passed() && report.iterations_failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(error) = init_logging(cli.log_file.as_ref()) {
        eprintln!("could not open the log file: {error}");

        return ExitCode::FAILURE;
    }

    match cli.test {
        TestName::ReadModifyVerify(args) => read_modify_verify(args),
    }
}

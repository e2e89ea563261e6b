use std::{
    fmt::Debug,
    io,
    ops::AddAssign,
    panic,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::checks::Checks;

/// The three lifecycle hooks of a load-test scenario.
///
/// `setup` runs once before any iteration and learns how many iterations the run will attempt.
/// `iteration` runs many times concurrently against the data setup returned, and the reports of
/// the successful ones are summed into the run report. `teardown` runs once after every iteration
/// has returned.
pub trait Scenario: Sync {
    type Data: Sync;
    type Report: Default + AddAssign + Debug + Send;
    type Error: std::error::Error + Send + 'static;

    fn setup(&self, iterations: u64) -> Result<Self::Data, Self::Error>;

    fn iteration(&self, data: &Self::Data) -> Result<Self::Report, Self::Error>;

    fn teardown(&self, data: &Self::Data) -> Result<Checks, Self::Error>;
}

#[derive(Debug, Error)]
pub enum RunError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Scenario(#[from] E),
    #[error("starting virtual user {virtual_user} failed: {source}")]
    Spawn {
        virtual_user: usize,
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub virtual_users: usize,
    /// Iterations across all virtual users.
    pub iterations: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            virtual_users: 1,
            iterations: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport<R> {
    pub iterations_ok: u64,
    pub iterations_failed: u64,
    /// Sum of the reports of every successful iteration.
    pub totals: R,
    pub checks: Checks,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Progress {
    next_iteration: AtomicU64,
    stop: AtomicBool,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

fn virtual_user<T: Scenario>(
    id: usize,
    scenario: &T,
    data: &T::Data,
    iterations: u64,
    progress: &Progress,
) -> T::Report {
    let mut totals = T::Report::default();

    while !progress.stop.load(Ordering::Relaxed) {
        let iteration = progress.next_iteration.fetch_add(1, Ordering::Relaxed);
        if iteration >= iterations {
            break;
        }

        match scenario.iteration(data) {
            Ok(report) => {
                progress.succeeded.fetch_add(1, Ordering::Relaxed);
                totals += report;
            }
            Err(error) => {
                error!(virtual_user = id, iteration, %error, "iteration failed");

                progress.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    debug!(virtual_user = id, ?totals, "virtual user done");

    totals
}

/// Runs setup, then `options.iterations` iterations spread over `options.virtual_users` threads,
/// then teardown once every thread has been joined.
///
/// Failed iterations are counted and logged, never retried. A failed setup aborts the run before
/// any iteration starts.
#[instrument(skip(scenario))]
pub fn run<T: Scenario>(
    scenario: &T,
    options: &RunOptions,
) -> Result<RunReport<T::Report>, RunError<T::Error>> {
    let start = Instant::now();
    let data = scenario.setup(options.iterations)?;

    info!("setup completed, starting virtual users");

    let progress = Progress::default();

    let totals = thread::scope(|s| {
        let virtual_users = options.virtual_users.max(1);
        let mut handles = Vec::with_capacity(virtual_users);

        for id in 0..virtual_users {
            let (data, progress) = (&data, &progress);

            let spawned = thread::Builder::new()
                .name(format!("vu-{id:02}"))
                .spawn_scoped(s, move || {
                    virtual_user(id, scenario, data, options.iterations, progress)
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    error!(virtual_user = id, %source, "could not start virtual user, stopping");
                    progress.stop.store(true, Ordering::Relaxed);

                    return Err(RunError::<T::Error>::Spawn {
                        virtual_user: id,
                        source,
                    });
                }
            }
        }

        let mut totals = T::Report::default();
        for handle in handles {
            match handle.join() {
                Ok(report) => totals += report,
                Err(payload) => panic::resume_unwind(payload),
            }
        }

        Ok(totals)
    })?;

    let iterations_ok = progress.succeeded.load(Ordering::Relaxed);
    let iterations_failed = progress.failed.load(Ordering::Relaxed);

    info!(iterations_ok, iterations_failed, ?totals, "all virtual users stopped, tearing down");

    let checks = scenario.teardown(&data)?;

    info!(passed = checks.passed(), failed = checks.failed(), "run completed");

    Ok(RunReport {
        iterations_ok,
        iterations_failed,
        totals,
        checks,
        elapsed: start.elapsed(),
    })
}

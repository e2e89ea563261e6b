//! The read-modify-verify consistency scenario.
//!
//! Setup samples a handful of records once. Every iteration moves each sampled record's
//! `updateTime` forward twice, once with a value computed from the sampled copy and once with an
//! increment applied by the store itself. Teardown re-reads the records and checks that the
//! store ended up exactly where those two updates should have left it.
pub mod mutator;
pub mod sampler;
pub mod verifier;

use rand::{SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{
    checks::Checks,
    config::{ConfigError, ScenarioConfig},
    runner::Scenario,
    store::{Namespace, RecordId, Store, StoreError, Timestamp},
    touch_log::{TouchLog, TouchLogError},
};

pub use mutator::{IterationReport, MutationError, UpdatePath, mutate};
pub use sampler::sample;
pub use verifier::{Verification, VerifyError, verify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    pub id: RecordId,
    pub update_time: Timestamp,
}

/// Everything the phases share. Built once by setup and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub namespace: Namespace,
    pub sample: Vec<SampleEntry>,
    pub increment: i64,
    pub expected_iterations: u64,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("sampling failed: {0}")]
    Store(#[from] StoreError),
    #[error("{0} has no records to sample")]
    EmptyCollection(Namespace),
    #[error("clearing the touch log failed: {0}")]
    TouchLog(#[from] TouchLogError),
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// The scenario bound to one store handle, which lives as long as the run.
pub struct ReadModifyVerify<'a, S: Store + ?Sized> {
    store: &'a S,
    touch_log: Option<&'a dyn TouchLog>,
    config: ScenarioConfig,
}

impl<'a, S: Store + ?Sized> ReadModifyVerify<'a, S> {
    pub const fn new(store: &'a S, config: ScenarioConfig) -> Self {
        Self {
            store,
            touch_log: None,
            config,
        }
    }

    #[must_use]
    pub fn with_touch_log(mut self, touch_log: &'a dyn TouchLog) -> Self {
        self.touch_log = Some(touch_log);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ScenarioConfig {
        &self.config
    }
}

impl<S: Store + ?Sized> Scenario for ReadModifyVerify<'_, S> {
    type Data = Context;
    type Report = IterationReport;
    type Error = ScenarioError;

    /// Samples the collection. `iterations` is the number of iterations the verifier expects to
    /// have run by teardown.
    #[instrument(skip(self), fields(phase = "setup", namespace = %self.config.namespace))]
    fn setup(&self, iterations: u64) -> Result<Context, ScenarioError> {
        self.config.validate().map_err(SetupError::from)?;

        if let Some(touch_log) = self.touch_log {
            touch_log.reset().map_err(SetupError::from)?;
        }

        let mut rng = self
            .config
            .seed
            .map_or_else(|| StdRng::from_rng(&mut rand::rng()), StdRng::seed_from_u64);

        let sample = sample(
            self.store,
            &self.config.namespace,
            self.config.sample_size,
            &mut rng,
        )
        .map_err(SetupError::from)?;

        if sample.is_empty() && self.config.abort_on_empty {
            return Err(SetupError::EmptyCollection(self.config.namespace.clone()).into());
        }

        info!(sampled = sample.len(), "setup completed");

        Ok(Context {
            namespace: self.config.namespace.clone(),
            sample,
            increment: self.config.increment,
            expected_iterations: iterations,
        })
    }

    fn iteration(&self, context: &Context) -> Result<IterationReport, ScenarioError> {
        let report = mutate(self.store, context, self.touch_log)?;

        debug!(
            mutated = report.mutated,
            unacknowledged = report.unacknowledged,
            "iteration completed"
        );

        Ok(report)
    }

    fn teardown(&self, context: &Context) -> Result<Checks, ScenarioError> {
        let verification = verify(self.store, context, self.touch_log)?;

        info!(passed = verification.passed(), "teardown completed");

        Ok(verification.checks())
    }
}

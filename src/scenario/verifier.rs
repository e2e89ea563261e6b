use std::{collections::BTreeMap, fmt::Display};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    checks::Checks,
    scenario::Context,
    store::{Filter, RecordId, Store, StoreError, Timestamp},
    touch_log::{TouchLog, TouchLogError},
};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("re-reading {id} failed: {source}")]
    Store { id: RecordId, source: StoreError },
    #[error(transparent)]
    TouchLog(#[from] TouchLogError),
}

/// The `updateTime` a sampled record must hold once every iteration has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Exact(Timestamp),
    /// Inclusive on both ends.
    Between { min: Timestamp, max: Timestamp },
}

impl Expectation {
    /// Each iteration writes `captured + increment` and then adds `increment` on the store side.
    ///
    /// With a single iteration that is exactly `captured + 2 * increment`. With more, the absolute
    /// write can land after other iterations' increments and erase them, so anything from
    /// `captured + 2 * increment` up to `captured + (iterations + 1) * increment` is consistent.
    #[must_use]
    pub fn for_record(captured: Timestamp, increment: i64, iterations: u64) -> Self {
        match iterations {
            0 => Self::Exact(captured),
            1 => Self::Exact(captured.saturating_add(increment.saturating_mul(2))),
            _ => {
                let iterations = i64::try_from(iterations).unwrap_or(i64::MAX);

                Self::Between {
                    min: captured.saturating_add(increment.saturating_mul(2)),
                    max: captured.saturating_add(
                        increment.saturating_mul(iterations.saturating_add(1)),
                    ),
                }
            }
        }
    }

    #[must_use]
    pub fn accepts(&self, actual: Timestamp) -> bool {
        match self {
            Self::Exact(expected) => actual == *expected,
            Self::Between { min, max } => (*min..=*max).contains(&actual),
        }
    }
}

impl Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(expected) => write!(f, "{expected}"),
            Self::Between { min, max } => write!(f, "{min}..={max}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed {
        actual: Timestamp,
    },
    Mismatch {
        expected: Expectation,
        actual: Timestamp,
    },
    /// The record could not be found by its id anymore.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordVerification {
    pub id: RecordId,
    pub captured: Timestamp,
    pub outcome: Outcome,
}

impl RecordVerification {
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self.outcome, Outcome::Passed { .. })
    }
}

/// Compares what the touch log holds with what the iterations should have written to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub expected_entries: u64,
    pub actual_entries: u64,
    /// Sampled ids logged fewer times than there were iterations.
    pub missing: Vec<RecordId>,
    /// Sampled ids logged more times than there were iterations.
    pub surplus: Vec<RecordId>,
    /// Logged ids that were never sampled.
    pub unexpected: Vec<RecordId>,
    pub corrupt: Vec<String>,
}

impl Reconciliation {
    fn new(context: &Context, entries: &[RecordId], corrupt: Vec<String>) -> Self {
        let mut counts = BTreeMap::<RecordId, u64>::new();
        for id in entries {
            *counts.entry(*id).or_default() += 1;
        }

        let mut reconciliation = Self {
            expected_entries: context.sample.len() as u64 * context.expected_iterations,
            actual_entries: entries.len() as u64 + corrupt.len() as u64,
            corrupt,
            ..Self::default()
        };

        for entry in &context.sample {
            let count = counts.remove(&entry.id).unwrap_or(0);

            if count < context.expected_iterations {
                reconciliation.missing.push(entry.id);
            } else if count > context.expected_iterations {
                reconciliation.surplus.push(entry.id);
            }
        }

        reconciliation.unexpected = counts.into_keys().collect();

        reconciliation
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.expected_entries == self.actual_entries
            && self.missing.is_empty()
            && self.surplus.is_empty()
            && self.unexpected.is_empty()
            && self.corrupt.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    pub records: Vec<RecordVerification>,
    pub reconciliation: Option<Reconciliation>,
}

impl Verification {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.records.iter().all(RecordVerification::passed)
            && self
                .reconciliation
                .as_ref()
                .is_none_or(Reconciliation::passed)
    }

    /// One named check per sampled record, plus one for the touch log when there is one.
    #[must_use]
    pub fn checks(&self) -> Checks {
        let mut checks = Checks::new();

        for record in &self.records {
            match record.outcome {
                Outcome::Missing => checks.check(format!("record exists {}", record.id), false),
                Outcome::Passed { .. } | Outcome::Mismatch { .. } => checks.check(
                    format!("verify timestamp {}", record.id),
                    record.passed(),
                ),
            };
        }

        if let Some(reconciliation) = &self.reconciliation {
            checks.check("touch log reconciliation", reconciliation.passed());
        }

        checks
    }
}

/// Re-reads every sampled record and compares it against the value its captured `updateTime`
/// predicts. Only reads, so running it again over the same state gives the same answer.
#[instrument(skip_all, fields(phase = "teardown", sample = context.sample.len()))]
pub fn verify<S: Store + ?Sized>(
    store: &S,
    context: &Context,
    touch_log: Option<&dyn TouchLog>,
) -> Result<Verification, VerifyError> {
    let mut verification = Verification::default();

    for entry in &context.sample {
        let expected = Expectation::for_record(
            entry.update_time,
            context.increment,
            context.expected_iterations,
        );

        let record = store
            .find_one(&context.namespace, &Filter::Id(entry.id))
            .map_err(|source| VerifyError::Store {
                id: entry.id,
                source,
            })?;

        let outcome = match record {
            None => {
                warn!(id = %entry.id, %expected, "record missing");

                Outcome::Missing
            }
            Some(record) if expected.accepts(record.update_time) => {
                debug!(
                    id = %entry.id,
                    %expected,
                    actual = %record.update_time,
                    "timestamp verified"
                );

                Outcome::Passed {
                    actual: record.update_time,
                }
            }
            Some(record) => {
                warn!(
                    id = %entry.id,
                    %expected,
                    actual = %record.update_time,
                    "timestamp mismatch"
                );

                Outcome::Mismatch {
                    expected,
                    actual: record.update_time,
                }
            }
        };

        verification.records.push(RecordVerification {
            id: entry.id,
            captured: entry.update_time,
            outcome,
        });
    }

    if let Some(touch_log) = touch_log {
        let contents = touch_log.read()?;
        let reconciliation = Reconciliation::new(context, &contents.entries, contents.corrupt);

        info!(
            expected = reconciliation.expected_entries,
            actual = reconciliation.actual_entries,
            passed = reconciliation.passed(),
            "touch log reconciled"
        );

        verification.reconciliation = Some(reconciliation);
    }

    Ok(verification)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        scenario::{SampleEntry, mutator::mutate},
        store::{Namespace, in_memory::InMemoryStore},
        touch_log::MemoryTouchLog,
    };

    const T0: Timestamp = Timestamp::from_millis(1_700_000_000_000);

    fn context(store: &InMemoryStore, count: u64, iterations: u64) -> Context {
        let namespace = Namespace::new("testdb", "testcollection");
        let sample = store
            .seed(&namespace, count, T0)
            .into_iter()
            .map(|id| SampleEntry { id, update_time: T0 })
            .collect();

        Context {
            namespace,
            sample,
            increment: 1,
            expected_iterations: iterations,
        }
    }

    #[test]
    fn expectation() {
        assert_eq!(Expectation::for_record(T0, 1, 0), Expectation::Exact(T0));
        assert_eq!(
            Expectation::for_record(T0, 1, 1),
            Expectation::Exact(T0.saturating_add(2))
        );
        assert_eq!(
            Expectation::for_record(T0, 3, 4),
            Expectation::Between {
                min: T0.saturating_add(6),
                max: T0.saturating_add(15),
            }
        );

        let range = Expectation::for_record(T0, 1, 4);
        assert!(!range.accepts(T0.saturating_add(1)));
        assert!(range.accepts(T0.saturating_add(2)));
        assert!(range.accepts(T0.saturating_add(5)));
        assert!(!range.accepts(T0.saturating_add(6)));
    }

    #[test]
    fn one_iteration_passes_exactly() {
        let store = InMemoryStore::new();
        let context = context(&store, 5, 1);
        let log = MemoryTouchLog::new();

        mutate(&store, &context, Some(&log)).unwrap();
        let verification = verify(&store, &context, Some(&log)).unwrap();

        assert!(verification.passed());
        assert_eq!(verification.checks().passed(), 6);
        for record in &verification.records {
            assert_eq!(record.outcome, Outcome::Passed {
                actual: T0.saturating_add(2)
            });
        }
        assert_eq!(verification.reconciliation, Some(Reconciliation {
            expected_entries: 5,
            actual_entries: 5,
            ..Reconciliation::default()
        }));
    }

    #[test]
    fn no_iterations_is_a_mismatch() {
        let store = InMemoryStore::new();
        let context = context(&store, 2, 1);
        let log = MemoryTouchLog::new();

        let verification = verify(&store, &context, Some(&log)).unwrap();

        assert!(!verification.passed());
        for record in &verification.records {
            assert_eq!(record.outcome, Outcome::Mismatch {
                expected: Expectation::Exact(T0.saturating_add(2)),
                actual: T0,
            });
        }

        let reconciliation = verification.reconciliation.unwrap();
        assert_eq!(reconciliation.actual_entries, 0);
        assert_eq!(
            reconciliation.missing,
            context.sample.iter().map(|x| x.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn missing_record_is_distinct_from_mismatch() {
        let store = InMemoryStore::new();
        let context = context(&store, 3, 1);

        mutate(&store, &context, None).unwrap();
        store.remove(&context.namespace, &context.sample[2].id);

        let verification = verify(&store, &context, None).unwrap();

        assert_eq!(verification.records[2].outcome, Outcome::Missing);
        assert!(verification.records[0].passed());

        let checks = verification.checks();
        assert_eq!(checks.failed(), 1);
        assert_eq!(
            checks
                .get(&format!("record exists {}", context.sample[2].id))
                .map(|x| x.passed),
            Some(false)
        );
        assert_eq!(checks.get("touch log reconciliation"), None);
    }

    #[test]
    fn verification_is_idempotent() {
        let store = InMemoryStore::new();
        let context = context(&store, 4, 1);
        let log = MemoryTouchLog::new();

        mutate(&store, &context, Some(&log)).unwrap();

        let first = verify(&store, &context, Some(&log)).unwrap();
        let second = verify(&store, &context, Some(&log)).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.checks(), second.checks());
    }

    #[test]
    fn reconciliation_finds_duplicates_and_strangers() {
        let store = InMemoryStore::new();
        let context = context(&store, 2, 1);
        let log = MemoryTouchLog::new();

        mutate(&store, &context, Some(&log)).unwrap();
        log.append(&context.sample[0].id).unwrap();
        log.append(&RecordId::from_sequence(999)).unwrap();

        let reconciliation = verify(&store, &context, Some(&log))
            .unwrap()
            .reconciliation
            .unwrap();

        assert!(!reconciliation.passed());
        assert_eq!(reconciliation.actual_entries, 4);
        assert_eq!(reconciliation.surplus, vec![context.sample[0].id]);
        assert_eq!(reconciliation.unexpected, vec![RecordId::from_sequence(999)]);
        assert!(reconciliation.missing.is_empty());
    }

    #[test]
    fn store_errors_bubble_up() {
        struct Unreachable;

        impl Store for Unreachable {
            fn count(&self, _: &Namespace, _: &Filter) -> Result<u64, StoreError> {
                Err(StoreError::Unavailable("down".into()))
            }

            fn find(
                &self,
                _: &Namespace,
                _: &Filter,
                _: &crate::store::FindOptions,
            ) -> Result<Vec<crate::store::Record>, StoreError> {
                Err(StoreError::Unavailable("down".into()))
            }

            fn update_one(
                &self,
                _: &Namespace,
                _: &Filter,
                _: &crate::store::Update,
            ) -> Result<crate::store::UpdateResult, StoreError> {
                Err(StoreError::Unavailable("down".into()))
            }

            fn find_one(
                &self,
                _: &Namespace,
                _: &Filter,
            ) -> Result<Option<crate::store::Record>, StoreError> {
                Err(StoreError::Unavailable("down".into()))
            }
        }

        let store = InMemoryStore::new();
        let context = context(&store, 1, 1);

        assert!(matches!(
            verify(&Unreachable, &context, None),
            Err(VerifyError::Store {
                source: StoreError::Unavailable(_),
                ..
            })
        ));
    }
}

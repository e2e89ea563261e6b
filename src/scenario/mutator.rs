use std::{fmt::Display, ops::AddAssign};

use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::{
    scenario::{Context, SampleEntry},
    store::{Filter, RecordId, Store, StoreError, UPDATE_TIME_FIELD, Update, UpdateResult},
    touch_log::{TouchLog, TouchLogError},
};

/// The two ways an iteration moves `updateTime` forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePath {
    /// Writes `captured + increment`, computed from the value read at setup. Loses updates when
    /// it races with itself.
    ClientComputed,
    /// Asks the store to add the increment to whatever it holds at that moment.
    StoreComputed,
}

impl Display for UpdatePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientComputed => write!(f, "client-computed"),
            Self::StoreComputed => write!(f, "store-computed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("the {path} update of {id} failed: {source}")]
    Store {
        id: RecordId,
        path: UpdatePath,
        source: StoreError,
    },
    #[error("the {path} update of {id} matched no record")]
    NotMatched { id: RecordId, path: UpdatePath },
    #[error("recording {id} in the touch log failed: {source}")]
    TouchLog { id: RecordId, source: TouchLogError },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub mutated: usize,
    /// Updates sent without acknowledgement, whose effect could not be confirmed.
    pub unacknowledged: usize,
}

impl AddAssign for IterationReport {
    fn add_assign(&mut self, other: Self) {
        self.mutated += other.mutated;
        self.unacknowledged += other.unacknowledged;
    }
}

impl UpdatePath {
    fn update(self, entry: &SampleEntry, increment: i64) -> Update {
        match self {
            Self::ClientComputed => Update::Set {
                field: UPDATE_TIME_FIELD.to_string(),
                value: entry.update_time.saturating_add(increment),
            },
            Self::StoreComputed => Update::Increment {
                field: UPDATE_TIME_FIELD.to_string(),
                delta: increment,
            },
        }
    }
}

/// Applies both update paths to every sampled record, then logs the record as touched.
///
/// The first failing update ends the iteration. Its record is not logged; records handled before
/// it stay mutated and logged.
#[instrument(skip_all, fields(phase = "iteration", sample = context.sample.len()))]
pub fn mutate<S: Store + ?Sized>(
    store: &S,
    context: &Context,
    touch_log: Option<&dyn TouchLog>,
) -> Result<IterationReport, MutationError> {
    let mut report = IterationReport::default();

    for entry in &context.sample {
        let filter = Filter::Id(entry.id);

        for path in [UpdatePath::ClientComputed, UpdatePath::StoreComputed] {
            let update = path.update(entry, context.increment);

            let result = store
                .update_one(&context.namespace, &filter, &update)
                .map_err(|source| {
                    error!(id = %entry.id, %path, %source, "update failed");

                    MutationError::Store {
                        id: entry.id,
                        path,
                        source,
                    }
                })?;

            match result {
                UpdateResult::Acknowledged { matched: 0 } => {
                    error!(id = %entry.id, %path, "update matched no record");

                    return Err(MutationError::NotMatched { id: entry.id, path });
                }
                UpdateResult::Acknowledged { .. } => {}
                UpdateResult::Unacknowledged => report.unacknowledged += 1,
            }

            debug!(id = %entry.id, %path, "updated");
        }

        if let Some(touch_log) = touch_log {
            touch_log
                .append(&entry.id)
                .map_err(|source| MutationError::TouchLog {
                    id: entry.id,
                    source,
                })?;
        }

        report.mutated += 1;
    }

    Ok(report)
}

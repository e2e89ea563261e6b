//! Append-only logs of the records an iteration has mutated.
//!
//! Iterations append concurrently and the verifier reads the log once after every iteration has
//! finished. Implementations synchronize internally, callers never lock.
pub mod file;

use std::sync::Mutex;

use thiserror::Error;

use crate::store::RecordId;

#[derive(Debug, Error)]
pub enum TouchLogError {
    #[error("touch log I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchLogContents {
    pub entries: Vec<RecordId>,
    /// Entries that could not be parsed back, kept verbatim.
    pub corrupt: Vec<String>,
}

pub trait TouchLog: Send + Sync {
    fn append(&self, id: &RecordId) -> Result<(), TouchLogError>;

    fn read(&self) -> Result<TouchLogContents, TouchLogError>;

    /// Drops every entry, so a run starts from an empty log.
    fn reset(&self) -> Result<(), TouchLogError>;
}

#[derive(Debug, Default)]
pub struct MemoryTouchLog {
    entries: Mutex<Vec<RecordId>>,
}

impl MemoryTouchLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TouchLog for MemoryTouchLog {
    fn append(&self, id: &RecordId) -> Result<(), TouchLogError> {
        self.entries.lock().unwrap().push(*id);

        Ok(())
    }

    fn read(&self) -> Result<TouchLogContents, TouchLogError> {
        Ok(TouchLogContents {
            entries: self.entries.lock().unwrap().clone(),
            corrupt: vec![],
        })
    }

    fn reset(&self) -> Result<(), TouchLogError> {
        self.entries.lock().unwrap().clear();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn concurrent_appends() {
        let log = MemoryTouchLog::new();

        std::thread::scope(|s| {
            for thread in 0..4 {
                let log = &log;
                s.spawn(move || {
                    for i in 0..25 {
                        log.append(&RecordId::from_sequence(thread * 100 + i))
                            .unwrap();
                    }
                });
            }
        });

        let mut entries = log.read().unwrap().entries;
        entries.sort();
        entries.dedup();

        assert_eq!(entries.len(), 100);
    }

    #[test]
    fn reset_clears() {
        let log = MemoryTouchLog::new();
        log.append(&RecordId::from_sequence(1)).unwrap();
        log.reset().unwrap();

        assert_eq!(log.read().unwrap(), TouchLogContents::default());
    }
}

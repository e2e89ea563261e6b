use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{
    checksum::Checksum,
    store::RecordId,
    touch_log::{TouchLog, TouchLogContents, TouchLogError},
};

/// A touch log kept in a file, so the phases of a run can live in separate processes.
///
/// Every entry is one line, `<id> <crc32c of the id>`, written with a single `write` on a file
/// opened for appending. A line that was torn or interleaved fails its checksum and is reported
/// as corrupt when the log is read back.
#[derive(Debug)]
pub struct FileTouchLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl FileTouchLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn encode(id: &RecordId) -> String {
    let hex = id.to_hex();
    let checksum = Checksum::of(hex.as_bytes());

    format!("{hex} {checksum}\n")
}

fn decode(line: &str) -> Option<RecordId> {
    let (hex, checksum) = line.split_once(' ')?;

    if Checksum::from_hex(checksum)? != Checksum::of(hex.as_bytes()) {
        return None;
    }

    RecordId::from_hex(hex).ok()
}

impl TouchLog for FileTouchLog {
    fn append(&self, id: &RecordId) -> Result<(), TouchLogError> {
        let line = encode(id);
        let _guard = self.append_lock.lock().unwrap();

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(line.as_bytes())?;

        Ok(())
    }

    fn read(&self) -> Result<TouchLogContents, TouchLogError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => String::new(),
            Err(error) => return Err(error.into()),
        };

        let mut contents = TouchLogContents::default();

        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            match decode(line) {
                Some(id) => contents.entries.push(id),
                None => {
                    warn!(path = %self.path.display(), line, "corrupt touch log entry");

                    contents.corrupt.push(line.to_string());
                }
            }
        }

        Ok(contents)
    }

    fn reset(&self) -> Result<(), TouchLogError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "touch log removed");

                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let log = FileTouchLog::new(dir.path().join("touched.txt"));

        assert_eq!(log.read().unwrap(), TouchLogContents::default());
        log.reset().unwrap();
    }

    #[test]
    fn append_and_read() {
        let dir = tempdir().unwrap();
        let log = FileTouchLog::new(dir.path().join("touched.txt"));

        log.append(&RecordId::from_sequence(1)).unwrap();
        log.append(&RecordId::from_sequence(2)).unwrap();
        log.append(&RecordId::from_sequence(1)).unwrap();

        assert_eq!(log.read().unwrap().entries, vec![
            RecordId::from_sequence(1),
            RecordId::from_sequence(2),
            RecordId::from_sequence(1),
        ]);

        log.reset().unwrap();
        assert!(!log.path().exists());
    }

    #[test]
    fn corrupt_lines_are_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("touched.txt");
        let log = FileTouchLog::new(&path);

        log.append(&RecordId::from_sequence(7)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"000000000000000000000007 00000000\n\ngarbage\n")
            .unwrap();

        let contents = log.read().unwrap();

        assert_eq!(contents.entries, vec![RecordId::from_sequence(7)]);
        assert_eq!(contents.corrupt, vec![
            "000000000000000000000007 00000000".to_string(),
            "garbage".to_string(),
        ]);
    }

    #[test]
    fn concurrent_appends_stay_intact() {
        let dir = tempdir().unwrap();
        let log = FileTouchLog::new(dir.path().join("touched.txt"));

        std::thread::scope(|s| {
            for thread in 0..8u64 {
                let log = &log;
                s.spawn(move || {
                    for i in 0..50 {
                        log.append(&RecordId::from_sequence(thread * 1000 + i))
                            .unwrap();
                    }
                });
            }
        });

        let contents = log.read().unwrap();

        assert!(contents.corrupt.is_empty());
        assert_eq!(contents.entries.len(), 400);
        assert_eq!(
            contents.entries.iter().collect::<HashSet<_>>().len(),
            400
        );
    }
}

//! JSON-lines journal of group creations and increments.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StoreResult;
use crate::types::{GroupId, GroupMetadata};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum JournalRecord {
    Created {
        group_id: GroupId,
        last_seen: DateTime<Utc>,
        metadata: GroupMetadata,
    },
    Incremented {
        group_id: GroupId,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    pub(crate) fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(Self { path, file })
    }

    /// Reads all complete records. Lines that fail to parse are logged and
    /// skipped; an interrupted final write leaves exactly one such line.
    pub(crate) fn replay(&self) -> StoreResult<Vec<JournalRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    "skipping unreadable journal line: {e}"
                ),
            }
        }

        Ok(records)
    }

    /// Appends one record as a full line.
    ///
    /// An unterminated line already at the end of the file is closed first,
    /// and a failed write is truncated away, so every record starts on a
    /// fresh line.
    pub(crate) fn append(&mut self, record: &JournalRecord) -> StoreResult<()> {
        let len = self.file.metadata()?.len();
        let mut line = Vec::new();
        if self.ends_mid_line(len)? {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, record)?;
        line.push(b'\n');

        if let Err(e) = self.file.write_all(&line).and_then(|()| self.file.flush()) {
            if let Err(truncate) = self.file.set_len(len) {
                tracing::warn!(
                    path = %self.path.display(),
                    "could not roll back partial journal write: {truncate}"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn ends_mid_line(&mut self, len: u64) -> StoreResult<bool> {
        if len == 0 {
            return Ok(false);
        }
        // Appends ignore the cursor, so moving it for the read is harmless
        self.file.seek(SeekFrom::Start(len - 1))?;
        let mut last = [0u8; 1];
        self.file.read_exact(&mut last)?;
        Ok(last[0] != b'\n')
    }
}

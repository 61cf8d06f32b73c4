//! Filesystem encounter store
//!
//! Records live in memory and every mutation is first appended to a JSON-lines
//! journal on disk. Reopening replays the journal. When the journal grows well
//! past the live record count it is compacted into a fresh file written next
//! to the old one and renamed over it.

use super::table::EncounterTable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracer_core::effects::EncounterStoreEffects;
use tracer_core::{
    EncounterRecord, RecordFilter, RecordId, RecordUpdate, StoredEncounter, TracerError,
    UpdateOutcome,
};
use tracing::{debug, info, warn};

/// Journal entries beyond `2 * live + COMPACTION_SLACK` trigger a rewrite
const COMPACTION_SLACK: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Watermark { next_id: RecordId },
    Insert { id: RecordId, record: EncounterRecord },
    Update { id: RecordId, update: RecordUpdate },
    Delete { ids: Vec<RecordId> },
    Clear,
}

#[derive(Debug)]
struct Inner {
    table: EncounterTable,
    journal_entries: usize,
    /// A previous append may have left a torn line behind
    needs_rewrite: bool,
}

/// Journal-backed encounter store
#[derive(Debug, Clone)]
pub struct FilesystemEncounterStore {
    path: PathBuf,
    inner: Arc<RwLock<Inner>>,
}

impl FilesystemEncounterStore {
    /// Open the journal at `path`, creating it and its parent directory if needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, TracerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let (table, journal_entries) = match fs::read_to_string(&path).await {
            Ok(content) => replay(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (EncounterTable::default(), 0),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            records = table.len(),
            journal_entries,
            "opened encounter journal"
        );

        Ok(Self {
            path,
            inner: Arc::new(RwLock::new(Inner {
                table,
                journal_entries,
                needs_rewrite: false,
            })),
        })
    }

    /// Journal location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `entry`, recovering from an earlier torn append first
    async fn append(&self, inner: &mut Inner, entry: &JournalEntry) -> Result<(), TracerError> {
        if inner.needs_rewrite {
            self.rewrite(inner).await?;
        }

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        if let Err(e) = append_line(&self.path, &line).await {
            inner.needs_rewrite = true;
            warn!(path = %self.path.display(), error = %e, "journal append failed");
            return Err(e.into());
        }
        inner.journal_entries += 1;
        Ok(())
    }

    async fn maybe_compact(&self, inner: &mut Inner) {
        if inner.journal_entries <= inner.table.len() * 2 + COMPACTION_SLACK {
            return;
        }
        // the mutation is already durable; a failed compaction only delays the next one
        if let Err(e) = self.rewrite(inner).await {
            warn!(path = %self.path.display(), error = %e, "journal compaction failed");
        }
    }

    async fn rewrite(&self, inner: &mut Inner) -> Result<(), TracerError> {
        let mut entries = vec![JournalEntry::Watermark {
            next_id: inner.table.next_id(),
        }];
        entries.extend(inner.table.snapshot().into_iter().map(|stored| JournalEntry::Insert {
            id: stored.id,
            record: stored.record,
        }));

        let mut content = Vec::new();
        for entry in &entries {
            serde_json::to_writer(&mut content, entry)?;
            content.push(b'\n');
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &self.path).await?;

        debug!(
            path = %self.path.display(),
            records = inner.table.len(),
            dropped = inner.journal_entries.saturating_sub(entries.len()),
            "compacted encounter journal"
        );
        inner.journal_entries = entries.len();
        inner.needs_rewrite = false;
        Ok(())
    }
}

async fn append_line(path: &Path, line: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line).await?;
    file.sync_data().await
}

fn replay(content: &str) -> (EncounterTable, usize) {
    let mut table = EncounterTable::default();
    let mut applied = 0;

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping unreadable journal entry");
                continue;
            }
        };
        match entry {
            JournalEntry::Watermark { next_id } => table.advance_to(next_id),
            JournalEntry::Insert { id, record } => table.insert_with_id(id, record),
            JournalEntry::Update { id, update } => {
                table.update(id, &update);
            }
            JournalEntry::Delete { ids } => {
                table.remove_ids(&ids);
            }
            JournalEntry::Clear => {
                table.clear();
            }
        }
        applied += 1;
    }

    (table, applied)
}

#[async_trait]
impl EncounterStoreEffects for FilesystemEncounterStore {
    async fn insert(&self, record: EncounterRecord) -> Result<RecordId, TracerError> {
        let mut inner = self.inner.write().await;
        let id = inner.table.next_id();
        self.append(
            &mut inner,
            &JournalEntry::Insert {
                id,
                record: record.clone(),
            },
        )
        .await?;
        inner.table.insert_with_id(id, record);
        Ok(id)
    }

    async fn update(&self, id: RecordId, update: &RecordUpdate) -> Result<bool, TracerError> {
        let mut inner = self.inner.write().await;
        match inner.table.preview_update(id, update) {
            None => Ok(false),
            Some(UpdateOutcome::Changed) => {
                self.append(
                    &mut inner,
                    &JournalEntry::Update {
                        id,
                        update: update.clone(),
                    },
                )
                .await?;
                inner.table.update(id, update);
                self.maybe_compact(&mut inner).await;
                Ok(true)
            }
            Some(UpdateOutcome::Unchanged | UpdateOutcome::NotApplicable) => Ok(true),
        }
    }

    async fn count(&self, filter: &RecordFilter) -> Result<u64, TracerError> {
        Ok(self.inner.read().await.table.count(filter))
    }

    async fn delete(&self, filter: &RecordFilter) -> Result<u64, TracerError> {
        let mut inner = self.inner.write().await;
        let ids = inner.table.matching_ids(filter);
        if ids.is_empty() {
            return Ok(0);
        }
        self.append(&mut inner, &JournalEntry::Delete { ids: ids.clone() })
            .await?;
        let removed = inner.table.remove_ids(&ids);
        self.maybe_compact(&mut inner).await;
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<u64, TracerError> {
        let mut inner = self.inner.write().await;
        self.append(&mut inner, &JournalEntry::Clear).await?;
        let removed = inner.table.clear();
        self.maybe_compact(&mut inner).await;
        Ok(removed)
    }

    async fn snapshot(&self) -> Result<Vec<StoredEncounter>, TracerError> {
        Ok(self.inner.read().await.table.snapshot())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredEncounter>, TracerError> {
        Ok(self.inner.read().await.table.recent(limit))
    }

    async fn watermark(&self) -> Result<RecordId, TracerError> {
        Ok(self.inner.read().await.table.next_id())
    }
}

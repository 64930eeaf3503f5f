use crate::models::{CanonicalRecord, KeyField, WriteMode, WriteOutcome};
use crate::storage::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Writes a run's records into one table in fixed-size batches.
pub struct BatchWriter {
    store: Arc<dyn RecordStore>,
    table: String,
    key: KeyField,
    mode: WriteMode,
    batch_size: usize,
    batch_delay: Duration,
}

impl BatchWriter {
    pub fn new(
        store: Arc<dyn RecordStore>,
        table: impl Into<String>,
        key: KeyField,
        mode: WriteMode,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            key,
            mode,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    pub async fn write_all(&self, records: &[CanonicalRecord]) -> WriteOutcome {
        if records.is_empty() {
            return WriteOutcome::default();
        }
        match self.mode {
            WriteMode::Upsert => self.write_batches(records).await,
            WriteMode::Replace => {
                let keys: Vec<String> = records.iter().filter_map(|r| self.key.value_of(r)).collect();
                match self.store.delete_keys(&self.table, self.key, &keys).await {
                    Ok(n) => debug!("{}: removed {} previous rows", self.table, n),
                    Err(e) => {
                        error!("{}: delete before insert failed: {}", self.table, e);
                        return WriteOutcome { succeeded: 0, failed: records.len() };
                    }
                }
                self.write_batches(records).await
            }
        }
    }

    async fn write_batches(&self, records: &[CanonicalRecord]) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        let batches = records.len().div_ceil(self.batch_size);

        for (i, batch) in records.chunks(self.batch_size).enumerate() {
            let result = match self.mode {
                WriteMode::Upsert => self.store.upsert(&self.table, self.key, batch).await,
                WriteMode::Replace => self.store.insert(&self.table, batch).await,
            };
            match result {
                Ok(_) => {
                    outcome.succeeded += batch.len();
                    debug!("{}: batch {}/{} ({} rows)", self.table, i + 1, batches, batch.len());
                }
                Err(e) => {
                    outcome.failed += batch.len();
                    error!("{}: batch {}/{} failed: {}", self.table, i + 1, batches, e);
                }
            }
            if i + 1 < batches {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        info!(
            "{}: {} written, {} failed",
            self.table, outcome.succeeded, outcome.failed
        );
        outcome
    }
}

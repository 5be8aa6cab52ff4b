//! Bulk adjustment uploads: validate, detect duplicates, preview, commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use stockledger_core::{BatchId, UserId};
use stockledger_inventory::{
    Batch, BatchRow, Catalogs, DuplicateGroup, LedgerError, LedgerResult, MovementMetadata,
    RawAdjustmentRow, StockKey, Taxonomy, UploadStep, ValidationPolicy, detect_duplicates,
    project_stock, validate_rows,
};

use crate::ledger::{StockLedger, rollback_quietly};
use crate::store::{LedgerQuery, LedgerStore, LedgerTransaction};

/// Who is committing an upload, and what it was called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

pub struct AdjustmentBatchProcessor<S> {
    ledger: Arc<StockLedger<S>>,
    taxonomy: Taxonomy,
    policy: ValidationPolicy,
}

impl<S> AdjustmentBatchProcessor<S>
where
    S: LedgerStore + LedgerQuery,
{
    pub fn new(ledger: Arc<StockLedger<S>>, taxonomy: Taxonomy, policy: ValidationPolicy) -> Self {
        Self {
            ledger,
            taxonomy,
            policy,
        }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Resolve raw rows against `catalogs`. Read-only; never fails.
    pub fn validate(&self, rows: &[RawAdjustmentRow], catalogs: &Catalogs) -> Vec<BatchRow> {
        validate_rows(rows, catalogs, &self.taxonomy, &self.policy)
    }

    pub fn detect_duplicates(&self, rows: &[BatchRow]) -> Vec<DuplicateGroup> {
        detect_duplicates(rows)
    }

    /// Fill `stock_before` / `stock_after` against committed stock.
    pub async fn preview(&self, mut rows: Vec<BatchRow>) -> LedgerResult<Vec<BatchRow>> {
        let mut keys: Vec<StockKey> = rows.iter().filter(|r| r.valid).filter_map(BatchRow::stock_key).collect();
        keys.sort();
        keys.dedup();

        let current: HashMap<StockKey, _> = self
            .ledger
            .store()
            .stock_rows(&keys)
            .await?
            .into_iter()
            .map(|row| (row.key().clone(), row))
            .collect();
        project_stock(&mut rows, &current, Utc::now());
        Ok(rows)
    }

    /// Commit every valid row in one transaction.
    ///
    /// A draft header is persisted first. The commit transaction then locks
    /// that header and every touched stock row (in key order) before applying
    /// rows. If any row fails, the whole transaction is rolled back, the draft
    /// records the failure, and `BatchCommitFailed` names the failing line.
    #[instrument(
        skip_all,
        fields(user_id = %request.user_id, rows = rows.len(), batch_id = tracing::field::Empty),
        err
    )]
    pub async fn commit(&self, rows: &[BatchRow], request: CommitRequest) -> LedgerResult<Batch> {
        let valid: Vec<&BatchRow> = rows.iter().filter(|r| r.valid).collect();
        let step = UploadStep::Draft.review(valid.len())?.confirm()?;

        let draft = Batch::draft(BatchId::new(), request.user_id, rows, Utc::now())
            .with_file_name(request.file_name)
            .with_note(request.note);
        tracing::Span::current().record("batch_id", tracing::field::display(draft.id));
        self.save(&draft).await?;

        let mut tx = self.ledger.begin().await?;
        match self.commit_in(&mut tx, draft.id, &valid).await {
            Ok(batch) => {
                tx.commit().await?;
                info!(
                    batch_id = %batch.id,
                    rows_processed = batch.rows_processed,
                    rows_errored = batch.rows_errored,
                    step = ?step.reset(),
                    "batch committed"
                );
                Ok(batch)
            }
            Err(e) => {
                rollback_quietly(tx).await;
                warn!(batch_id = %draft.id, error = %e, step = ?step, "batch commit aborted");
                if let LedgerError::BatchCommitFailed { line, source } = &e {
                    if let Err(record) = self.record_failure(draft.id, format!("line {line}: {source}")).await {
                        warn!(batch_id = %draft.id, error = %record, "failed to record aborted commit");
                    }
                }
                Err(e)
            }
        }
    }

    async fn commit_in(&self, tx: &mut S::Tx, batch_id: BatchId, valid: &[&BatchRow]) -> LedgerResult<Batch> {
        let locks = self.ledger.locks();
        let mut batch = locks
            .lock_batch(tx, batch_id)
            .await?
            .ok_or(LedgerError::BatchNotFound(batch_id))?;
        batch.ensure_draft("commit")?;

        let mut first_line: BTreeMap<StockKey, usize> = BTreeMap::new();
        for row in valid {
            if let Some(key) = row.stock_key() {
                first_line.entry(key).or_insert(row.line);
            }
        }
        for (key, line) in &first_line {
            locks.lock_row(tx, key).await.map_err(|source| LedgerError::BatchCommitFailed {
                line: *line,
                source: Box::new(source),
            })?;
        }

        for row in valid {
            self.apply_row(tx, &batch, row)
                .await
                .map_err(|source| LedgerError::BatchCommitFailed {
                    line: row.line,
                    source: Box::new(source),
                })?;
        }

        batch.mark_processed(valid.len(), Utc::now())?;
        tx.put_batch(&batch).await?;
        Ok(batch)
    }

    /// Note an aborted commit on the draft header, unless it already left
    /// draft in the meantime.
    async fn record_failure(&self, batch_id: BatchId, error: String) -> LedgerResult<()> {
        let mut tx = self.ledger.begin().await?;
        let result = async {
            if let Some(mut batch) = self.ledger.locks().lock_batch(&mut tx, batch_id).await? {
                if batch.mark_commit_failed(error).is_ok() {
                    tx.put_batch(&batch).await?;
                }
            }
            Ok::<_, LedgerError>(())
        }
        .await;

        match result {
            Ok(()) => Ok(tx.commit().await?),
            Err(e) => {
                rollback_quietly(tx).await;
                Err(e)
            }
        }
    }

    async fn apply_row(&self, tx: &mut S::Tx, batch: &Batch, row: &BatchRow) -> LedgerResult<()> {
        let (Some(key), Some(kind)) = (row.stock_key(), row.kind) else {
            return Err(LedgerError::validation(format!(
                "line {} is missing a resolved product, warehouse or operation",
                row.line
            )));
        };
        let mut metadata = MovementMetadata::new(batch.user_id)
            .with_motive(row.motive.clone())
            .in_batch(batch.id);
        if let Some(obs) = &row.observation {
            metadata = metadata.with_note(obs.clone());
        }
        self.ledger.apply_in(tx, &key, row.quantity, kind, metadata).await?;
        Ok(())
    }

    /// Move a draft batch to `cancelled`.
    #[instrument(skip(self), err)]
    pub async fn cancel(&self, batch_id: BatchId) -> LedgerResult<Batch> {
        let mut tx = self.ledger.begin().await?;
        let result = async {
            let mut batch = self
                .ledger
                .locks()
                .lock_batch(&mut tx, batch_id)
                .await?
                .ok_or(LedgerError::BatchNotFound(batch_id))?;
            batch.cancel()?;
            tx.put_batch(&batch).await?;
            Ok::<_, LedgerError>(batch)
        }
        .await;

        match result {
            Ok(batch) => {
                tx.commit().await?;
                info!(batch_id = %batch_id, "batch cancelled");
                Ok(batch)
            }
            Err(e) => {
                rollback_quietly(tx).await;
                Err(e)
            }
        }
    }

    async fn save(&self, batch: &Batch) -> LedgerResult<()> {
        let mut tx = self.ledger.begin().await?;
        if let Err(e) = tx.put_batch(batch).await {
            rollback_quietly(tx).await;
            return Err(e.into());
        }
        tx.commit().await?;
        Ok(())
    }
}

use crate::error::PipelineError;
use crate::parser::RawEvent;
use crate::spool::Spool;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::{btree_map, BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct ConsolidationOutcome {
    pub merged: usize,
    pub skipped: usize,
    pub operators_added: usize,
    pub message: String,
}

/// Merges the spool into the store: drain, dedup per operator/day
/// (latest record_time wins), reconcile operator names to ids, insert
/// within one transaction, then clear the spool.
///
/// Non-reentrant: a run that starts while another is in flight is skipped,
/// never executed in parallel.
pub struct Consolidator {
    pool: SqlitePool,
    spool: Spool,
    gate: Arc<Mutex<()>>,
}

impl Consolidator {
    pub fn new(pool: SqlitePool, spool: Spool) -> Self {
        Self {
            pool,
            spool,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub async fn run(&self) -> Result<ConsolidationOutcome, PipelineError> {
        let Ok(_guard) = self.gate.try_lock() else {
            return Ok(ConsolidationOutcome {
                merged: 0,
                skipped: 0,
                operators_added: 0,
                message: "consolidation already in flight; skipped".to_string(),
            });
        };

        let records = self.spool.drain()?;
        if records.is_empty() {
            return Ok(ConsolidationOutcome {
                merged: 0,
                skipped: 0,
                operators_added: 0,
                message: "no pending feed records".to_string(),
            });
        }
        let drained = records.len();

        let deduped = dedupe_latest(records);
        verify_one_per_day(&deduped)?;

        let mut tx = self.pool.begin().await?;

        let names: BTreeSet<&str> = deduped.iter().map(|e| e.operator_name.as_str()).collect();
        let mut operator_ids: HashMap<String, i64> = HashMap::new();
        let mut operators_added = 0usize;
        for name in names {
            let existing: Option<i64> =
                sqlx::query_scalar("SELECT id FROM operator WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&mut *tx)
                    .await?;
            let id = match existing {
                Some(id) => id,
                None => {
                    let id: i64 =
                        sqlx::query_scalar("INSERT INTO operator (name) VALUES (?) RETURNING id")
                            .bind(name)
                            .fetch_one(&mut *tx)
                            .await?;
                    operators_added += 1;
                    tracing::info!(operator = %name, id, "added operator");
                    id
                }
            };
            operator_ids.insert(name.to_string(), id);
        }

        let mut merged = 0usize;
        let mut skipped = 0usize;
        for event in &deduped {
            let Some(operator_id) = operator_ids.get(&event.operator_name) else {
                tracing::warn!(
                    operator = %event.operator_name,
                    "no operator id after reconciliation; dropping record"
                );
                continue;
            };
            let record_date = event.record_date.to_string();
            let record_time = event.record_time.to_string();

            // Already superseded by an equal-or-newer row for the same day?
            // Skipping here makes replay of the same spool a no-op; genuinely
            // stale duplicates are the pruner's to collapse.
            let newest: Option<String> = sqlx::query_scalar(
                "SELECT MAX(record_time) FROM performance WHERE operator_id = ? AND record_date = ?",
            )
            .bind(operator_id)
            .bind(&record_date)
            .fetch_one(&mut *tx)
            .await?;
            if newest.as_deref() >= Some(record_time.as_str()) {
                skipped += 1;
                continue;
            }

            sqlx::query(
                "INSERT INTO performance (operator_id, ppm, record_date, record_time) VALUES (?, ?, ?, ?)",
            )
            .bind(operator_id)
            .bind(event.ppm)
            .bind(&record_date)
            .bind(&record_time)
            .execute(&mut *tx)
            .await?;
            merged += 1;
        }

        tx.commit().await?;
        // Only now is it safe to give up the spooled copy.
        self.spool.clear()?;

        let message = format!(
            "consolidated {drained} spooled records into {merged} day rows ({skipped} already superseded, {operators_added} new operators)"
        );
        tracing::info!(merged, skipped, operators_added, "consolidation committed");
        Ok(ConsolidationOutcome {
            merged,
            skipped,
            operators_added,
            message,
        })
    }
}

/// Collapse to one record per (operator, day), keeping the greatest
/// record_time. On an exact tie the later-appended record wins.
pub fn dedupe_latest(records: Vec<RawEvent>) -> Vec<RawEvent> {
    let mut latest: BTreeMap<(String, NaiveDate), RawEvent> = BTreeMap::new();
    for event in records {
        let key = (event.operator_name.clone(), event.record_date);
        match latest.entry(key) {
            btree_map::Entry::Occupied(mut slot) => {
                if event.record_time >= slot.get().record_time {
                    slot.insert(event);
                }
            }
            btree_map::Entry::Vacant(slot) => {
                slot.insert(event);
            }
        }
    }
    latest.into_values().collect()
}

/// Post-dedup check that each (operator, day) appears exactly once.
pub fn verify_one_per_day(records: &[RawEvent]) -> Result<(), PipelineError> {
    let mut seen: HashSet<(&str, NaiveDate)> = HashSet::new();
    for event in records {
        if !seen.insert((event.operator_name.as_str(), event.record_date)) {
            return Err(PipelineError::ConsolidationInvariantViolation(format!(
                "{} has more than one record for {}",
                event.operator_name, event.record_date
            )));
        }
    }
    Ok(())
}

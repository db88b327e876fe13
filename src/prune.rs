use crate::error::PipelineError;
use sqlx::SqlitePool;

#[derive(Debug)]
pub struct PruneOutcome {
    pub groups: usize,
    pub deleted: u64,
    pub message: String,
}

const DUPLICATE_GROUPS: &str = "
    SELECT operator_id, record_date
    FROM performance
    GROUP BY operator_id, record_date
    HAVING COUNT(*) > 1
";

/// Corrective pass over the store: collapse every (operator, day) group to
/// its single latest row. Idempotent; safe to run on any schedule,
/// independent of consolidation.
///
/// Tie on record_time is broken toward the most recently inserted row, so
/// the pass always converges on exactly one row per group.
pub async fn run_prune(pool: &SqlitePool) -> Result<PruneOutcome, PipelineError> {
    let mut tx = pool.begin().await?;

    let groups: Vec<(i64, String)> = sqlx::query_as(DUPLICATE_GROUPS).fetch_all(&mut *tx).await?;
    if groups.is_empty() {
        return Ok(PruneOutcome {
            groups: 0,
            deleted: 0,
            message: "no duplicate day records".to_string(),
        });
    }

    let mut deleted = 0u64;
    for (operator_id, record_date) in &groups {
        let result = sqlx::query(
            "DELETE FROM performance
             WHERE operator_id = ? AND record_date = ?
               AND rowid NOT IN (
                   SELECT rowid FROM performance
                   WHERE operator_id = ? AND record_date = ?
                   ORDER BY record_time DESC, rowid DESC
                   LIMIT 1
               )",
        )
        .bind(operator_id)
        .bind(record_date)
        .bind(operator_id)
        .bind(record_date)
        .execute(&mut *tx)
        .await?;
        deleted += result.rows_affected();
        tracing::debug!(
            operator_id = *operator_id,
            record_date = %record_date,
            "collapsed duplicate day records"
        );
    }

    // If anything still holds more than one row the deletion logic is wrong;
    // surface it rather than commit a half-repair.
    let residual: Option<(i64, String)> = sqlx::query_as(DUPLICATE_GROUPS)
        .fetch_optional(&mut *tx)
        .await?;
    if let Some((operator_id, record_date)) = residual {
        return Err(PipelineError::PruneInvariantViolation(format!(
            "operator {operator_id} still has multiple records for {record_date}"
        )));
    }

    tx.commit().await?;
    let message = format!(
        "pruned {deleted} duplicate rows across {} operator days",
        groups.len()
    );
    tracing::info!(groups = groups.len(), deleted, "prune committed");
    Ok(PruneOutcome {
        groups: groups.len(),
        deleted,
        message,
    })
}

use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::ids::new_record_id;
use crate::models::SavedReport;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, instrument};

fn row_to_report(row: &Row<'_>) -> rusqlite::Result<SavedReport> {
    Ok(SavedReport {
        id: row.get(0)?,
        title: row.get(1)?,
        kind: row.get(2)?,
        period_start: row.get(3)?,
        period_end: row.get(4)?,
        data: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Stores a computed report snapshot so it can be reopened without
/// recomputation. The snapshot itself is opaque JSON produced elsewhere.
#[instrument(skip(pool, data))]
pub async fn add_saved_report(
    pool: &DbPool,
    title: &str,
    kind: &str,
    period_start: Option<String>,
    period_end: Option<String>,
    data: &str,
) -> Result<SavedReport> {
    let report = SavedReport {
        id: new_record_id(),
        title: title.to_string(),
        kind: kind.to_string(),
        period_start,
        period_end,
        data: data.to_string(),
        created_at: Utc::now(),
    };
    insert_saved_report(pool, &report).await?;
    Ok(report)
}

pub async fn insert_saved_report(pool: &DbPool, report: &SavedReport) -> Result<()> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO saved_reports (id, title, kind, period_start, period_end, data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    stmt.insert(params![
        report.id,
        report.title,
        report.kind,
        report.period_start,
        report.period_end,
        report.data,
        report.created_at,
    ])?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_saved_report(pool: &DbPool, id: &str) -> Result<Option<SavedReport>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, title, kind, period_start, period_end, data, created_at
         FROM saved_reports WHERE id = ?1",
    )?;
    Ok(stmt.query_row(params![id], row_to_report).optional()?)
}

#[instrument(skip(pool))]
pub async fn list_saved_reports(pool: &DbPool) -> Result<Vec<SavedReport>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, title, kind, period_start, period_end, data, created_at
         FROM saved_reports ORDER BY created_at DESC",
    )?;
    let iter = stmt.query_map([], row_to_report)?;
    let mut reports = Vec::new();
    for report in iter {
        reports.push(report.map_err(|e| Error::Database(format!("Failed to map report row: {e}")))?);
    }
    debug!("Fetched {} saved reports.", reports.len());
    Ok(reports)
}

#[instrument(skip(pool))]
pub async fn delete_saved_report(pool: &DbPool, id: &str) -> Result<usize> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute("DELETE FROM saved_reports WHERE id = ?1", params![id])?;
    Ok(rows_affected)
}

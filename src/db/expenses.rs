use crate::blobs::BlobStore;
use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::ids::new_record_id;
use crate::models::Expense;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info, instrument};

fn row_to_expense(row: &Row<'_>) -> rusqlite::Result<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        category: row.get(1)?,
        description: row.get(2)?,
        amount: row.get(3)?,
        date: row.get(4)?,
        receipt_image: row.get(5)?,
        notes: row.get(6)?,
    })
}

/// Records a new expense.
///
/// # Errors
///
/// Returns `Error::Database` if the amount is negative, on lock failures, or
/// on insert failures.
#[instrument(skip(pool))]
pub async fn add_expense(
    pool: &DbPool,
    category: &str,
    description: Option<String>,
    amount: f64,
    date: &str,
    receipt_image: Option<String>,
    notes: Option<String>,
) -> Result<Expense> {
    if amount < 0.0 {
        return Err(Error::Database("Expense amount cannot be negative.".to_string()));
    }
    let expense = Expense {
        id: new_record_id(),
        category: category.to_string(),
        description,
        amount,
        date: date.to_string(),
        receipt_image,
        notes,
    };
    insert_expense(pool, &expense).await?;
    info!("Added expense {} ({}: {})", expense.id, category, amount);
    Ok(expense)
}

pub async fn insert_expense(pool: &DbPool, expense: &Expense) -> Result<()> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO expenses (id, category, description, amount, date, receipt_image, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    stmt.insert(params![
        expense.id,
        expense.category,
        expense.description,
        expense.amount,
        expense.date,
        expense.receipt_image,
        expense.notes,
    ])?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_expense(pool: &DbPool, id: &str) -> Result<Option<Expense>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, category, description, amount, date, receipt_image, notes
         FROM expenses WHERE id = ?1",
    )?;
    let expense = stmt.query_row(params![id], row_to_expense).optional()?;
    Ok(expense)
}

/// Lists all expenses, most recent first.
#[instrument(skip(pool))]
pub async fn list_expenses(pool: &DbPool) -> Result<Vec<Expense>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, category, description, amount, date, receipt_image, notes
         FROM expenses ORDER BY date DESC",
    )?;
    let iter = stmt.query_map([], row_to_expense)?;
    let mut expenses = Vec::new();
    for expense in iter {
        expenses.push(expense.map_err(|e| Error::Database(format!("Failed to map expense row: {e}")))?);
    }
    debug!("Fetched {} expenses.", expenses.len());
    Ok(expenses)
}

#[instrument(skip(pool, expense))]
pub async fn update_expense(pool: &DbPool, expense: &Expense) -> Result<usize> {
    if expense.amount < 0.0 {
        return Err(Error::Database("Expense amount cannot be negative.".to_string()));
    }
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute(
        "UPDATE expenses SET category = ?1, description = ?2, amount = ?3, date = ?4,
                receipt_image = ?5, notes = ?6
         WHERE id = ?7",
        params![
            expense.category,
            expense.description,
            expense.amount,
            expense.date,
            expense.receipt_image,
            expense.notes,
            expense.id,
        ],
    )?;
    Ok(rows_affected)
}

/// Deletes an expense and discards its receipt blob best-effort.
#[instrument(skip(pool, blobs))]
pub async fn delete_expense(pool: &DbPool, blobs: &BlobStore, id: &str) -> Result<usize> {
    let receipt: Option<Option<String>>;
    let rows_affected;
    {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
        receipt = conn
            .query_row(
                "SELECT receipt_image FROM expenses WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        rows_affected = conn.execute("DELETE FROM expenses WHERE id = ?1", params![id])?;
    }
    if rows_affected > 0 {
        if let Some(Some(path)) = receipt {
            blobs.discard(&path).await;
        }
    }
    info!("Deleted expense '{}' ({} rows)", id, rows_affected);
    Ok(rows_affected)
}

/// Sum of expenses for a month, computed in SQL.
#[instrument(skip(pool))]
pub async fn monthly_expense_total(pool: &DbPool, year: i32, month: u32) -> Result<f64> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0.0) FROM expenses WHERE strftime('%Y-%m', date) = ?1",
        params![format!("{year:04}-{month:02}")],
        |row| row.get(0),
    )?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{init_test_tracing, setup_test_db};
    use crate::errors::Result;

    #[tokio::test]
    async fn test_add_list_and_monthly_total() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;

        add_expense(&pool, "transporte", None, 40.0, "2024-06-10", None, None).await?;
        add_expense(&pool, "materiales", Some("Listones".to_string()), 25.5, "2024-06-12", None, None)
            .await?;
        add_expense(&pool, "materiales", None, 10.0, "2024-07-01", None, None).await?;

        assert_eq!(list_expenses(&pool).await?.len(), 3);
        assert_eq!(monthly_expense_total(&pool, 2024, 6).await?, 65.5);
        assert_eq!(monthly_expense_total(&pool, 2024, 5).await?, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;
        let result = add_expense(&pool, "otros", None, -5.0, "2024-06-10", None, None).await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_discards_receipt() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;
        let blob_dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(blob_dir.path().to_path_buf());
        blobs.init().await?;

        let source = blob_dir.path().join("receipt.jpg");
        tokio::fs::write(&source, b"receiptbytes").await?;
        let internal = blobs.copy_to_internal(source.to_str().unwrap()).await?;

        let expense = add_expense(
            &pool,
            "renta",
            None,
            300.0,
            "2024-06-15",
            Some(internal.clone()),
            None,
        )
        .await?;

        delete_expense(&pool, &blobs, &expense.id).await?;
        assert!(get_expense(&pool, &expense.id).await?.is_none());
        assert!(!blobs.exists(&internal).await);
        Ok(())
    }
}

use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::ids::new_record_id;
use crate::models::{
    ClientInfo, LineItem, RentalDetail, Transaction, TransactionKind, parse_line_items,
};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info, instrument, warn};

/// Rental/decoration terms captured alongside a new transaction.
#[derive(Debug, Clone)]
pub struct RentalTerms {
    pub status: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub deposit: f64,
}

/// Arguments for creating a ledger entry.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub quantity: i64,
    pub unit_price: f64,
    pub discount: f64,
    pub total_amount: f64,
    pub customer_name: Option<String>,
    pub client_data: ClientInfo,
    pub notes: Option<String>,
    pub date: String,
    pub items: Vec<LineItem>,
    pub is_installment: bool,
    pub total_price: f64,
    pub amount_paid: f64,
    /// Side-record terms; only meaningful for rentals and decorations.
    pub terms: Option<RentalTerms>,
}

impl Default for NewTransaction {
    fn default() -> Self {
        Self {
            kind: TransactionKind::Sale,
            product_id: None,
            product_name: None,
            quantity: 1,
            unit_price: 0.0,
            discount: 0.0,
            total_amount: 0.0,
            customer_name: None,
            client_data: ClientInfo::default(),
            notes: None,
            date: String::new(),
            items: Vec::new(),
            is_installment: false,
            total_price: 0.0,
            amount_paid: 0.0,
            terms: None,
        }
    }
}

// Raw column values; JSON payloads and the kind tag are decoded afterwards
// so parse failures surface as crate errors, not row-mapping panics.
struct RawTransaction {
    id: String,
    kind: String,
    product_id: Option<String>,
    product_name: Option<String>,
    quantity: i64,
    unit_price: f64,
    discount: f64,
    total_amount: f64,
    customer_name: Option<String>,
    client_data: String,
    notes: Option<String>,
    date: String,
    items: String,
    is_installment: bool,
    total_price: f64,
    amount_paid: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawTransaction> {
    Ok(RawTransaction {
        id: row.get(0)?,
        kind: row.get(1)?,
        product_id: row.get(2)?,
        product_name: row.get(3)?,
        quantity: row.get(4)?,
        unit_price: row.get(5)?,
        discount: row.get(6)?,
        total_amount: row.get(7)?,
        customer_name: row.get(8)?,
        client_data: row.get(9)?,
        notes: row.get(10)?,
        date: row.get(11)?,
        items: row.get(12)?,
        is_installment: row.get(13)?,
        total_price: row.get(14)?,
        amount_paid: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn finish_transaction(raw: RawTransaction) -> Result<Transaction> {
    Ok(Transaction {
        id: raw.id,
        kind: TransactionKind::parse(&raw.kind)?,
        product_id: raw.product_id,
        product_name: raw.product_name,
        quantity: raw.quantity,
        unit_price: raw.unit_price,
        discount: raw.discount,
        total_amount: raw.total_amount,
        customer_name: raw.customer_name,
        client_data: ClientInfo::parse(&raw.client_data)?,
        notes: raw.notes,
        date: raw.date,
        items: parse_line_items(&raw.items)?,
        is_installment: raw.is_installment,
        total_price: raw.total_price,
        amount_paid: raw.amount_paid,
        created_at: raw.created_at,
        updated_at: raw.updated_at,
    })
}

const TRANSACTION_COLUMNS: &str = "id, kind, product_id, product_name, quantity, unit_price,
         discount, total_amount, customer_name, client_data, notes, date, items,
         is_installment, total_price, amount_paid, created_at, updated_at";

fn detail_table(kind: TransactionKind) -> Option<&'static str> {
    match kind {
        TransactionKind::Sale => None,
        TransactionKind::Rental => Some("rentals"),
        TransactionKind::Decoration => Some("decorations"),
    }
}

/// Creates a new ledger entry, plus its rental/decoration side record when
/// terms are supplied.
///
/// # Errors
///
/// Returns `Error::Database` on negative amounts, lock failures, or insert
/// failures. Terms passed with a plain sale are ignored with a warning.
#[instrument(skip(pool, args))]
pub async fn add_transaction(pool: &DbPool, args: &NewTransaction) -> Result<Transaction> {
    if args.total_amount < 0.0 || args.unit_price < 0.0 {
        return Err(Error::Database(
            "Transaction amounts cannot be negative.".to_string(),
        ));
    }
    let now = Utc::now();
    let transaction = Transaction {
        id: new_record_id(),
        kind: args.kind,
        product_id: args.product_id.clone(),
        product_name: args.product_name.clone(),
        quantity: args.quantity,
        unit_price: args.unit_price,
        discount: args.discount,
        total_amount: args.total_amount,
        customer_name: args.customer_name.clone(),
        client_data: args.client_data.clone(),
        notes: args.notes.clone(),
        date: args.date.clone(),
        items: args.items.clone(),
        is_installment: args.is_installment,
        total_price: args.total_price,
        amount_paid: args.amount_paid,
        created_at: now,
        updated_at: now,
    };
    insert_transaction(pool, &transaction).await?;

    if let Some(terms) = &args.terms {
        match detail_table(args.kind) {
            Some(_) => {
                let detail = RentalDetail {
                    transaction_id: transaction.id.clone(),
                    status: terms.status.clone(),
                    start_date: terms.start_date.clone(),
                    end_date: terms.end_date.clone(),
                    deposit: terms.deposit,
                };
                insert_detail(pool, args.kind, &detail).await?;
            }
            None => warn!("Ignoring rental terms on a sale transaction."),
        }
    }

    info!(
        "Created {} transaction {} for {}",
        transaction.kind.as_str(),
        transaction.id,
        transaction.total_amount
    );
    Ok(transaction)
}

/// Inserts a transaction row as-is, preserving id and timestamps. Used by
/// [`add_transaction`], the quotation converter, and the backup importer.
#[instrument(skip(pool, transaction))]
pub async fn insert_transaction(pool: &DbPool, transaction: &Transaction) -> Result<()> {
    let client_data = serde_json::to_string(&transaction.client_data)?;
    let items = serde_json::to_string(&transaction.items)?;
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO transactions (id, kind, product_id, product_name, quantity, unit_price,
                discount, total_amount, customer_name, client_data, notes, date, items,
                is_installment, total_price, amount_paid, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
    )?;
    stmt.insert(params![
        transaction.id,
        transaction.kind.as_str(),
        transaction.product_id,
        transaction.product_name,
        transaction.quantity,
        transaction.unit_price,
        transaction.discount,
        transaction.total_amount,
        transaction.customer_name,
        client_data,
        transaction.notes,
        transaction.date,
        items,
        transaction.is_installment,
        transaction.total_price,
        transaction.amount_paid,
        transaction.created_at,
        transaction.updated_at,
    ])?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_transaction(pool: &DbPool, id: &str) -> Result<Option<Transaction>> {
    let raw = {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1"
        ))?;
        stmt.query_row(params![id], row_to_raw).optional()?
    };
    raw.map(finish_transaction).transpose()
}

/// Lists all transactions, most recent first.
#[instrument(skip(pool))]
pub async fn list_transactions(pool: &DbPool) -> Result<Vec<Transaction>> {
    list_transactions_filtered(pool, None).await
}

#[instrument(skip(pool))]
pub async fn list_transactions_by_kind(
    pool: &DbPool,
    kind: TransactionKind,
) -> Result<Vec<Transaction>> {
    list_transactions_filtered(pool, Some(kind)).await
}

async fn list_transactions_filtered(
    pool: &DbPool,
    kind: Option<TransactionKind>,
) -> Result<Vec<Transaction>> {
    let raws = {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
        let mut raws = Vec::new();
        match kind {
            Some(kind) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions
                     WHERE kind = ?1 ORDER BY date DESC, created_at DESC"
                ))?;
                let iter = stmt.query_map(params![kind.as_str()], row_to_raw)?;
                for raw in iter {
                    raws.push(raw.map_err(|e| {
                        Error::Database(format!("Failed to map transaction row: {e}"))
                    })?);
                }
            }
            None => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions
                     ORDER BY date DESC, created_at DESC"
                ))?;
                let iter = stmt.query_map([], row_to_raw)?;
                for raw in iter {
                    raws.push(raw.map_err(|e| {
                        Error::Database(format!("Failed to map transaction row: {e}"))
                    })?);
                }
            }
        }
        raws
    };
    let mut transactions = Vec::with_capacity(raws.len());
    for raw in raws {
        transactions.push(finish_transaction(raw)?);
    }
    debug!("Fetched {} transactions.", transactions.len());
    Ok(transactions)
}

/// Updates a transaction in place, refreshing `updated_at`.
#[instrument(skip(pool, transaction))]
pub async fn update_transaction(pool: &DbPool, transaction: &Transaction) -> Result<usize> {
    let client_data = serde_json::to_string(&transaction.client_data)?;
    let items = serde_json::to_string(&transaction.items)?;
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute(
        "UPDATE transactions SET kind = ?1, product_id = ?2, product_name = ?3, quantity = ?4,
                unit_price = ?5, discount = ?6, total_amount = ?7, customer_name = ?8,
                client_data = ?9, notes = ?10, date = ?11, items = ?12, is_installment = ?13,
                total_price = ?14, amount_paid = ?15, updated_at = ?16
         WHERE id = ?17",
        params![
            transaction.kind.as_str(),
            transaction.product_id,
            transaction.product_name,
            transaction.quantity,
            transaction.unit_price,
            transaction.discount,
            transaction.total_amount,
            transaction.customer_name,
            client_data,
            transaction.notes,
            transaction.date,
            items,
            transaction.is_installment,
            transaction.total_price,
            transaction.amount_paid,
            Utc::now(),
            transaction.id,
        ],
    )?;
    Ok(rows_affected)
}

/// Records a payment against an installment transaction.
///
/// # Returns
///
/// Returns the new `amount_paid` after the payment.
#[instrument(skip(pool))]
pub async fn record_installment_payment(pool: &DbPool, id: &str, amount: f64) -> Result<f64> {
    if amount <= 0.0 {
        return Err(Error::Database("Payment amount must be positive.".to_string()));
    }
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute(
        "UPDATE transactions SET amount_paid = amount_paid + ?1, updated_at = ?2
         WHERE id = ?3 AND is_installment = TRUE",
        params![amount, Utc::now(), id],
    )?;
    if rows_affected == 0 {
        return Err(Error::NotFound(format!("installment transaction '{id}'")));
    }
    let paid: f64 = conn.query_row(
        "SELECT amount_paid FROM transactions WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    info!("Recorded payment of {} on {}, total paid {}", amount, id, paid);
    Ok(paid)
}

/// Deletes a transaction. The rental/decoration side record goes with it via
/// ON DELETE CASCADE, so a detail row can never outlive its transaction.
#[instrument(skip(pool))]
pub async fn delete_transaction(pool: &DbPool, id: &str) -> Result<usize> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute("DELETE FROM transactions WHERE id = ?1", params![id])?;
    info!("Deleted transaction '{}' ({} rows)", id, rows_affected);
    Ok(rows_affected)
}

/// Sum of `total_amount` for a month, optionally narrowed to one kind.
/// The aggregation runs in SQL, not application code.
#[instrument(skip(pool))]
pub async fn monthly_revenue(
    pool: &DbPool,
    kind: Option<TransactionKind>,
    year: i32,
    month: u32,
) -> Result<f64> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let month_pattern = format!("{year:04}-{month:02}");
    let total: f64 = match kind {
        Some(kind) => conn.query_row(
            "SELECT COALESCE(SUM(total_amount), 0.0) FROM transactions
             WHERE kind = ?1 AND strftime('%Y-%m', date) = ?2",
            params![kind.as_str(), month_pattern],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COALESCE(SUM(total_amount), 0.0) FROM transactions
             WHERE strftime('%Y-%m', date) = ?1",
            params![month_pattern],
            |row| row.get(0),
        )?,
    };
    debug!("Revenue for {}: {}", month_pattern, total);
    Ok(total)
}

fn row_to_detail(row: &Row<'_>) -> rusqlite::Result<RentalDetail> {
    Ok(RentalDetail {
        transaction_id: row.get(0)?,
        status: row.get(1)?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        deposit: row.get(4)?,
    })
}

/// Inserts a rental/decoration side record. 1:1 with its transaction: the
/// table's primary key is the transaction id.
#[instrument(skip(pool, detail))]
pub async fn insert_detail(
    pool: &DbPool,
    kind: TransactionKind,
    detail: &RentalDetail,
) -> Result<()> {
    let table = detail_table(kind).ok_or_else(|| {
        Error::Database("Sale transactions have no rental/decoration detail.".to_string())
    })?;
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    conn.execute(
        &format!(
            "INSERT INTO {table} (transaction_id, status, start_date, end_date, deposit)
             VALUES (?1, ?2, ?3, ?4, ?5)"
        ),
        params![
            detail.transaction_id,
            detail.status,
            detail.start_date,
            detail.end_date,
            detail.deposit,
        ],
    )?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_detail(
    pool: &DbPool,
    kind: TransactionKind,
    transaction_id: &str,
) -> Result<Option<RentalDetail>> {
    let table = detail_table(kind).ok_or_else(|| {
        Error::Database("Sale transactions have no rental/decoration detail.".to_string())
    })?;
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let detail = conn
        .query_row(
            &format!(
                "SELECT transaction_id, status, start_date, end_date, deposit
                 FROM {table} WHERE transaction_id = ?1"
            ),
            params![transaction_id],
            row_to_detail,
        )
        .optional()?;
    Ok(detail)
}

/// Lists every side record of a kind; the exporter serializes these.
#[instrument(skip(pool))]
pub async fn list_details(pool: &DbPool, kind: TransactionKind) -> Result<Vec<RentalDetail>> {
    let table = detail_table(kind).ok_or_else(|| {
        Error::Database("Sale transactions have no rental/decoration detail.".to_string())
    })?;
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT transaction_id, status, start_date, end_date, deposit
         FROM {table} ORDER BY transaction_id ASC"
    ))?;
    let iter = stmt.query_map([], row_to_detail)?;
    let mut details = Vec::new();
    for detail in iter {
        details.push(detail.map_err(|e| Error::Database(format!("Failed to map detail row: {e}")))?);
    }
    Ok(details)
}

/// Updates the status of a rental/decoration (e.g. "active" → "returned").
#[instrument(skip(pool))]
pub async fn update_detail_status(
    pool: &DbPool,
    kind: TransactionKind,
    transaction_id: &str,
    status: &str,
) -> Result<usize> {
    let table = detail_table(kind).ok_or_else(|| {
        Error::Database("Sale transactions have no rental/decoration detail.".to_string())
    })?;
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute(
        &format!("UPDATE {table} SET status = ?1 WHERE transaction_id = ?2"),
        params![status, transaction_id],
    )?;
    Ok(rows_affected)
}

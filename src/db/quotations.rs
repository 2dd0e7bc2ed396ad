use crate::db::DbPool;
use crate::db::transactions::{NewTransaction, add_transaction};
use crate::errors::{Error, Result};
use crate::ids::new_record_id;
use crate::models::{
    ClientInfo, LineItem, Quotation, QuotationStatus, Transaction, TransactionKind,
    parse_line_items,
};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info, instrument};

/// Arguments for creating a quotation.
#[derive(Debug, Clone)]
pub struct NewQuotation {
    pub kind: TransactionKind,
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
}

struct RawQuotation {
    id: String,
    quotation_number: String,
    kind: String,
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
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawQuotation> {
    Ok(RawQuotation {
        id: row.get(0)?,
        quotation_number: row.get(1)?,
        kind: row.get(2)?,
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
        status: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn finish_quotation(raw: RawQuotation) -> Result<Quotation> {
    Ok(Quotation {
        id: raw.id,
        quotation_number: raw.quotation_number,
        kind: TransactionKind::parse(&raw.kind)?,
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
        status: QuotationStatus::parse(&raw.status)?,
        created_at: raw.created_at,
        updated_at: raw.updated_at,
    })
}

const QUOTATION_COLUMNS: &str = "id, quotation_number, kind, product_name, quantity, unit_price,
         discount, total_amount, customer_name, client_data, notes, date, items, status,
         created_at, updated_at";

/// Creates a new pending quotation with a sequential human-facing number.
#[instrument(skip(pool, args))]
pub async fn add_quotation(pool: &DbPool, args: &NewQuotation) -> Result<Quotation> {
    let number = {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
        let existing: i64 =
            conn.query_row("SELECT COUNT(*) FROM quotations", [], |row| row.get(0))?;
        format!("COT-{:04}", existing + 1)
    };

    let now = Utc::now();
    let quotation = Quotation {
        id: new_record_id(),
        quotation_number: number,
        kind: args.kind,
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
        status: QuotationStatus::Pending,
        created_at: now,
        updated_at: now,
    };
    insert_quotation(pool, &quotation).await?;
    info!(
        "Added quotation {} ({})",
        quotation.quotation_number, quotation.id
    );
    Ok(quotation)
}

pub async fn insert_quotation(pool: &DbPool, quotation: &Quotation) -> Result<()> {
    let client_data = serde_json::to_string(&quotation.client_data)?;
    let items = serde_json::to_string(&quotation.items)?;
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO quotations (id, quotation_number, kind, product_name, quantity, unit_price,
                discount, total_amount, customer_name, client_data, notes, date, items, status,
                created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
    )?;
    stmt.insert(params![
        quotation.id,
        quotation.quotation_number,
        quotation.kind.as_str(),
        quotation.product_name,
        quotation.quantity,
        quotation.unit_price,
        quotation.discount,
        quotation.total_amount,
        quotation.customer_name,
        client_data,
        quotation.notes,
        quotation.date,
        items,
        quotation.status.as_str(),
        quotation.created_at,
        quotation.updated_at,
    ])?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_quotation(pool: &DbPool, id: &str) -> Result<Option<Quotation>> {
    let raw = {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {QUOTATION_COLUMNS} FROM quotations WHERE id = ?1"
        ))?;
        stmt.query_row(params![id], row_to_raw).optional()?
    };
    raw.map(finish_quotation).transpose()
}

#[instrument(skip(pool))]
pub async fn list_quotations(pool: &DbPool) -> Result<Vec<Quotation>> {
    let raws = {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {QUOTATION_COLUMNS} FROM quotations ORDER BY created_at DESC"
        ))?;
        let iter = stmt.query_map([], row_to_raw)?;
        let mut raws = Vec::new();
        for raw in iter {
            raws.push(raw.map_err(|e| Error::Database(format!("Failed to map quotation row: {e}")))?);
        }
        raws
    };
    let mut quotations = Vec::with_capacity(raws.len());
    for raw in raws {
        quotations.push(finish_quotation(raw)?);
    }
    debug!("Fetched {} quotations.", quotations.len());
    Ok(quotations)
}

/// Converts a pending quotation into a real transaction.
///
/// Two awaited steps: insert the transaction, then mark the quotation
/// converted. Not atomic across the two, consistent with how the rest of
/// the data layer sequences multi-step mutations.
///
/// # Errors
///
/// Returns `Error::NotFound` if the quotation does not exist and
/// `Error::Database` if it was already converted.
#[instrument(skip(pool))]
pub async fn convert_quotation(pool: &DbPool, id: &str) -> Result<Transaction> {
    let quotation = get_quotation(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("quotation '{id}'")))?;
    if quotation.status == QuotationStatus::Converted {
        return Err(Error::Database(format!(
            "Quotation {} was already converted.",
            quotation.quotation_number
        )));
    }

    let transaction = add_transaction(
        pool,
        &NewTransaction {
            kind: quotation.kind,
            product_name: quotation.product_name.clone(),
            quantity: quotation.quantity,
            unit_price: quotation.unit_price,
            discount: quotation.discount,
            total_amount: quotation.total_amount,
            customer_name: quotation.customer_name.clone(),
            client_data: quotation.client_data.clone(),
            notes: quotation.notes.clone(),
            date: quotation.date.clone(),
            items: quotation.items.clone(),
            ..NewTransaction::default()
        },
    )
    .await?;

    {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
        conn.execute(
            "UPDATE quotations SET status = 'converted', updated_at = ?1 WHERE id = ?2",
            params![Utc::now(), id],
        )?;
    }
    info!(
        "Converted quotation {} into transaction {}",
        quotation.quotation_number, transaction.id
    );
    Ok(transaction)
}

#[instrument(skip(pool))]
pub async fn delete_quotation(pool: &DbPool, id: &str) -> Result<usize> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute("DELETE FROM quotations WHERE id = ?1", params![id])?;
    Ok(rows_affected)
}

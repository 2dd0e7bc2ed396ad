use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::ids::new_record_id;
use crate::models::Note;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info, instrument};

fn row_to_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        date: row.get(3)?,
    })
}

#[instrument(skip(pool, content))]
pub async fn add_note(pool: &DbPool, title: &str, content: &str, date: &str) -> Result<Note> {
    let note = Note {
        id: new_record_id(),
        title: title.to_string(),
        content: content.to_string(),
        date: date.to_string(),
    };
    insert_note(pool, &note).await?;
    info!("Added note '{}' ({})", note.title, note.id);
    Ok(note)
}

pub async fn insert_note(pool: &DbPool, note: &Note) -> Result<()> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO notes (id, title, content, date) VALUES (?1, ?2, ?3, ?4)",
    )?;
    stmt.insert(params![note.id, note.title, note.content, note.date])?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_note(pool: &DbPool, id: &str) -> Result<Option<Note>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt =
        conn.prepare_cached("SELECT id, title, content, date FROM notes WHERE id = ?1")?;
    Ok(stmt.query_row(params![id], row_to_note).optional()?)
}

#[instrument(skip(pool))]
pub async fn list_notes(pool: &DbPool) -> Result<Vec<Note>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt =
        conn.prepare_cached("SELECT id, title, content, date FROM notes ORDER BY date DESC")?;
    let iter = stmt.query_map([], row_to_note)?;
    let mut notes = Vec::new();
    for note in iter {
        notes.push(note.map_err(|e| Error::Database(format!("Failed to map note row: {e}")))?);
    }
    debug!("Fetched {} notes.", notes.len());
    Ok(notes)
}

#[instrument(skip(pool, note))]
pub async fn update_note(pool: &DbPool, note: &Note) -> Result<usize> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute(
        "UPDATE notes SET title = ?1, content = ?2, date = ?3 WHERE id = ?4",
        params![note.title, note.content, note.date, note.id],
    )?;
    Ok(rows_affected)
}

#[instrument(skip(pool))]
pub async fn delete_note(pool: &DbPool, id: &str) -> Result<usize> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute("DELETE FROM notes WHERE id = ?1", params![id])?;
    Ok(rows_affected)
}

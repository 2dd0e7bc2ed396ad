use std::path::Path;

use uuid::Uuid;

/// Generates a fresh record identifier.
///
/// UUID v4 gives global uniqueness per entity kind without coordination;
/// identifiers are immutable once assigned.
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a fresh blob filename, keeping the source file's extension so
/// image viewers and pickers keep recognizing the file.
pub fn new_blob_filename(source: &Path) -> String {
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", Uuid::new_v4().simple(), ext),
        _ => Uuid::new_v4().simple().to_string(),
    }
}

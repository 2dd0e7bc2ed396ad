//! Image blob store: owns every image file under one internal root
//! directory. Records hold paths into this store; the garbage collector
//! reconciles those references against the directory listing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::errors::{Error, Result};
use crate::ids::new_blob_filename;

/// Counters for best-effort deletions. Blob deletion failures never block
/// the user-facing action that triggered them; they land here instead so
/// callers (and tests) can observe how many were attempted and how many
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionStats {
    pub attempted: u64,
    pub failed: u64,
}

#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    deletes_attempted: AtomicU64,
    deletes_failed: AtomicU64,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            deletes_attempted: AtomicU64::new(0),
            deletes_failed: AtomicU64::new(0),
        }
    }

    /// Creates the internal root directory if missing.
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies an externally-sourced file (picker, camera) into the internal
    /// root under a freshly generated unique filename and returns the new
    /// stable path.
    ///
    /// Idempotent for paths already inside the root: resaving an unmodified
    /// reference must not duplicate the file.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the source file does not exist.
    #[instrument(skip(self))]
    pub async fn copy_to_internal(&self, source: &str) -> Result<String> {
        let source_path = Path::new(source);
        let already_internal = source_path.starts_with(&self.root);
        let source_exists = fs::try_exists(source_path).await.unwrap_or(false);

        if already_internal && source_exists {
            debug!("Path already internal, reusing: {}", source);
            return Ok(source.to_string());
        }
        if !source_exists {
            return Err(Error::NotFound(format!("image source '{source}'")));
        }

        let dest = self.root.join(new_blob_filename(source_path));
        fs::copy(source_path, &dest).await?;
        debug!("Copied '{}' into blob store as '{}'", source, dest.display());
        Ok(dest.to_string_lossy().into_owned())
    }

    /// Best-effort deletion of a blob.
    ///
    /// Only paths inside the internal root are deleted; a missing file
    /// counts as already deleted. Failures are logged and recorded in
    /// [`DeletionStats`], never propagated; cleanup must not block the
    /// primary action.
    #[instrument(skip(self))]
    pub async fn discard(&self, path: &str) {
        self.deletes_attempted.fetch_add(1, Ordering::Relaxed);
        let target = Path::new(path);
        if !target.starts_with(&self.root) {
            warn!("Refusing to delete path outside the blob root: {}", path);
            self.deletes_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match fs::remove_file(target).await {
            Ok(()) => debug!("Discarded blob {}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Blob already gone: {}", path);
            }
            Err(e) => {
                warn!("Failed to discard blob {}: {}", path, e);
                self.deletes_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Existence probe; never errors.
    pub async fn exists(&self, path: &str) -> bool {
        fs::try_exists(Path::new(path)).await.unwrap_or(false)
    }

    /// Deletes every file in the internal root whose filename is not in the
    /// used set, returning how many were deleted.
    ///
    /// Matching is by filename, not full path: references may have been
    /// normalized or copied across export/import boundaries where the
    /// directory prefix differs. Callers must flatten *every* reference
    /// source (including serialized canvas payloads) before calling.
    #[instrument(skip(self, used_filenames))]
    pub async fn clean_orphaned(&self, used_filenames: &HashSet<String>) -> Result<usize> {
        let mut deleted = 0usize;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if used_filenames.contains(&file_name) {
                continue;
            }
            self.deletes_attempted.fetch_add(1, Ordering::Relaxed);
            match fs::remove_file(entry.path()).await {
                Ok(()) => deleted += 1,
                // Another operation may have removed it between our listing
                // and the delete; already-gone is fine.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to delete orphan {}: {}", file_name, e);
                    self.deletes_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        info!("Orphan collection deleted {} file(s).", deleted);
        Ok(deleted)
    }

    /// Deletes every file in the internal root. Used by the importer right
    /// before restoring blobs from an archive.
    #[instrument(skip(self))]
    pub async fn wipe(&self) -> Result<usize> {
        self.clean_orphaned(&HashSet::new()).await
    }

    /// Export-preparation helper: copies a referenced blob into
    /// `<staging_root>/images/<kind_dir>/`, keeping its (already unique)
    /// internal filename so repeated exports of the same state produce the
    /// same relative paths.
    ///
    /// Returns the archive-relative path, or `None` when the source file is
    /// missing: a single lost image degrades the backup, it does not abort
    /// it.
    #[instrument(skip(self, staging_root))]
    pub async fn stage_for_export(
        &self,
        source: &str,
        staging_root: &Path,
        kind_dir: &str,
    ) -> Result<Option<String>> {
        let source_path = Path::new(source);
        if !fs::try_exists(source_path).await.unwrap_or(false) {
            warn!("Referenced image missing, exporting as null: {}", source);
            return Ok(None);
        }
        let Some(file_name) = source_path.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            warn!("Reference has no filename, exporting as null: {}", source);
            return Ok(None);
        };

        let dest_dir = staging_root.join("images").join(kind_dir);
        fs::create_dir_all(&dest_dir).await?;
        fs::copy(source_path, dest_dir.join(&file_name)).await?;
        // Forward slashes: archive entry names are platform-independent.
        Ok(Some(format!("images/{kind_dir}/{file_name}")))
    }

    /// Import counterpart of [`stage_for_export`]: copies an unpacked blob
    /// from the staging directory into the internal root under a fresh name
    /// and returns the new internal path, or `None` when the archive lacks
    /// the file.
    #[instrument(skip(self, staging_root))]
    pub async fn restore_from_archive(
        &self,
        staging_root: &Path,
        relative: &str,
    ) -> Result<Option<String>> {
        let mut source = staging_root.to_path_buf();
        for part in relative.split('/') {
            source.push(part);
        }
        if !fs::try_exists(&source).await.unwrap_or(false) {
            warn!("Archive is missing blob '{}', restoring as null", relative);
            return Ok(None);
        }
        let dest = self.root.join(new_blob_filename(&source));
        fs::copy(&source, &dest).await?;
        Ok(Some(dest.to_string_lossy().into_owned()))
    }

    pub fn deletion_stats(&self) -> DeletionStats {
        DeletionStats {
            attempted: self.deletes_attempted.load(Ordering::Relaxed),
            failed: self.deletes_failed.load(Ordering::Relaxed),
        }
    }
}

/// Normalizes a stored reference to the filename the orphan collector
/// matches on.
///
/// Filename-based matching is a deliberate compatibility shim: absolute
/// prefixes change across export/import and device migrations, filenames do
/// not. Two distinct images sharing a filename would collide here, but
/// filenames are random per copy, so the probability is negligible.
pub fn blob_file_name(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("images"));
        store.init().await.unwrap();
        (dir, store)
    }

    async fn write_source(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> String {
        let path = dir.path().join(name);
        fs::write(&path, bytes).await.unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_copy_to_internal_copies_and_is_idempotent() {
        let (dir, store) = setup_store().await;
        let source = write_source(&dir, "photo.jpg", b"jpegbytes").await;

        let internal = store.copy_to_internal(&source).await.unwrap();
        assert!(Path::new(&internal).starts_with(store.root()));
        assert!(store.exists(&internal).await);

        // Calling again on the already-internal path is a no-op.
        let again = store.copy_to_internal(&internal).await.unwrap();
        assert_eq!(again, internal);

        let mut entries = fs::read_dir(store.root()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1, "no duplicate file may be created");
    }

    #[tokio::test]
    async fn test_copy_to_internal_missing_source_is_not_found() {
        let (dir, store) = setup_store().await;
        let missing = dir.path().join("nope.jpg").to_string_lossy().into_owned();
        let result = store.copy_to_internal(&missing).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_discard_is_best_effort_and_scoped_to_root() {
        let (dir, store) = setup_store().await;
        let outside = write_source(&dir, "outside.jpg", b"bytes").await;

        // Outside the root: refused, file untouched.
        store.discard(&outside).await;
        assert!(store.exists(&outside).await);
        assert_eq!(store.deletion_stats(), DeletionStats { attempted: 1, failed: 1 });

        // Missing internal file: treated as already deleted.
        let ghost = store.root().join("ghost.jpg").to_string_lossy().into_owned();
        store.discard(&ghost).await;
        assert_eq!(store.deletion_stats(), DeletionStats { attempted: 2, failed: 1 });

        // Real internal file: deleted.
        let internal = store.copy_to_internal(&outside).await.unwrap();
        store.discard(&internal).await;
        assert!(!store.exists(&internal).await);
        assert_eq!(store.deletion_stats(), DeletionStats { attempted: 3, failed: 1 });
    }

    #[tokio::test]
    async fn test_clean_orphaned_keeps_referenced_files() {
        let (dir, store) = setup_store().await;
        let kept_src = write_source(&dir, "kept.jpg", b"kept").await;
        let orphan_src = write_source(&dir, "orphan.jpg", b"orphan").await;

        let kept = store.copy_to_internal(&kept_src).await.unwrap();
        let orphan = store.copy_to_internal(&orphan_src).await.unwrap();

        let used: HashSet<String> = [blob_file_name(&kept).unwrap()].into();
        let deleted = store.clean_orphaned(&used).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.exists(&kept).await);
        assert!(!store.exists(&orphan).await);

        // Idempotent: a second pass with no intervening mutations deletes nothing.
        let deleted_again = store.clean_orphaned(&used).await.unwrap();
        assert_eq!(deleted_again, 0);
    }

    #[tokio::test]
    async fn test_stage_and_restore_roundtrip() {
        let (dir, store) = setup_store().await;
        let source = write_source(&dir, "arch.png", b"\x89PNG\x00binary\xff").await;
        let internal = store.copy_to_internal(&source).await.unwrap();

        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).await.unwrap();

        let relative = store
            .stage_for_export(&internal, &staging, "products")
            .await
            .unwrap()
            .expect("existing blob must stage");
        assert!(relative.starts_with("images/products/"));

        // Staging twice yields the same relative path (content-stable export).
        let relative_again = store
            .stage_for_export(&internal, &staging, "products")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(relative, relative_again);

        let restored = store
            .restore_from_archive(&staging, &relative)
            .await
            .unwrap()
            .expect("staged blob must restore");
        let original = fs::read(&internal).await.unwrap();
        let roundtripped = fs::read(&restored).await.unwrap();
        assert_eq!(original, roundtripped, "bytes must survive the round trip");
    }

    #[tokio::test]
    async fn test_stage_missing_source_returns_none() {
        let (dir, store) = setup_store().await;
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).await.unwrap();

        let missing = store.root().join("gone.jpg").to_string_lossy().into_owned();
        let staged = store
            .stage_for_export(&missing, &staging, "sections")
            .await
            .unwrap();
        assert!(staged.is_none());

        let restored = store
            .restore_from_archive(&staging, "images/sections/gone.jpg")
            .await
            .unwrap();
        assert!(restored.is_none());
    }
}

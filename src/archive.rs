//! Backup archive container: a gzip-compressed tar holding the JSON
//! manifests and image blob folders written by the exporter.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, info, instrument};

use crate::errors::{Error, Result};

/// Packs a directory tree into a single `.tar.gz` archive.
///
/// Entry names are the paths relative to `source_dir`; file bytes are stored
/// verbatim, so binary blobs survive untouched. Entries are appended in
/// sorted order, making archives of identical trees logically identical.
#[instrument(skip(source_dir, archive_path))]
pub async fn pack(source_dir: &Path, archive_path: &Path) -> Result<()> {
    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    append_dir_recursive(&mut builder, source_dir, Path::new(""))?;

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    info!("Packed '{}' into '{}'", source_dir.display(), archive_path.display());
    Ok(())
}

fn append_dir_recursive(
    builder: &mut tar::Builder<GzEncoder<BufWriter<File>>>,
    dir: &Path,
    prefix: &Path,
) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let path = entry.path();
        let relative = prefix.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            builder.append_dir(&relative, &path)?;
            append_dir_recursive(builder, &path, &relative)?;
        } else {
            builder.append_path_with_name(&path, &relative)?;
        }
    }
    Ok(())
}

/// Unpacks an archive into `dest_dir`, recreating the directory structure.
///
/// Directory entries and file entries are handled distinctly, and a file's
/// parent directories are created on demand; a file entry is never skipped
/// just because the archive lacked an explicit entry for its parent.
///
/// # Errors
///
/// Returns `Error::InvalidArchive` when the file cannot be read as a
/// gzipped tar or an entry name escapes the destination; plain `Error::Io`
/// when writing the extracted files fails.
#[instrument(skip(archive_path, dest_dir))]
pub async fn unpack(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    let entries = archive
        .entries()
        .map_err(|e| Error::InvalidArchive(format!("unreadable archive: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::InvalidArchive(format!("corrupted archive entry: {e}")))?;
        let relative = entry
            .path()
            .map_err(|e| Error::InvalidArchive(format!("bad entry name: {e}")))?
            .into_owned();
        let dest = safe_join(dest_dir, &relative)?;

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&dest)?;
            debug!("Extracted {}", relative.display());
        }
    }
    info!("Unpacked '{}' into '{}'", archive_path.display(), dest_dir.display());
    Ok(())
}

// Entry names come from the archive, i.e. from outside the trust boundary;
// reject anything that would write outside the destination.
fn safe_join(dest_dir: &Path, relative: &Path) -> Result<PathBuf> {
    let mut dest = dest_dir.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => dest.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::InvalidArchive(format!(
                    "entry name escapes the archive root: {}",
                    relative.display()
                )));
            }
        }
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pack_unpack_preserves_tree_and_binary_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        std::fs::create_dir_all(source.join("data")).unwrap();
        std::fs::create_dir_all(source.join("images/products")).unwrap();

        let binary: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        std::fs::write(source.join("meta.json"), b"{\"appName\":\"DecorLedger\"}").unwrap();
        std::fs::write(source.join("data/sections.json"), b"[]").unwrap();
        std::fs::write(source.join("images/products/a.jpg"), &binary).unwrap();

        let archive = tmp.path().join("backup.tar.gz");
        pack(&source, &archive).await.unwrap();

        let dest = tmp.path().join("restored");
        unpack(&archive, &dest).await.unwrap();

        assert_eq!(
            std::fs::read(dest.join("meta.json")).unwrap(),
            b"{\"appName\":\"DecorLedger\"}"
        );
        assert_eq!(std::fs::read(dest.join("data/sections.json")).unwrap(), b"[]");
        assert_eq!(
            std::fs::read(dest.join("images/products/a.jpg")).unwrap(),
            binary,
            "image bytes must not be corrupted by the container"
        );
    }

    #[tokio::test]
    async fn test_unpack_rejects_non_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("not-a-backup.tar.gz");
        std::fs::write(&bogus, b"definitely not gzip").unwrap();

        let result = unpack(&bogus, &tmp.path().join("out")).await;
        assert!(matches!(result, Err(Error::InvalidArchive(_))));
    }

    #[tokio::test]
    async fn test_unpack_rejects_escaping_entries() {
        assert!(safe_join(Path::new("/tmp/x"), Path::new("../evil")).is_err());
        assert!(safe_join(Path::new("/tmp/x"), Path::new("ok/fine.json")).is_ok());
    }

    #[tokio::test]
    async fn test_pack_is_content_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source");
        std::fs::create_dir_all(source.join("data")).unwrap();
        std::fs::write(source.join("data/notes.json"), b"[{\"id\":\"n1\"}]").unwrap();

        let first = tmp.path().join("first.tar.gz");
        let second = tmp.path().join("second.tar.gz");
        pack(&source, &first).await.unwrap();
        pack(&source, &second).await.unwrap();

        // Same tree twice: identical entry order and bytes once unpacked.
        let out_a = tmp.path().join("a");
        let out_b = tmp.path().join("b");
        unpack(&first, &out_a).await.unwrap();
        unpack(&second, &out_b).await.unwrap();
        assert_eq!(
            std::fs::read(out_a.join("data/notes.json")).unwrap(),
            std::fs::read(out_b.join("data/notes.json")).unwrap()
        );
    }
}

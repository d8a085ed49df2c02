//! Filesystem content store: one file per blob.

use crate::content::{ByteRange, ContentAccessor, ContentReader, ContentReference, ContentStore};
use crate::error::{ContentError, ContentResult};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const TEMP_DIR: &str = "tmp";
const BLOB_DIR: &str = "blobs";

/// A file-based content store.
///
/// # Layout
///
/// ```text
/// root/
///   tmp/           in-flight writes
///   blobs/ab/abcd… one file per blob, fanned out by the first two characters
/// ```
///
/// # Durability
///
/// A blob is written to `tmp/`, synced, and renamed into place, so a reader
/// never sees a partial blob and a failed write leaves nothing behind.
///
/// # Example
///
/// ```no_run
/// use blobseal_core::{ContentStore, FileContentStore};
///
/// let store = FileContentStore::open("/var/lib/blobs").unwrap();
/// let reference = store.store_bytes(b"persistent data").unwrap();
/// ```
#[derive(Debug)]
pub struct FileContentStore {
    root: PathBuf,
}

impl FileContentStore {
    /// Opens a store rooted at `root`, creating directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: impl AsRef<Path>) -> ContentResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(TEMP_DIR))?;
        fs::create_dir_all(root.join(BLOB_DIR))?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob file, or `None` if the reference cannot name a blob
    /// of this store.
    fn blob_path(&self, reference: &ContentReference) -> Option<PathBuf> {
        let id = reference.as_str();
        let valid = id.len() > 2
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return None;
        }
        Some(self.root.join(BLOB_DIR).join(&id[..2]).join(id))
    }

    fn open_blob(&self, reference: &ContentReference) -> ContentResult<(File, u64)> {
        let path = self
            .blob_path(reference)
            .ok_or_else(|| ContentError::not_found(reference))?;
        let file = File::open(&path).map_err(|e| map_open_error(reference, e))?;
        let size = file
            .metadata()
            .map_err(|e| ContentError::unreadable(reference, e.to_string()))?
            .len();
        Ok((file, size))
    }
}

fn map_open_error(reference: &ContentReference, error: io::Error) -> ContentError {
    match error.kind() {
        io::ErrorKind::NotFound => ContentError::not_found(reference),
        _ => ContentError::unreadable(reference, error.to_string()),
    }
}

impl ContentStore for FileContentStore {
    fn store(&self, content: &mut (dyn Read + Send)) -> ContentResult<ContentReference> {
        let temp = NamedTempFile::new_in(self.root.join(TEMP_DIR))?;
        let size = {
            let mut writer = BufWriter::new(temp.as_file());
            let size = io::copy(content, &mut writer)?;
            writer.flush()?;
            size
        };
        temp.as_file().sync_all()?;

        let reference = ContentReference::generate();
        let path = self
            .blob_path(&reference)
            .ok_or_else(|| ContentError::invalid_operation("generated an invalid reference"))?;
        if let Some(shard) = path.parent() {
            fs::create_dir_all(shard)?;
        }
        temp.persist(&path).map_err(|e| ContentError::Io(e.error))?;

        debug!(%reference, size, "stored blob on disk");
        Ok(reference)
    }

    fn read(&self, reference: &ContentReference) -> ContentResult<ContentReader> {
        let (file, size) = self.open_blob(reference)?;
        Ok(ContentReader::new(
            ContentAccessor::new(reference.clone(), size, "file"),
            Box::new(BufReader::new(file)),
        ))
    }

    fn read_range(
        &self,
        reference: &ContentReference,
        range: ByteRange,
    ) -> ContentResult<ContentReader> {
        let (mut file, size) = self.open_blob(reference)?;
        let resolved = range.resolve(size)?;
        file.seek(SeekFrom::Start(resolved.start))
            .map_err(|e| ContentError::unreadable(reference, e.to_string()))?;

        Ok(ContentReader::new(
            ContentAccessor::new(reference.clone(), resolved.size(), format!("file {resolved}")),
            Box::new(BufReader::new(file).take(resolved.size())),
        ))
    }

    fn delete(&self, reference: &ContentReference) -> ContentResult<bool> {
        let Some(path) = self.blob_path(reference) else {
            return Ok(false);
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

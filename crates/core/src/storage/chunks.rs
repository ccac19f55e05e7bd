//! Chunk directory listing.

use std::path::{Path, PathBuf};

use super::error::StorageError;
use super::path;

/// A `chunk-<index>` file found in a chunk directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkFile {
    pub index: u64,
    pub path: PathBuf,
}

/// List `chunk-<n>` entries of `dir` in ascending numeric order.
///
/// Entries that do not follow the naming pattern are ignored.
pub(crate) async fn list_chunks(dir: &Path) -> Result<Vec<ChunkFile>, StorageError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut chunks = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(path::chunk_index) else {
            continue;
        };
        chunks.push(ChunkFile {
            index,
            path: entry.path(),
        });
    }

    chunks.sort_by_key(|chunk| chunk.index);
    Ok(chunks)
}

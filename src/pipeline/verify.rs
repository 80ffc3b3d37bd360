//! Local integrity checks: content hashing of files already on disk.

use std::io::Read;
use std::path::Path;

use crate::types::Item;

/// Read buffer used while hashing
const HASH_BUFFER_SIZE: usize = 1 << 20;

/// Compute the lowercase hex MD5 of a file.
///
/// Hashing runs on the blocking pool so large files do not stall the runtime.
pub async fn file_md5(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(std::io::Error::other)?
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Whether `path` holds exactly the bytes `item` describes.
///
/// A missing file is `Ok(false)`. The size is compared first so an obviously
/// wrong file is rejected without being read.
pub async fn file_matches(path: &Path, item: &Item) -> std::io::Result<bool> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if !metadata.is_file() || metadata.len() != item.size() {
        return Ok(false);
    }
    Ok(file_md5(path).await? == item.md5())
}

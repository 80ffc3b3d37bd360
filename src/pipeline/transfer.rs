//! Streamed transfer of one item into its `.part` file.

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressCounters;
use crate::error::ItemError;
use crate::types::Item;

/// Suffix of the file bytes are streamed into before verification
pub(crate) const PART_SUFFIX: &str = ".part";

/// Sibling path holding partial data for `target`
pub(crate) fn part_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PART_SUFFIX);
    target.with_file_name(name)
}

/// Inputs of a single transfer attempt
pub(crate) struct Transfer<'a> {
    pub http: &'a reqwest::Client,
    pub item: &'a Item,
    pub part: &'a Path,
    pub idle_timeout: Duration,
    pub cancel: &'a CancellationToken,
    pub counters: &'a ProgressCounters,
}

/// Stream the item's URL into the `.part` file and return the MD5 of what was
/// received.
///
/// Checks the declared length before creating the file, so a size mismatch
/// leaves nothing on disk. On any failure after that the `.part` file is
/// removed and its bytes are discarded from the progress counters.
pub(crate) async fn fetch(transfer: &Transfer<'_>) -> Result<String, ItemError> {
    let response = open(transfer).await?;

    let mut received = 0u64;
    let result = write_body(transfer, response, &mut received).await;
    if result.is_err() {
        transfer.counters.discard(received);
        if let Err(e) = tokio::fs::remove_file(transfer.part).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %transfer.part.display(), error = %e, "Failed to remove partial file");
        }
    }
    result
}

async fn open(transfer: &Transfer<'_>) -> Result<reqwest::Response, ItemError> {
    let item = transfer.item;
    let send = tokio::time::timeout(transfer.idle_timeout, transfer.http.get(&item.url).send());
    let response = tokio::select! {
        _ = transfer.cancel.cancelled() => return Err(ItemError::Cancelled),
        result = send => result.map_err(|_| ItemError::Timeout(transfer.idle_timeout))??,
    };

    let status = response.status();
    if !status.is_success() {
        return Err(ItemError::Status {
            status: status.as_u16(),
        });
    }

    let declared = response.content_length();
    if declared != Some(item.size()) {
        return Err(ItemError::SizeMismatch {
            expected: item.size(),
            declared,
        });
    }

    Ok(response)
}

async fn write_body(
    transfer: &Transfer<'_>,
    response: reqwest::Response,
    received: &mut u64,
) -> Result<String, ItemError> {
    let part = transfer.part;
    let expected = transfer.item.size();

    if let Some(parent) = part.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ItemError::fs(parent, e))?;
    }
    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| ItemError::fs(part, e))?;

    let mut context = md5::Context::new();
    let mut stream = response.bytes_stream();

    loop {
        let next = tokio::select! {
            _ = transfer.cancel.cancelled() => return Err(ItemError::Cancelled),
            next = tokio::time::timeout(transfer.idle_timeout, stream.next()) => {
                next.map_err(|_| ItemError::Timeout(transfer.idle_timeout))?
            }
        };
        let Some(chunk) = next else {
            break;
        };
        // A body that breaks off early surfaces as an error from the stream
        let so_far = *received;
        let chunk = chunk.map_err(|e| {
            tracing::debug!(error = %e, received = so_far, expected, "Body ended early");
            ItemError::Incomplete {
                expected,
                received: so_far,
            }
        })?;

        *received += chunk.len() as u64;
        transfer.counters.add(chunk.len() as u64);
        if *received > expected {
            return Err(ItemError::Incomplete {
                expected,
                received: *received,
            });
        }

        context.consume(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| ItemError::fs(part, e))?;
    }

    file.flush().await.map_err(|e| ItemError::fs(part, e))?;
    file.sync_all().await.map_err(|e| ItemError::fs(part, e))?;
    drop(file);

    if *received != expected {
        return Err(ItemError::Incomplete {
            expected,
            received: *received,
        });
    }

    Ok(format!("{:x}", context.compute()))
}

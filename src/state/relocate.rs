//! Moving orphaned files out of the mirror tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

use crate::pipeline::verify::file_matches;
use crate::types::{Event, Item};
use crate::utils::{item_relative_path, unique_suffixed_path};

/// Summary of an orphan relocation pass
#[derive(Debug, Default)]
pub struct Relocation {
    /// Files moved, as `(from, to)`
    pub moved: Vec<(PathBuf, PathBuf)>,
    /// Orphans with no matching file on disk
    pub missing: usize,
    /// Orphans that could not be moved
    pub failed: usize,
}

/// Move every orphan whose file is still present and intact from
/// `mirror_root` into `orphan_root`, keeping its relative path.
///
/// Collisions in the orphan tree get a `.N` suffix. Failures are logged and
/// counted, never returned.
pub async fn relocate_orphans(
    orphans: &HashSet<Item>,
    mirror_root: &Path,
    orphan_root: &Path,
    event_tx: &broadcast::Sender<Event>,
) -> Relocation {
    let mut relocation = Relocation::default();

    let mut sorted: Vec<&Item> = orphans.iter().collect();
    sorted.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.key().cmp(b.key())));

    for item in sorted {
        let relative = item_relative_path(item);
        let source = mirror_root.join(&relative);

        match file_matches(&source, item).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(path = %source.display(), "Orphan not on disk, nothing to move");
                relocation.missing += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %source.display(), error = %e, "Could not check orphaned file");
                relocation.failed += 1;
                continue;
            }
        }

        match relocate_one(&source, &orphan_root.join(&relative)).await {
            Ok(destination) => {
                tracing::info!(
                    from = %source.display(),
                    to = %destination.display(),
                    "Moved orphaned file"
                );
                event_tx
                    .send(Event::OrphanRelocated {
                        from: source.clone(),
                        to: destination.clone(),
                    })
                    .ok();
                relocation.moved.push((source, destination));
            }
            Err(e) => {
                tracing::warn!(path = %source.display(), error = %e, "Failed to move orphaned file");
                relocation.failed += 1;
            }
        }
    }

    relocation
}

async fn relocate_one(source: &Path, wanted: &Path) -> std::io::Result<PathBuf> {
    if let Some(parent) = wanted.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let destination = unique_suffixed_path(wanted)?;
    move_file(source, &destination).await?;
    Ok(destination)
}

/// Rename, falling back to copy and remove across filesystems
async fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        // Cross-filesystem moves fail with EXDEV (18 on Linux)
        Err(e)
            if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) =>
        {
            tokio::fs::copy(source, destination).await?;
            tokio::fs::remove_file(source).await
        }
        Err(e) => Err(e),
    }
}

//! Scratch directories and atomic directory replacement.
//!
//! Builds write into a scratch directory created beside their target, then
//! [`publish`] swaps it into place with renames on the same file system, so a
//! reader never sees files of two generations mixed in one directory.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::{Error, Result};

/// Create an empty scratch directory next to `target`.
///
/// The directory is removed when the returned handle is dropped, so a failed
/// build leaves nothing behind.
pub fn scratch_dir_for(target: &Path) -> Result<TempDir> {
    let parent = parent_of(target);
    fs::create_dir_all(&parent)?;

    let name = target
        .file_name()
        .ok_or_else(|| Error::Config(format!("{:?} has no directory name", target)))?;
    let prefix = format!(".{}.build-", name.to_string_lossy());

    Ok(tempfile::Builder::new().prefix(&prefix).tempdir_in(&parent)?)
}

/// Replace `target` with the contents of `scratch`.
///
/// The previous generation is renamed aside before the scratch directory is
/// renamed into place, and deleted afterwards.
pub fn publish(scratch: TempDir, target: &Path) -> Result<()> {
    let staged = scratch.into_path();

    let retired = if target.exists() {
        let retired = retired_path(target);
        if retired.exists() {
            fs::remove_dir_all(&retired)?;
        }
        fs::rename(target, &retired)?;
        Some(retired)
    } else {
        None
    };

    if let Err(e) = fs::rename(&staged, target) {
        log::error!("Failed to move {:?} into place at {:?}: {}", staged, target, e);
        if let Some(ref retired) = retired {
            restore_previous(retired, target);
        }
        if let Err(cleanup) = fs::remove_dir_all(&staged) {
            log::warn!("Failed to remove scratch directory {:?}: {}", staged, cleanup);
        }
        return Err(e.into());
    }

    if let Some(retired) = retired {
        if let Err(e) = fs::remove_dir_all(&retired) {
            log::warn!("Failed to remove previous generation {:?}: {}", retired, e);
        }
    }

    log::info!("Published {:?}", target);
    Ok(())
}

/// Move the previous generation back to `target` after a failed publish.
///
/// Returns `false` and logs when it stays stranded at `retired`.
fn restore_previous(retired: &Path, target: &Path) -> bool {
    match fs::rename(retired, target) {
        Ok(()) => {
            log::warn!("Restored previous generation at {:?}", target);
            true
        }
        Err(e) => {
            log::error!(
                "Failed to restore previous generation from {:?} to {:?}: {}",
                retired,
                target,
                e
            );
            false
        }
    }
}

fn parent_of(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn retired_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent_of(target).join(format!(".{}.old", name))
}

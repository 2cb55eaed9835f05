// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Atomic publication of a new `repodata/` snapshot.
//!
//! A new snapshot is assembled in a hidden `.repodata/` staging directory and
//! published with a single rename, so a consumer polling the repository sees
//! either the old complete snapshot or the new complete snapshot. The staging
//! directory also acts as the mutual exclusion mechanism between concurrent
//! invocations, and is removed by the SIGINT handler on termination.

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use log::{debug, error, warn};

use crate::MetadataError;

// read by the signal handler to locate the in-flight staging directory
static ACTIVE_STAGING: Mutex<Option<PathBuf>> = Mutex::new(None);
static SIGNAL_HANDLER: Once = Once::new();

/// Create the staging directory, failing if it already exists.
///
/// An existing staging directory means another invocation is (or was) working
/// on this repository.
pub(crate) fn create_staging_dir(staging: &Path) -> Result<(), MetadataError> {
    let mut builder = DirBuilder::new();
    builder.mode(0o755);
    match builder.create(staging) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Err(MetadataError::StagingCollisionError(staging.to_owned()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Register `staging` for removal if the process is interrupted.
pub(crate) fn arm_signal_handler(staging: &Path) {
    *ACTIVE_STAGING.lock().unwrap() = Some(staging.to_owned());

    SIGNAL_HANDLER.call_once(|| {
        let result = ctrlc::set_handler(|| {
            if let Some(path) = ACTIVE_STAGING.lock().unwrap().take() {
                error!("Interrupted: removing {}", path.display());
                let _ = fs::remove_dir_all(&path);
            }
            std::process::exit(1);
        });
        if let Err(err) = result {
            warn!("Cannot install signal handler: {}", err);
        }
    });
    debug!("SIGINT handler armed");
}

pub(crate) fn disarm_signal_handler() {
    ACTIVE_STAGING.lock().unwrap().take();
}

fn is_metadata_filename(filename: &str) -> bool {
    filename == "repomd.xml"
        || [
            "primary.xml",
            "filelists.xml",
            "other.xml",
            "primary.sqlite",
            "filelists.sqlite",
            "other.sqlite",
        ]
        .iter()
        .any(|name| filename.contains(name))
}

/// Delete obsolete metadata files from an existing `repodata/` directory.
///
/// Matches both plain and checksum-prefixed filenames. Files that are not
/// repository metadata (a comps file, for example) are left alone so the swap
/// can carry them into the new snapshot.
pub(crate) fn remove_stale_metadata(repodata: &Path) -> Result<(), MetadataError> {
    for entry in fs::read_dir(repodata)? {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy().into_owned();
        if is_metadata_filename(&filename) {
            debug!("Removing stale metadata: {}", entry.path().display());
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Replace `final_repodata` with the contents of `staging`, atomically.
///
/// Surviving files from the previous snapshot are first moved into staging so
/// that the final rename publishes a complete directory.
pub(crate) fn swap_into_place(
    final_repodata: &Path,
    staging: &Path,
) -> Result<(), MetadataError> {
    if final_repodata.exists() {
        debug!("Moving data from {}", final_repodata.display());
        remove_stale_metadata(final_repodata)?;

        for entry in fs::read_dir(final_repodata)? {
            let entry = entry?;
            let target = staging.join(entry.file_name());
            // a freshly staged file of the same name wins over the old one
            if target.exists() {
                fs::remove_file(entry.path())?;
                continue;
            }
            fs::rename(entry.path(), &target)?;
            debug!(
                "Moved {} -> {}",
                entry.path().display(),
                target.display()
            );
        }

        fs::remove_dir(final_repodata)?;
    }

    fs::rename(staging, final_repodata)?;
    debug!(
        "Renamed {} -> {}",
        staging.display(),
        final_repodata.display()
    );
    Ok(())
}

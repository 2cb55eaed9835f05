// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{debug, warn};

use crate::MetadataError;

/// One package to be indexed. Produced by discovery, consumed by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolTask {
    /// Absolute path of the package file.
    pub full_path: PathBuf,
    /// Basename of the package file.
    pub filename: String,
    /// Path relative to the repository root, used as the location href.
    pub relative_path: String,
}

/// Find the package files to index.
///
/// With `pkglist` the supplied relative paths are used as-is, otherwise the
/// input directory is walked breadth-first for files ending in `.rpm`.
/// The returned count is final - stream headers are written from it before
/// any package is processed.
pub fn discover_packages(
    input_dir: &Path,
    pkglist: Option<&[String]>,
    excludes: &[Pattern],
    skip_symlinks: bool,
) -> Result<Vec<PoolTask>, MetadataError> {
    match pkglist {
        Some(pkglist) => Ok(tasks_from_pkglist(input_dir, pkglist, excludes)),
        None => walk_directory(input_dir, excludes, skip_symlinks),
    }
}

fn allowed_file(relative_path: &str, excludes: &[Pattern]) -> bool {
    for pattern in excludes {
        if pattern.matches(relative_path) {
            debug!("Exclude masks hit - skipping: {}", relative_path);
            return false;
        }
    }
    true
}

fn walk_directory(
    input_dir: &Path,
    excludes: &[Pattern],
    skip_symlinks: bool,
) -> Result<Vec<PoolTask>, MetadataError> {
    let mut tasks = Vec::new();
    let mut sub_dirs = VecDeque::new();
    sub_dirs.push_back(input_dir.to_owned());

    while let Some(dirname) = sub_dirs.pop_front() {
        let entries = match fs::read_dir(&dirname) {
            Ok(entries) => entries,
            Err(err) => {
                // an unreadable subdirectory is not fatal
                warn!("Cannot open directory: {}: {}", dirname.display(), err);
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Cannot read entry in {}: {}", dirname.display(), err);
                    continue;
                }
            };
            let full_path = entry.path();
            let filename = entry.file_name().to_string_lossy().into_owned();

            if !filename.ends_with(".rpm") {
                // symlinks to directories are followed
                match fs::metadata(&full_path) {
                    Ok(metadata) if metadata.is_dir() => {
                        debug!("Dir to scan: {}", full_path.display());
                        sub_dirs.push_back(full_path);
                    }
                    _ => (),
                }
                continue;
            }

            if skip_symlinks {
                match full_path.symlink_metadata() {
                    Ok(metadata) if metadata.file_type().is_symlink() => {
                        debug!("Skipped symlink: {}", full_path.display());
                        continue;
                    }
                    Err(err) => {
                        warn!("Cannot stat {}: {}", full_path.display(), err);
                        continue;
                    }
                    _ => (),
                }
            }

            let relative_path = full_path
                .strip_prefix(input_dir)
                .unwrap_or(&full_path)
                .to_string_lossy()
                .into_owned();

            if allowed_file(&relative_path, excludes) {
                debug!("Adding pkg: {}", full_path.display());
                tasks.push(PoolTask {
                    full_path,
                    filename,
                    relative_path,
                });
            }
        }
    }

    Ok(tasks)
}

fn tasks_from_pkglist(input_dir: &Path, pkglist: &[String], excludes: &[Pattern]) -> Vec<PoolTask> {
    let mut tasks = Vec::new();

    for relative_path in pkglist {
        let full_path = input_dir.join(relative_path);
        let filename = match relative_path.rsplit_once('/') {
            Some((_, filename)) => filename,
            None => relative_path.as_str(),
        };

        if allowed_file(filename, excludes) {
            debug!("Adding pkg: {}", full_path.display());
            tasks.push(PoolTask {
                full_path,
                filename: filename.to_owned(),
                relative_path: relative_path.clone(),
            });
        }
    }

    tasks
}

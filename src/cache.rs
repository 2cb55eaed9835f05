// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use indexmap::IndexMap;
use log::debug;

use crate::metadata::RepomdXml;
use crate::package::PackageIterator;
use crate::{utils, MetadataError, Package};

/// Package metadata loaded from a previous `repodata/`, keyed by package filename.
///
/// Built once before the worker pool starts and read-only afterwards, so workers
/// can look packages up concurrently without locking. When several sources bind
/// the same filename, the first one loaded wins.
#[derive(Debug, Default)]
pub struct MetadataCache {
    packages: IndexMap<String, Package>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all packages described by `<dir>/repodata/repomd.xml` into the cache.
    ///
    /// Returns the number of entries actually added - entries whose filename is
    /// already bound are skipped.
    pub fn load_from_directory(&mut self, dir: &Path) -> Result<usize, MetadataError> {
        let repomd_path = dir.join("repodata").join("repomd.xml");
        let repomd = RepomdXml::read_data(utils::xml_reader_from_file(&repomd_path)?)?;

        let mut loaded = 0;
        for package in PackageIterator::from_repodata(dir, &repomd)? {
            let package = package?;
            let filename = match package.location_href.rsplit_once('/') {
                Some((_, filename)) => filename,
                None => package.location_href.as_str(),
            };
            if !self.packages.contains_key(filename) {
                self.packages.insert(filename.to_owned(), package);
                loaded += 1;
            } else {
                debug!("Cache already contains an entry for {}", filename);
            }
        }

        Ok(loaded)
    }

    pub fn get(&self, filename: &str) -> Option<&Package> {
        self.packages.get(filename)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

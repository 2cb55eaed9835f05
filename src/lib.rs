// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod cache;
mod common;
mod filelist;
mod index;
mod metadata;
mod other;
mod package;
mod primary;
mod publish;
mod repomd;
mod sqlite;
mod walk;
pub mod utils;

pub use common::EVR;
pub use metadata::{
    Changelog, Checksum, ChecksumType, CompressionType, FileType, HeaderRange, MetadataError,
    Package, PackageFile, RepomdData, RepomdRecord, RepomdXml, Requirement, XmlFragments,
};
pub use cache::MetadataCache;
pub use index::{IndexOptions, IndexSummary, Indexer};
pub use package::{PackageIterator, PackageReader, RpmPackageReader};
pub use walk::PoolTask;

// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;

use rpmindex::{ChecksumType, CompressionType, IndexOptions};

#[derive(FromArgs, PartialEq, Debug)]
/// Create repository metadata (repodata) from a directory of RPM packages.
pub struct CliOptions {
    /// directory of packages to index
    #[argh(positional)]
    pub directory: Option<PathBuf>,

    /// print the version and exit
    #[argh(switch, short = 'V')]
    pub version: bool,

    /// only print errors
    #[argh(switch, short = 'q')]
    pub quiet: bool,

    /// print debug output
    #[argh(switch, short = 'v')]
    pub verbose: bool,

    /// checksum algorithm to use for packages and metadata (default: sha256)
    #[argh(option, short = 's')]
    pub checksum: Option<String>,

    /// base URL prefix for package locations
    #[argh(option, short = 'u')]
    pub baseurl: Option<String>,

    /// glob pattern of packages to skip, relative to the input directory (repeatable)
    #[argh(option, short = 'x')]
    pub excludes: Vec<String>,

    /// file containing a list of package paths relative to the input directory
    #[argh(option, short = 'i')]
    pub pkglist: Option<PathBuf>,

    /// group file (comps) to include in the repodata
    #[argh(option, short = 'g')]
    pub groupfile: Option<PathBuf>,

    /// directory the repodata is written to (default: the input directory)
    #[argh(option, short = 'o')]
    pub outputdir: Option<PathBuf>,

    /// reuse metadata from the existing repodata for unchanged packages
    #[argh(switch)]
    pub update: bool,

    /// additional repodata paths to load old metadata from, with --update (repeatable)
    #[argh(option, long = "update-md-path")]
    pub update_md_paths: Vec<PathBuf>,

    /// with --update, trust cached metadata without stat()ing package files
    #[argh(switch)]
    pub skip_stat: bool,

    /// ignore symbolic links to packages
    #[argh(switch, short = 'S')]
    pub skip_symlinks: bool,

    /// do not generate the sqlite databases
    #[argh(switch)]
    pub no_database: bool,

    /// prefix metadata filenames with their checksum
    #[argh(switch)]
    pub unique_md_filenames: bool,

    /// use xz compression for the databases and groupfile
    #[argh(switch)]
    pub xz: bool,

    /// number of worker threads (default: the number of CPUs)
    #[argh(option)]
    pub workers: Option<usize>,

    /// changelog entries kept per package, 0 for no limit (default: 10)
    #[argh(option)]
    pub changelog_limit: Option<usize>,
}

impl CliOptions {
    /// Validate the parsed arguments and turn them into [`IndexOptions`].
    pub fn to_index_options(&self) -> Result<IndexOptions> {
        let mut options = IndexOptions::default();

        if let Some(checksum) = &self.checksum {
            options.checksum_type = ChecksumType::try_from(checksum.as_str())
                .with_context(|| format!("invalid checksum type \"{}\"", checksum))?;
        }

        if let Some(workers) = self.workers {
            if workers == 0 {
                anyhow::bail!("--workers must be at least 1");
            }
            options.workers = workers;
        }

        options.changelog_limit = match self.changelog_limit {
            Some(0) => None,
            Some(limit) => Some(limit),
            None => Some(10),
        };

        if let Some(pkglist) = &self.pkglist {
            options.pkglist = Some(read_pkglist(pkglist)?);
        }

        if self.xz {
            options.database_compression = CompressionType::Xz;
            options.groupfile_compression = CompressionType::Xz;
        }

        options.location_base = self.baseurl.clone();
        options.excludes = self.excludes.clone();
        options.groupfile = self.groupfile.clone();
        options.outputdir = self.outputdir.clone();
        options.update = self.update;
        options.update_md_paths = self.update_md_paths.clone();
        options.skip_stat = self.skip_stat;
        options.skip_symlinks = self.skip_symlinks;
        options.no_database = self.no_database;
        options.unique_md_filenames = self.unique_md_filenames;

        Ok(options)
    }
}

fn read_pkglist(path: &PathBuf) -> Result<Vec<String>> {
    let file =
        File::open(path).with_context(|| format!("cannot open pkglist {}", path.display()))?;

    let mut paths = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            paths.push(line.to_owned());
        }
    }
    Ok(paths)
}

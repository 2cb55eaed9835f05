// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod cli;

use anyhow::{bail, Result};
use log::info;

use cli::CliOptions;
use rpmindex::{Indexer, RpmPackageReader};

fn main() -> Result<()> {
    let cli_options: CliOptions = argh::from_env();

    if cli_options.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let level = if cli_options.quiet {
        "error"
    } else if cli_options.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let directory = match &cli_options.directory {
        Some(directory) => directory.clone(),
        None => bail!("Must specify exactly one directory to index."),
    };

    let options = cli_options.to_index_options()?;

    let indexer = Indexer::new(&RpmPackageReader, options);
    let summary = indexer.run(&directory)?;

    info!(
        "Indexed {} of {} packages",
        summary.packages_written, summary.package_count
    );

    Ok(())
}

// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt;

/// A full RPM "version" specifier has 3 different components - Epoch, Version, and Release.
///
/// Epoch overrides all other fields and is generally only used as a last resort - in cases where
/// a change to the versioning scheme or a packaging error creates a situation where newer packages
/// might otherwise sort as being older.
#[derive(Clone, Debug, Default, Eq, Hash)]
pub struct EVR {
    pub epoch: String,
    pub version: String,
    pub release: String,
}

impl EVR {
    pub fn new<T: Into<String>>(epoch: T, version: T, release: T) -> EVR {
        EVR {
            epoch: epoch.into(),
            version: version.into(),
            release: release.into(),
        }
    }

    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn values(&self) -> (&str, &str, &str) {
        (&self.epoch, &self.version, &self.release)
    }

    pub fn parse_values(evr: &str) -> (&str, &str, &str) {
        let (epoch, vr) = evr.split_once(':').unwrap_or(evr.split_at(0));
        let (version, release) = vr.split_once('-').unwrap_or((vr, ""));

        (epoch, version, release)
    }

    pub fn parse(evr: &str) -> Self {
        EVR::parse_values(evr).into()
    }
}

impl From<(&str, &str, &str)> for EVR {
    fn from(val: (&str, &str, &str)) -> Self {
        EVR::new(val.0, val.1, val.2)
    }
}

impl PartialEq for EVR {
    fn eq(&self, other: &Self) -> bool {
        // an empty epoch and a zero epoch compare as the same
        ((self.epoch == other.epoch)
            || (self.epoch.is_empty() && other.epoch == "0")
            || (self.epoch == "0" && other.epoch.is_empty()))
            && self.version == other.version
            && self.release == other.release
    }
}

impl fmt::Display for EVR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.epoch.is_empty() {
            write!(f, "{}:", self.epoch)?;
        }

        write!(f, "{}-{}", self.version, self.release)
    }
}

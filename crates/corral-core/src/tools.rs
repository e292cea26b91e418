//! Agent tools descriptors
//!
//! "Tools" are the agent binaries for a given version, series and
//! architecture. A [`ToolsList`] holds the candidates found in metadata
//! sources (or built locally) during bootstrap.

use crate::error::{CoreError, Result};
use crate::version::{Binary, Number};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single agent binary bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tools {
    pub version: Binary,

    /// Where the bundle can be fetched from. Empty until the bundle has
    /// been published or built locally.
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub sha256: String,
}

impl Tools {
    pub fn new(version: Binary, url: impl Into<String>) -> Self {
        Self {
            version,
            url: url.into(),
            size: 0,
            sha256: String::new(),
        }
    }

    pub fn number(&self) -> &Number {
        &self.version.number
    }
}

/// Criteria for [`ToolsList::matching`]. Empty fields match anything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub number: Option<Number>,
    pub major_minor: Option<(u32, u32)>,
    pub series: Option<String>,
    pub arch: Option<String>,
}

impl Filter {
    fn matches(&self, tools: &Tools) -> bool {
        if let Some(number) = &self.number {
            if tools.number() != number {
                return false;
            }
        }
        if let Some(mm) = self.major_minor {
            if tools.number().major_minor() != mm {
                return false;
            }
        }
        if let Some(series) = &self.series {
            if &tools.version.series != series {
                return false;
            }
        }
        if let Some(arch) = &self.arch {
            if &tools.version.arch != arch {
                return false;
            }
        }
        true
    }
}

/// An ordered collection of tools
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolsList(pub Vec<Tools>);

impl ToolsList {
    pub fn new(tools: Vec<Tools>) -> Self {
        Self(tools)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tools> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&Tools> {
        self.0.first()
    }

    /// The newest version in the list, and every entry with that version.
    pub fn newest(&self) -> Option<(Number, ToolsList)> {
        let newest = self.0.iter().map(|t| t.number()).max()?.clone();
        let list = self
            .0
            .iter()
            .filter(|t| *t.number() == newest)
            .cloned()
            .collect();
        Some((newest, ToolsList(list)))
    }

    /// Distinct architectures, sorted
    pub fn arches(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|t| t.version.arch.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct series, sorted
    pub fn all_series(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|t| t.version.series.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Entries matching `filter`; an empty result is an error.
    pub fn matching(&self, filter: &Filter) -> Result<ToolsList> {
        let list: Vec<Tools> = self.0.iter().filter(|t| filter.matches(t)).cloned().collect();
        if list.is_empty() {
            return Err(CoreError::NoMatchingTools);
        }
        Ok(ToolsList(list))
    }

    /// Entries not present in `other`
    pub fn exclude(&self, other: &ToolsList) -> ToolsList {
        ToolsList(
            self.0
                .iter()
                .filter(|t| !other.0.iter().any(|o| o.version == t.version))
                .cloned()
                .collect(),
        )
    }
}

impl FromIterator<Tools> for ToolsList {
    fn from_iter<I: IntoIterator<Item = Tools>>(iter: I) -> Self {
        ToolsList(iter.into_iter().collect())
    }
}

impl IntoIterator for ToolsList {
    type Item = Tools;
    type IntoIter = std::vec::IntoIter<Tools>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

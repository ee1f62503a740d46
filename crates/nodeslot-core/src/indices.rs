//! Range/list index sets, e.g. `0-3,8,10-11`.
//!
//! This is the textual format topology discovery hands us for allowed
//! cpusets and nodesets, and the format the cpuset writer expects for the
//! `cpus` and `mems` strings produced by placement.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum IndexListError {
    #[error("invalid index: {0}")]
    InvalidIndex(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
}

/// An ordered, duplicate-free set of OS indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IndexList {
    indices: BTreeSet<u32>,
}

impl IndexList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: u32) -> bool {
        self.indices.insert(index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.indices.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.indices.iter().copied()
    }

    /// Collapse the set into `(first, last)` runs of consecutive indices.
    fn runs(&self) -> Vec<(u32, u32)> {
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for index in self.iter() {
            match runs.last_mut() {
                Some((_, last)) if *last + 1 == index => *last = index,
                _ => runs.push((index, index)),
            }
        }
        runs
    }
}

impl FromIterator<u32> for IndexList {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self {
            indices: iter.into_iter().collect(),
        }
    }
}

impl Extend<u32> for IndexList {
    fn extend<T: IntoIterator<Item = u32>>(&mut self, iter: T) {
        self.indices.extend(iter);
    }
}

impl fmt::Display for IndexList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (first, last)) in self.runs().into_iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if first == last {
                write!(f, "{first}")?;
            } else {
                write!(f, "{first}-{last}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for IndexList {
    type Err = IndexListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut list = IndexList::new();
        for part in s.trim().split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some((start, end)) = part.split_once('-') {
                let start: u32 = start
                    .trim()
                    .parse()
                    .map_err(|_| IndexListError::InvalidRange(part.to_string()))?;
                let end: u32 = end
                    .trim()
                    .parse()
                    .map_err(|_| IndexListError::InvalidRange(part.to_string()))?;
                if end < start {
                    return Err(IndexListError::InvalidRange(part.to_string()));
                }
                list.extend(start..=end);
            } else {
                let index: u32 = part
                    .parse()
                    .map_err(|_| IndexListError::InvalidIndex(part.to_string()))?;
                list.insert(index);
            }
        }
        Ok(list)
    }
}

impl TryFrom<String> for IndexList {
    type Error = IndexListError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IndexList> for String {
    fn from(value: IndexList) -> Self {
        value.to_string()
    }
}

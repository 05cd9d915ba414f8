//! Duplicate detection and keep/discard policy.
//!
//! Files are bucketed by size first; only buckets with more than one member are
//! fingerprinted, in parallel. Nothing here deletes or moves anything.

use crate::fingerprint::{self, Fingerprint, FingerprintError};
use crate::scanner::FileDescriptor;
use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Which member of a duplicate set to keep.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum KeepStrategy {
    /// Earliest creation time.
    #[default]
    Oldest,
    /// Latest creation time.
    Newest,
    Smallest,
    Largest,
    /// Fewest characters in the file name.
    ShortestName,
}

impl fmt::Display for KeepStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeepStrategy::Oldest => "oldest",
            KeepStrategy::Newest => "newest",
            KeepStrategy::Smallest => "smallest",
            KeepStrategy::Largest => "largest",
            KeepStrategy::ShortestName => "shortest_name",
        };
        f.write_str(name)
    }
}

/// Two or more files with the same fingerprint, in discovery order.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateSet {
    pub fingerprint: Fingerprint,
    pub members: Vec<FileDescriptor>,
}

impl DuplicateSet {
    /// Bytes freed if every member but one were removed.
    pub fn reclaimable_bytes(&self) -> u64 {
        self.fingerprint.len * (self.members.len().saturating_sub(1)) as u64
    }
}

/// Result of one resolution pass.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Sets ordered by the discovery position of their first member.
    pub sets: Vec<DuplicateSet>,
    /// Candidates that could not be read; they are never grouped.
    pub unreadable: Vec<FingerprintError>,
}

/// Aggregate numbers for a resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateStats {
    pub sets: usize,
    /// Files beyond the first in each set.
    pub redundant_files: usize,
    pub reclaimable_bytes: u64,
}

impl Resolution {
    pub fn stats(&self) -> DuplicateStats {
        DuplicateStats {
            sets: self.sets.len(),
            redundant_files: self.sets.iter().map(|s| s.members.len() - 1).sum(),
            reclaimable_bytes: self.sets.iter().map(DuplicateSet::reclaimable_bytes).sum(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DuplicateResolver;

impl DuplicateResolver {
    pub fn new() -> Self {
        Self
    }

    /// Group `descriptors` into duplicate sets. Sets with one member are dropped.
    pub fn resolve(&self, descriptors: &[FileDescriptor]) -> Resolution {
        let mut by_size: HashMap<u64, Vec<usize>> = HashMap::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            by_size.entry(descriptor.size).or_default().push(index);
        }

        let candidates: Vec<usize> = by_size
            .into_values()
            .filter(|bucket| bucket.len() > 1)
            .flatten()
            .collect();
        debug!(
            files = descriptors.len(),
            candidates = candidates.len(),
            "fingerprinting same-size candidates"
        );

        let groups: DashMap<Fingerprint, Vec<usize>> = DashMap::new();
        let unreadable: Vec<FingerprintError> = candidates
            .par_iter()
            .filter_map(|&index| {
                match fingerprint::fingerprint(&descriptors[index].path) {
                    Ok(fp) => {
                        groups.entry(fp).or_default().push(index);
                        None
                    }
                    Err(err) => {
                        warn!(error = %err, "skipping unreadable duplicate candidate");
                        Some(err)
                    }
                }
            })
            .collect();

        let mut sets: Vec<(usize, DuplicateSet)> = groups
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(fingerprint, mut members)| {
                members.sort_unstable();
                let first = members[0];
                let set = DuplicateSet {
                    fingerprint,
                    members: members.into_iter().map(|i| descriptors[i].clone()).collect(),
                };
                (first, set)
            })
            .collect();
        sets.sort_by_key(|(first, _)| *first);

        Resolution {
            sets: sets.into_iter().map(|(_, set)| set).collect(),
            unreadable,
        }
    }

    /// Member to keep under `strategy`; ties go to the earliest-discovered member.
    /// `None` only for an empty set.
    pub fn recommend_keep<'s>(
        &self,
        set: &'s DuplicateSet,
        strategy: KeepStrategy,
    ) -> Option<&'s FileDescriptor> {
        let better = |candidate: &FileDescriptor, best: &FileDescriptor| match strategy {
            KeepStrategy::Oldest => candidate.created < best.created,
            KeepStrategy::Newest => candidate.created > best.created,
            KeepStrategy::Smallest => candidate.size < best.size,
            KeepStrategy::Largest => candidate.size > best.size,
            KeepStrategy::ShortestName => {
                candidate.file_name().chars().count() < best.file_name().chars().count()
            }
        };

        set.members
            .iter()
            .reduce(|best, candidate| if better(candidate, best) { candidate } else { best })
    }

    /// Every member except `keep`, in discovery order.
    pub fn to_remove<'s>(
        &self,
        set: &'s DuplicateSet,
        keep: &FileDescriptor,
    ) -> Vec<&'s FileDescriptor> {
        set.members.iter().filter(|m| m.path != keep.path).collect()
    }
}

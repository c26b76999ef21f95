//! Secondary Index Types
//!
//! Two reusable index shapes with one contract shared by every backend:
//!
//! - [`ScoredIndex`]: ordered-by-score multimap. Each member carries one score;
//!   re-adding a member replaces its score. Range queries walk members by score
//!   descending, ties broken by member descending (the order Redis
//!   `ZREVRANGEBYSCORE` produces).
//! - [`MembershipIndex`]: a plain member set.
//!
//! The in-process KV store keeps its sorted sets and sets in these types. The
//! file backend has no persistent indexes; it builds them from a scan and
//! queries them the same way, so ordering cannot drift between backends.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Score wrapper with a total order
#[derive(Clone, Copy, Debug)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Entry ordered by score descending, then member descending
#[derive(Clone, Debug, PartialEq, Eq)]
struct Ranked {
    score: Score,
    member: String,
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| other.member.cmp(&self.member))
    }
}

/// Ordered-by-score multimap
#[derive(Clone, Debug, Default)]
pub struct ScoredIndex {
    ranked: BTreeSet<Ranked>,
    scores: HashMap<String, f64>,
}

impl ScoredIndex {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a member or replace its score
    ///
    /// Returns `true` when the member was not present before.
    pub fn insert(&mut self, member: impl Into<String>, score: f64) -> bool {
        let member = member.into();
        let previous = self.scores.insert(member.clone(), score);
        if let Some(old) = previous {
            self.ranked.remove(&Ranked {
                score: Score(old),
                member: member.clone(),
            });
        }
        self.ranked.insert(Ranked {
            score: Score(score),
            member,
        });
        previous.is_none()
    }

    /// Remove a member; returns whether it was present
    pub fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ranked.remove(&Ranked {
                    score: Score(score),
                    member: member.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Score of a member, if present
    #[must_use]
    pub fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Members with `min <= score <= max`, highest first
    ///
    /// Skips `offset` matches and returns at most `count`.
    #[must_use]
    pub fn range_desc(&self, min: f64, max: f64, offset: usize, count: usize) -> Vec<&str> {
        self.ranked
            .iter()
            .skip_while(|entry| entry.score.0 > max)
            .take_while(|entry| entry.score.0 >= min)
            .skip(offset)
            .take(count)
            .map(|entry| entry.member.as_str())
            .collect()
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether the index has no members
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// All members in rank order
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.ranked.iter().map(|entry| entry.member.as_str())
    }
}

/// Membership set
#[derive(Clone, Debug, Default)]
pub struct MembershipIndex {
    members: HashSet<String>,
}

impl MembershipIndex {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member; returns `true` when it was new
    pub fn insert(&mut self, member: impl Into<String>) -> bool {
        self.members.insert(member.into())
    }

    /// Remove a member; returns whether it was present
    pub fn remove(&mut self, member: &str) -> bool {
        self.members.remove(member)
    }

    /// O(1) membership check
    #[must_use]
    pub fn contains(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    /// Members in no particular order
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

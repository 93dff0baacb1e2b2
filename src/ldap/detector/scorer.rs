//! Occurrence and weight based scoring shared by every detector.

use std::collections::BTreeMap;

use super::{AttributeDetector, Detection};
use crate::error::{Result, ServerError};
use crate::ldap::entry::DirectoryEntry;

/// Default weight of a candidate.
pub const DEFAULT_WEIGHT: u32 = 1;

/// Whether an entry exhibits a candidate.
pub type Predicate = fn(&DirectoryEntry, &str) -> bool;

/// Adds the weight of every candidate an entry exhibits to its tally and
/// picks the highest tally.
///
/// Candidates are kept sorted by name; on equal scores the lowest name wins.
#[derive(Debug, Clone)]
pub struct OccurrenceAndWeightDetector {
    name: &'static str,
    weights: BTreeMap<String, u32>,
    tally: BTreeMap<String, u32>,
    applies: Predicate,
}

impl OccurrenceAndWeightDetector {
    /// Create a new [`OccurrenceAndWeightDetector`].
    pub fn new<I, S>(name: &'static str, candidates: I, applies: Predicate) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let weights: BTreeMap<String, u32> = candidates
            .into_iter()
            .map(|(candidate, weight)| (candidate.into(), weight))
            .collect();
        let tally = weights.keys().map(|k| (k.clone(), 0)).collect();

        Self {
            name,
            weights,
            tally,
            applies,
        }
    }

    /// Same candidates, each weighing [`DEFAULT_WEIGHT`].
    pub fn unweighted<I, S>(name: &'static str, candidates: I, applies: Predicate) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            candidates.into_iter().map(|c| (c, DEFAULT_WEIGHT)),
            applies,
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current score of every candidate.
    pub fn tally(&self) -> &BTreeMap<String, u32> {
        &self.tally
    }
}

impl AttributeDetector for OccurrenceAndWeightDetector {
    fn collect(&mut self, entry: &DirectoryEntry) {
        tracing::debug!(detector = self.name, dn = %entry.dn, "collecting ldap attributes/values");

        for (candidate, score) in self.tally.iter_mut() {
            if (self.applies)(entry, candidate) {
                let weight = self
                    .weights
                    .get(candidate)
                    .copied()
                    .unwrap_or(DEFAULT_WEIGHT);
                *score = score.saturating_add(weight);

                tracing::trace!(detector = self.name, candidate, score = *score, "collected candidate");
            }
        }
    }

    fn detect(&self) -> Result<Detection> {
        // `max_by_key` keeps the last maximum, so walk backwards to keep the
        // lowest name among equal scores.
        let (candidate, score) = self
            .tally
            .iter()
            .rev()
            .max_by_key(|(_, score)| **score)
            .ok_or(ServerError::IllegalState("detector has no candidate"))?;

        if *score == 0 {
            tracing::warn!(detector = self.name, "unable to detect attribute or attribute value");
            return Ok(Detection::Unresolved);
        }

        tracing::info!(detector = self.name, candidate, score, "detected attribute or value");
        Ok(Detection::Found(candidate.clone()))
    }

    fn reset(&mut self) {
        self.tally.values_mut().for_each(|score| *score = 0);
    }
}

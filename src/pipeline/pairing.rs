//! PairingEngine — derives classification units from the interaction log.
//!
//! Student-analysis mode, per participant:
//! ```text
//! sort by id suffix → split A (agent) / L (learner)
//! drop L[0] (opening turn, no prior question) and A[last] (closing turn)
//! pair A'[i] with L'[i] for i < min(|A'|, |L'|); surplus stays unpaired
//! ```
//! Agent-only mode makes every tutor turn its own unit.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::types::{AnalysisMode, PairingUnit};
use crate::models::InteractionRecord;
use crate::store::RecordStore;

static ID_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)$").unwrap());

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("Participant {participant_id}: interaction id '{interaction_id}' has no numeric suffix")]
    MalformedId {
        participant_id: String,
        interaction_id: String,
    },
}

/// Chronological position encoded in the trailing digits of an interaction id.
pub fn parse_sort_key(record: &InteractionRecord) -> Result<u64, PairingError> {
    ID_SUFFIX
        .captures(record.interaction_id.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .ok_or_else(|| PairingError::MalformedId {
            participant_id: record.participant_id.clone(),
            interaction_id: record.interaction_id.clone(),
        })
}

/// Sort a participant's records chronologically. Fails on the first id
/// without a usable suffix. The sort is stable.
fn chronological<'a>(records: Vec<&'a InteractionRecord>) -> Result<Vec<&'a InteractionRecord>, PairingError> {
    let mut keyed = records
        .into_iter()
        .map(|r| parse_sort_key(r).map(|k| (k, r)))
        .collect::<Result<Vec<_>, _>>()?;
    keyed.sort_by_key(|(k, _)| *k);
    Ok(keyed.into_iter().map(|(_, r)| r).collect())
}

/// Units derived from a whole store.
#[derive(Debug, Default)]
pub struct PairingOutcome<'a> {
    pub units: Vec<PairingUnit<'a>>,
    /// Participants that contributed at least one unit.
    pub participants_paired: usize,
    /// Participants that did not meet the pairing precondition.
    pub participants_skipped: usize,
    /// Participants whose ids could not be ordered.
    pub malformed: Vec<PairingError>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PairingEngine;

impl PairingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Derive the units for every participant. A malformed id only drops
    /// that participant; the rest continue.
    pub fn pair<'a>(&self, store: &'a RecordStore, mode: AnalysisMode) -> PairingOutcome<'a> {
        let mut outcome = PairingOutcome::default();

        for participant_id in store.participants() {
            let records = store.records_by_participant(participant_id);
            let result = match mode {
                AnalysisMode::StudentPairs => self.pair_participant(records),
                AnalysisMode::AgentOnly => Ok(self.agent_units(records)),
            };

            match result {
                Ok(units) if units.is_empty() => {
                    outcome.participants_skipped += 1;
                }
                Ok(units) => {
                    outcome.participants_paired += 1;
                    outcome.units.extend(units);
                }
                Err(e) => {
                    tracing::warn!(participant = %participant_id, error = %e, "Skipping participant");
                    outcome.malformed.push(e);
                }
            }
        }

        tracing::info!(
            mode = %mode,
            units = outcome.units.len(),
            participants_paired = outcome.participants_paired,
            participants_skipped = outcome.participants_skipped,
            participants_malformed = outcome.malformed.len(),
            "Pairing complete"
        );
        outcome
    }

    /// Tutor/learner pairs for one participant's records.
    pub fn pair_participant<'a>(
        &self,
        records: Vec<&'a InteractionRecord>,
    ) -> Result<Vec<PairingUnit<'a>>, PairingError> {
        let ordered = chronological(records)?;
        let participant = ordered.first().copied().map(|r| r.participant_id.as_str()).unwrap_or("");

        let (agent, learner): (Vec<_>, Vec<_>) =
            ordered.into_iter().partition(|r| r.is_agent_turn());

        tracing::debug!(
            participant = %participant,
            agent_turns = agent.len(),
            learner_turns = learner.len(),
            "Pairing participant"
        );

        if agent.is_empty() || learner.len() < 2 {
            tracing::info!(
                participant = %participant,
                agent_turns = agent.len(),
                learner_turns = learner.len(),
                "Skipping participant - need at least 1 agent turn and 2 learner turns"
            );
            return Ok(Vec::new());
        }

        let agent = &agent[..agent.len() - 1];
        let learner = &learner[1..];

        let units: Vec<_> = agent
            .iter()
            .copied()
            .zip(learner.iter().copied())
            .enumerate()
            .map(|(i, (a, l))| PairingUnit::pair(a, l, i as u32 + 1))
            .collect();

        for unit in &units {
            tracing::debug!(
                participant = %participant,
                pair = unit.pair_index,
                agent = %unit.agent().interaction_id,
                learner = %unit.target().interaction_id,
                "Paired turns"
            );
        }
        Ok(units)
    }

    /// Solo units for every tutor turn. Ordered chronologically when every id
    /// carries a suffix, otherwise in source order; never skips.
    pub fn agent_units<'a>(&self, records: Vec<&'a InteractionRecord>) -> Vec<PairingUnit<'a>> {
        let ordered = match chronological(records.clone()) {
            Ok(sorted) => sorted,
            Err(_) => records,
        };
        ordered
            .into_iter()
            .filter(|r| r.is_agent_turn())
            .enumerate()
            .map(|(i, r)| PairingUnit::solo(r, i as u32 + 1))
            .collect()
    }
}

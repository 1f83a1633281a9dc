//! Tally engine.
//!
//! Turns a poll's ballots into an ordered list of rounds. Every round maps
//! the labels still in contention to their vote count; the oldest round comes
//! first. Tallying is pure and can be re-run at any time, on open or closed
//! polls alike.

pub mod ballot;
pub mod ranked;
pub mod simple;

use crate::models::{Ballot, VoteType};
use serde::Serialize;
use std::collections::BTreeMap;

/// One round: remaining label -> votes credited in that round.
pub type Round = BTreeMap<String, u32>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Winner { label: String, votes: u32 },
    /// Unresolved: no label can be separated from the others.
    Tie { labels: Vec<String> },
    NoVotes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub rounds: Vec<Round>,
    pub outcome: Outcome,
}

impl Tally {
    pub fn final_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    pub fn winner(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Winner { label, .. } => Some(label.as_str()),
            _ => None,
        }
    }
}

/// Computes the result of a poll from its ballots.
///
/// Ballots of the other vote type are ignored; submissions are validated
/// before they are stored, so a well-formed store never holds any.
pub fn compute_result(vote_type: VoteType, ballots: &[Ballot], options: &[String]) -> Tally {
    match vote_type {
        VoteType::Simple => {
            let choices = ballots.iter().filter_map(|ballot| match ballot {
                Ballot::Simple { option } => Some(option.as_str()),
                Ballot::Ranked { .. } => None,
            });
            simple::calculate_results(options, choices)
        }
        VoteType::Ranked => {
            let rankings = ballots.iter().filter_map(|ballot| match ballot {
                Ballot::Ranked { ranks } => Some(ranks),
                Ballot::Simple { .. } => None,
            });
            ranked::calculate_results(rankings)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(pairs: &[(&str, i32)]) -> Ballot {
        Ballot::Ranked {
            ranks: pairs.iter().map(|(l, r)| (l.to_string(), *r)).collect(),
        }
    }

    fn simple(option: &str) -> Ballot {
        Ballot::Simple {
            option: option.to_string(),
        }
    }

    #[test]
    fn dispatches_on_vote_type() {
        let options = vec!["Pass".to_string(), "Fail".to_string()];
        let ballots = vec![simple("Pass"), simple("Pass"), simple("Fail")];

        let tally = compute_result(VoteType::Simple, &ballots, &options);

        assert_eq!(tally.rounds.len(), 1);
        assert_eq!(tally.winner(), Some("Pass"));
    }

    #[test]
    fn ignores_ballots_of_the_other_type() {
        let options = vec!["a".to_string(), "b".to_string()];
        let ballots = vec![simple("a"), ranked(&[("b", 1), ("a", 2)])];

        let tally = compute_result(VoteType::Ranked, &ballots, &options);

        assert_eq!(tally.rounds, vec![Round::from([("b".to_string(), 1)])]);
        assert_eq!(tally.winner(), Some("b"));
    }

    #[test]
    fn repeated_tallies_are_identical() {
        let ballots = vec![
            ranked(&[("a", 1), ("b", 2), ("c", 3)]),
            ranked(&[("b", 1), ("a", 2), ("c", 3)]),
            ranked(&[("c", 1), ("b", 2), ("a", 3)]),
            ranked(&[("a", 1), ("c", 2), ("b", 3)]),
        ];
        let options: Vec<String> = vec![];

        let first = compute_result(VoteType::Ranked, &ballots, &options);
        let second = compute_result(VoteType::Ranked, &ballots, &options);

        assert_eq!(first, second);
    }
}

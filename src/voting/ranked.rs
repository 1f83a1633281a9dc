use super::{Outcome, Round, Tally};
use std::collections::{BTreeMap, HashSet};

/// Instant-runoff tally.
///
/// Each round credits every ballot to its most preferred label that is still
/// in contention. The tally stops when a single label holds all credited
/// votes, when a label holds more than half of them (in which case a final
/// round naming only that label is appended), or when every remaining label
/// is level. Otherwise all labels sharing the lowest count are eliminated
/// together.
pub fn calculate_results<'a, I>(rankings: I) -> Tally
where
    I: IntoIterator<Item = &'a BTreeMap<String, i32>>,
{
    let preferences: Vec<Vec<&str>> = rankings.into_iter().map(preference_order).collect();
    let mut eliminated: HashSet<String> = HashSet::new();
    let mut rounds: Vec<Round> = Vec::new();

    loop {
        let mut tallied = Round::new();
        let mut vote_count: u32 = 0;
        for picks in &preferences {
            if let Some(candidate) = picks.iter().find(|label| !eliminated.contains(**label)) {
                *tallied.entry(candidate.to_string()).or_insert(0) += 1;
                vote_count += 1;
            }
        }
        rounds.push(tallied.clone());

        if tallied.len() <= 1 {
            break;
        }

        // Exactly half is not a majority
        if let Some((label, votes)) = tallied.iter().find(|(_, votes)| **votes > vote_count / 2) {
            rounds.push(Round::from([(label.clone(), *votes)]));
            break;
        }

        let lowest = tallied.values().copied().min().unwrap_or(0);
        if tallied.values().all(|votes| *votes == lowest) {
            break;
        }

        eliminated.extend(
            tallied
                .into_iter()
                .filter(|(_, votes)| *votes == lowest)
                .map(|(label, _)| label),
        );
    }

    let outcome = final_outcome(&rounds);
    Tally { rounds, outcome }
}

/// Orders a ballot's labels from most to least preferred. Only the relative
/// order of ranks matters. Equal ranks fall back to label order so the result
/// is stable even for ballots that slipped past validation.
pub fn preference_order(ranks: &BTreeMap<String, i32>) -> Vec<&str> {
    let mut ordered: Vec<(&str, i32)> = ranks
        .iter()
        .map(|(label, rank)| (label.as_str(), *rank))
        .collect();
    ordered.sort_by_key(|(_, rank)| *rank);
    ordered.into_iter().map(|(label, _)| label).collect()
}

fn final_outcome(rounds: &[Round]) -> Outcome {
    let Some(last) = rounds.last() else {
        return Outcome::NoVotes;
    };
    let mut entries = last.iter();
    match (entries.next(), entries.next()) {
        (None, _) => Outcome::NoVotes,
        (Some((label, votes)), None) => Outcome::Winner {
            label: label.clone(),
            votes: *votes,
        },
        _ => Outcome::Tie {
            labels: last.keys().cloned().collect(),
        },
    }
}

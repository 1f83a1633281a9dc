//! Ballot validation.
//!
//! Submissions are checked here before anything is stored, so the tally
//! engine can assume well-formed ballots.

use crate::models::{Ballot, Poll, VoteType};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BallotError {
    #[error("this poll does not accept {0} ballots")]
    WrongVoteType(&'static str),

    #[error("\"{0}\" is not an option in this poll")]
    UnknownOption(String),

    #[error("write-ins are not allowed in this poll")]
    WriteInsNotAllowed,

    #[error("write-in must not be empty")]
    EmptyWriteIn,

    #[error("write-in \"{0}\" is already an option")]
    WriteInCollision(String),

    #[error("write-in rank is not positive")]
    NonPositiveWriteInRank,

    #[error("ranks must be from 1 - {max}, got {rank}")]
    RankOutOfRange { rank: i32, max: usize },

    #[error("two or more candidates were ranked at {0}")]
    DuplicateRank(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleChoice {
    Option(String),
    WriteIn(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankedSubmission {
    pub ranks: BTreeMap<String, i32>,
    pub write_in: Option<(String, i32)>,
}

pub fn validate_simple(poll: &Poll, choice: SimpleChoice) -> Result<Ballot, BallotError> {
    if poll.vote_type != VoteType::Simple {
        return Err(BallotError::WrongVoteType(VoteType::Simple.as_str()));
    }

    let option = match choice {
        SimpleChoice::Option(label) if poll.has_option(&label) => label,
        SimpleChoice::Option(label) => return Err(BallotError::UnknownOption(label)),
        SimpleChoice::WriteIn(_) if !poll.allow_write_ins => {
            return Err(BallotError::WriteInsNotAllowed);
        }
        SimpleChoice::WriteIn(label) => {
            let label = label.trim().to_string();
            if label.is_empty() {
                return Err(BallotError::EmptyWriteIn);
            }
            if collides_with_option(poll, &label) {
                return Err(BallotError::WriteInCollision(label));
            }
            label
        }
    };

    Ok(Ballot::Simple { option })
}

/// Accepts a ranked ballot only if its ranks are exactly 1..=n for the n
/// labels ranked, with no rank used twice.
pub fn validate_ranked(poll: &Poll, submission: RankedSubmission) -> Result<Ballot, BallotError> {
    if poll.vote_type != VoteType::Ranked {
        return Err(BallotError::WrongVoteType(VoteType::Ranked.as_str()));
    }

    let RankedSubmission {
        mut ranks,
        write_in,
    } = submission;

    if let Some(label) = ranks.keys().find(|label| !poll.has_option(label)) {
        return Err(BallotError::UnknownOption(label.clone()));
    }

    if let Some((label, rank)) = write_in {
        if !poll.allow_write_ins {
            return Err(BallotError::WriteInsNotAllowed);
        }
        let label = label.trim().to_string();
        if label.is_empty() {
            return Err(BallotError::EmptyWriteIn);
        }
        if collides_with_option(poll, &label) {
            return Err(BallotError::WriteInCollision(label));
        }
        if rank < 1 {
            return Err(BallotError::NonPositiveWriteInRank);
        }
        ranks.insert(label, rank);
    }

    let max = ranks.len();
    let mut seen = HashSet::new();
    for rank in ranks.values().copied() {
        if rank < 1 || rank as usize > max {
            return Err(BallotError::RankOutOfRange { rank, max });
        }
        if !seen.insert(rank) {
            return Err(BallotError::DuplicateRank(rank));
        }
    }

    Ok(Ballot::Ranked { ranks })
}

// Case-insensitive match against the configured options
fn collides_with_option(poll: &Poll, label: &str) -> bool {
    poll.options.iter().any(|option| option.eq_ignore_ascii_case(label))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll(vote_type: VoteType, write_ins: bool) -> Poll {
        Poll::new(
            "creator".to_string(),
            "Elect a chair".to_string(),
            String::new(),
            vote_type,
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
            0.5,
            false,
            vec![],
            write_ins,
        )
    }

    fn submission(pairs: &[(&str, i32)]) -> RankedSubmission {
        RankedSubmission {
            ranks: pairs.iter().map(|(l, r)| (l.to_string(), *r)).collect(),
            write_in: None,
        }
    }

    #[test]
    fn accepts_a_full_ranking() {
        let ballot = validate_ranked(
            &poll(VoteType::Ranked, false),
            submission(&[("alice", 2), ("bob", 1), ("carol", 3)]),
        )
        .unwrap();

        let Ballot::Ranked { ranks } = ballot else {
            panic!("expected a ranked ballot");
        };
        assert_eq!(ranks["bob"], 1);
        assert_eq!(ranks.len(), 3);
    }

    #[test]
    fn accepts_a_partial_ranking() {
        assert!(validate_ranked(&poll(VoteType::Ranked, false), submission(&[("carol", 1)])).is_ok());
    }

    #[test]
    fn rejects_duplicate_ranks() {
        let err = validate_ranked(
            &poll(VoteType::Ranked, false),
            submission(&[("alice", 1), ("bob", 1)]),
        )
        .unwrap_err();

        // Two labels ranked means 1..=2 is the valid range, so the duplicate is the fault
        assert_eq!(err, BallotError::DuplicateRank(1));
    }

    #[test]
    fn rejects_ranks_beyond_the_ranked_count() {
        let err = validate_ranked(
            &poll(VoteType::Ranked, false),
            submission(&[("alice", 1), ("bob", 3)]),
        )
        .unwrap_err();

        assert_eq!(err, BallotError::RankOutOfRange { rank: 3, max: 2 });
    }

    #[test]
    fn rejects_non_positive_ranks() {
        let err = validate_ranked(&poll(VoteType::Ranked, false), submission(&[("alice", 0)])).unwrap_err();

        assert_eq!(err, BallotError::RankOutOfRange { rank: 0, max: 1 });
    }

    #[test]
    fn rejects_unknown_labels() {
        let err = validate_ranked(&poll(VoteType::Ranked, false), submission(&[("dave", 1)])).unwrap_err();

        assert_eq!(err, BallotError::UnknownOption("dave".to_string()));
    }

    #[test]
    fn write_in_joins_the_ranking() {
        let mut ranked = submission(&[("alice", 1)]);
        ranked.write_in = Some((" dave ".to_string(), 2));

        let ballot = validate_ranked(&poll(VoteType::Ranked, true), ranked).unwrap();

        match ballot {
            Ballot::Ranked { ranks } => assert_eq!(ranks.get("dave"), Some(&2)),
            other => panic!("unexpected ballot {other:?}"),
        }
    }

    #[test]
    fn write_in_must_not_collide() {
        let mut ranked = submission(&[("bob", 1)]);
        ranked.write_in = Some(("Alice".to_string(), 2));

        let err = validate_ranked(&poll(VoteType::Ranked, true), ranked).unwrap_err();

        assert_eq!(err, BallotError::WriteInCollision("Alice".to_string()));
    }

    #[test]
    fn simple_write_in_must_not_collide() {
        let poll = poll(VoteType::Simple, true);

        let err = validate_simple(&poll, SimpleChoice::WriteIn(" BOB ".to_string())).unwrap_err();

        assert_eq!(err, BallotError::WriteInCollision("BOB".to_string()));
        assert_eq!(
            validate_simple(&poll, SimpleChoice::WriteIn("dave".to_string())).unwrap(),
            Ballot::Simple {
                option: "dave".to_string()
            }
        );
    }

    #[test]
    fn write_in_rank_must_be_positive() {
        let mut ranked = submission(&[]);
        ranked.write_in = Some(("dave".to_string(), 0));

        let err = validate_ranked(&poll(VoteType::Ranked, true), ranked).unwrap_err();

        assert_eq!(err, BallotError::NonPositiveWriteInRank);
    }

    #[test]
    fn write_ins_need_permission() {
        let err = validate_simple(
            &poll(VoteType::Simple, false),
            SimpleChoice::WriteIn("dave".to_string()),
        )
        .unwrap_err();

        assert_eq!(err, BallotError::WriteInsNotAllowed);
    }

    #[test]
    fn simple_choice_must_exist() {
        let poll = poll(VoteType::Simple, true);

        assert!(validate_simple(&poll, SimpleChoice::Option("bob".to_string())).is_ok());
        assert_eq!(
            validate_simple(&poll, SimpleChoice::Option("dave".to_string())).unwrap_err(),
            BallotError::UnknownOption("dave".to_string())
        );
    }

    #[test]
    fn ballot_type_must_match_poll() {
        let err = validate_simple(
            &poll(VoteType::Ranked, false),
            SimpleChoice::Option("bob".to_string()),
        )
        .unwrap_err();

        assert_eq!(err, BallotError::WrongVoteType("simple"));
    }
}

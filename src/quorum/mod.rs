//! Quorum evaluation for gatekept polls.
//!
//! Pure: the caller gathers turnout and passes the current time in. The
//! evaluator never touches a store and never logs.

use crate::models::Poll;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuorumError {
    #[error("poll \"{0}\" is gatekept but has no allowed voters")]
    NoAllowedVoters(String),
}

/// Allowed voters split by whether they have cast a ballot. Voters whose
/// status could not be determined belong to neither list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Turnout {
    pub voted: Vec<String>,
    pub not_voted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Wait,
    Remind { recipients: Vec<String> },
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumPolicy {
    pub reminder_delay: Duration,
    pub close_delay: Duration,
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        Self {
            reminder_delay: Duration::hours(48),
            close_delay: Duration::hours(72),
        }
    }
}

impl QuorumPolicy {
    /// Whether the poll has been open long enough to need turnout at all.
    pub fn is_due(&self, poll: &Poll, now: DateTime<Utc>) -> bool {
        now - poll.opened_at >= self.reminder_delay
    }

    pub fn evaluate(
        &self,
        poll: &Poll,
        turnout: &Turnout,
        now: DateTime<Utc>,
    ) -> Result<Decision, QuorumError> {
        if poll.allowed_voters.is_empty() {
            return Err(QuorumError::NoAllowedVoters(poll.short_description.clone()));
        }

        if !self.is_due(poll, now) {
            return Ok(Decision::Wait);
        }

        let quorum = required_quorum(poll.quorum_fraction, poll.allowed_voters.len());
        if turnout.voted.len() < quorum {
            // Keeps reminding past the close window until quorum is met
            return Ok(Decision::Remind {
                recipients: turnout.not_voted.clone(),
            });
        }

        if now - poll.opened_at < self.close_delay {
            return Ok(Decision::Wait);
        }

        Ok(Decision::Close)
    }
}

/// `ceil(fraction * voters)`, tolerant of float error so that 2/3 of 9 is 6.
pub fn required_quorum(fraction: f64, voters: usize) -> usize {
    let exact = fraction * voters as f64;
    (exact - 1e-9).ceil().max(0.0) as usize
}

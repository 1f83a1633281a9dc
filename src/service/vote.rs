use super::{ACTIVE_GROUP, PollResults, PollService, ServiceError, User};
use crate::db::{BallotStore, PollStore};
use crate::models::Poll;
use crate::voting::ballot::{RankedSubmission, SimpleChoice, validate_ranked, validate_simple};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Only active members vote.
    NotActive,
    Closed,
    AlreadyVoted,
    /// Gatekept poll and the user is not on its allowed list.
    NotAllowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Simple(SimpleChoice),
    Ranked(RankedSubmission),
}

impl PollService {
    pub async fn can_vote(&self, user: &User, poll: &Poll) -> Result<Eligibility, ServiceError> {
        if !user.in_group(ACTIVE_GROUP) {
            return Ok(Eligibility::NotActive);
        }
        if !poll.open {
            return Ok(Eligibility::Closed);
        }
        if self.db.has_voted(&poll.id, &user.username).await? {
            return Ok(Eligibility::AlreadyVoted);
        }
        if poll.gatekept && !poll.allowed_voters.iter().any(|v| v == &user.username) {
            return Ok(Eligibility::NotAllowed);
        }
        Ok(Eligibility::Eligible)
    }

    /// Validates and stores a ballot, returning the refreshed results.
    pub async fn cast_vote(
        &self,
        user: &User,
        poll_id: &str,
        submission: Submission,
    ) -> Result<PollResults, ServiceError> {
        let poll = self.db.get_poll(poll_id).await?;
        match self.can_vote(user, &poll).await? {
            Eligibility::Eligible => {}
            other => return Err(ServiceError::CannotVote(other)),
        }

        let ballot = match submission {
            Submission::Simple(choice) => validate_simple(&poll, choice)?,
            Submission::Ranked(ranked) => validate_ranked(&poll, ranked)?,
        };
        self.db.cast_ballot(&poll.id, &user.username, &ballot).await?;
        info!("{} voted in poll {}", user.username, poll.id);

        self.tally(poll).await
    }
}

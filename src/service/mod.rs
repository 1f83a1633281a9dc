//! Poll operations upstream of the tally and lifecycle core: creation,
//! eligibility, ballots, results and manual moderation.

mod vote;

pub use vote::{Eligibility, Submission};

use crate::db::{BallotStore, Database, PollStore, StoreError};
use crate::directory::{Directory, DirectoryError, eligible_voters};
use crate::models::{Action, Poll, VoteType};
use crate::voting::ballot::BallotError;
use crate::voting::{Tally, compute_result};
use chrono::Utc;
use log::info;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

pub const ACTIVE_GROUP: &str = "active";
pub const EVALUATIONS_GROUP: &str = "eboard-evaluations";
const MODERATOR_GROUPS: [&str; 2] = ["active_rtp", "eboard"];
const ABSTAIN: &str = "Abstain";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ballot(#[from] BallotError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("no directory is configured")]
    DirectoryUnavailable,

    #[error("{0}")]
    Forbidden(String),

    #[error("invalid poll: {0}")]
    InvalidPoll(String),

    #[error("cannot vote: {0:?}")]
    CannotVote(Eligibility),
}

/// The caller, as established by authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub groups: Vec<String>,
}

impl User {
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    fn is_moderator(&self) -> bool {
        MODERATOR_GROUPS.iter().any(|group| self.in_group(group))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionPreset {
    PassFail,
    PassFailConditional,
    FailConditional,
    Custom(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct CreatePoll {
    pub short_description: String,
    pub long_description: String,
    pub vote_type: VoteType,
    pub options: OptionPreset,
    pub quorum_fraction: f64,
    pub gatekept: bool,
    pub allow_write_ins: bool,
    /// Added to the allowed voters of a gatekept poll on top of the directory.
    pub waived_users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollResults {
    pub poll: Poll,
    pub tally: Tally,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollListing {
    pub open: Vec<Poll>,
    pub closed: Vec<Poll>,
}

pub struct PollService {
    db: Arc<Database>,
    directory: Option<Arc<dyn Directory>>,
}

impl PollService {
    pub fn new(db: Arc<Database>, directory: Option<Arc<dyn Directory>>) -> Self {
        Self { db, directory }
    }

    pub async fn create_poll(&self, user: &User, request: CreatePoll) -> Result<Poll, ServiceError> {
        if !user.in_group(ACTIVE_GROUP) {
            return Err(ServiceError::Forbidden("only active members can create polls".to_string()));
        }
        if request.short_description.trim().is_empty() {
            return Err(ServiceError::InvalidPoll("a poll needs a name".to_string()));
        }
        if !(request.quorum_fraction > 0.0 && request.quorum_fraction <= 1.0) {
            return Err(ServiceError::InvalidPoll(format!(
                "quorum must be in (0, 1], got {}",
                request.quorum_fraction
            )));
        }

        let options = option_labels(&request.options, request.vote_type);
        if options.is_empty() {
            return Err(ServiceError::InvalidPoll("a poll needs at least one option".to_string()));
        }

        let allowed_voters = if request.gatekept {
            if !user.in_group(EVALUATIONS_GROUP) {
                return Err(ServiceError::Forbidden(
                    "only evaluations can create gatekept polls".to_string(),
                ));
            }
            let directory = self.directory.as_deref().ok_or(ServiceError::DirectoryUnavailable)?;
            let mut voters = eligible_voters(directory).await?;
            voters.extend(
                request
                    .waived_users
                    .iter()
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty()),
            );
            let mut seen = HashSet::new();
            voters.retain(|voter| seen.insert(voter.clone()));
            if voters.is_empty() {
                return Err(ServiceError::InvalidPoll(
                    "a gatekept poll needs at least one allowed voter".to_string(),
                ));
            }
            voters
        } else {
            Vec::new()
        };

        let poll = Poll::new(
            user.username.clone(),
            request.short_description.trim().to_string(),
            request.long_description,
            request.vote_type,
            options,
            request.quorum_fraction,
            request.gatekept,
            allowed_voters,
            request.allow_write_ins,
        );
        self.db.create_poll(&poll).await?;
        info!(
            "{} created poll {} (\"{}\", {} allowed voters)",
            user.username,
            poll.id,
            poll.short_description,
            poll.allowed_voters.len()
        );

        Ok(poll)
    }

    /// Open polls, plus closed polls the user created or voted in.
    pub async fn list_polls(&self, user: &User) -> Result<PollListing, ServiceError> {
        let open = self.db.list_open_polls().await?;
        let mut closed = self.db.list_closed_polls_voted_by(&user.username).await?;
        closed.extend(self.db.list_closed_polls_owned_by(&user.username).await?);

        let mut seen = HashSet::new();
        closed.retain(|poll| seen.insert(poll.id.clone()));
        closed.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));

        Ok(PollListing { open, closed })
    }

    /// Results are visible to everyone unless hidden, in which case only the
    /// creator sees them.
    pub async fn results(&self, user: &User, poll_id: &str) -> Result<PollResults, ServiceError> {
        let poll = self.db.get_poll(poll_id).await?;
        if poll.hidden && poll.created_by != user.username {
            return Err(ServiceError::Forbidden("results for this poll are hidden".to_string()));
        }
        self.tally(poll).await
    }

    pub(crate) async fn tally(&self, poll: Poll) -> Result<PollResults, ServiceError> {
        let ballots = self.db.list_ballots(&poll.id).await?;
        let tally = compute_result(poll.vote_type, &ballots, &poll.options);
        Ok(PollResults { poll, tally })
    }

    /// Manual close. Gatekept polls only close through the lifecycle scheduler.
    pub async fn close_poll(&self, user: &User, poll_id: &str) -> Result<(), ServiceError> {
        let poll = self.db.get_poll(poll_id).await?;
        if poll.gatekept {
            return Err(ServiceError::Forbidden("this poll cannot be closed manually".to_string()));
        }
        if poll.created_by != user.username && !user.is_moderator() {
            return Err(ServiceError::Forbidden("you cannot end this poll".to_string()));
        }

        self.db.close_poll(poll_id).await?;
        self.audit(user, poll_id, "Close/End Poll").await
    }

    pub async fn hide_results(&self, user: &User, poll_id: &str) -> Result<(), ServiceError> {
        self.set_hidden(user, poll_id, true).await
    }

    pub async fn reveal_results(&self, user: &User, poll_id: &str) -> Result<(), ServiceError> {
        self.set_hidden(user, poll_id, false).await
    }

    async fn set_hidden(&self, user: &User, poll_id: &str, hidden: bool) -> Result<(), ServiceError> {
        let poll = self.db.get_poll(poll_id).await?;
        if poll.created_by != user.username {
            return Err(ServiceError::Forbidden(
                "only the creator can change result visibility".to_string(),
            ));
        }

        self.db.set_hidden(poll_id, hidden).await?;
        self.audit(user, poll_id, if hidden { "Hide Results" } else { "Reveal Results" })
            .await
    }

    async fn audit(&self, user: &User, poll_id: &str, action: &str) -> Result<(), ServiceError> {
        info!("{} performed \"{}\" on poll {}", user.username, action, poll_id);
        self.db
            .record_action(&Action {
                poll_id: poll_id.to_string(),
                user: user.username.clone(),
                action: action.to_string(),
                at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

fn option_labels(preset: &OptionPreset, vote_type: VoteType) -> Vec<String> {
    match preset {
        OptionPreset::PassFail => vec!["Pass".into(), "Fail".into(), ABSTAIN.into()],
        OptionPreset::PassFailConditional => vec!["Pass".into(), "Fail/Conditional".into(), ABSTAIN.into()],
        OptionPreset::FailConditional => vec!["Fail".into(), "Conditional".into(), ABSTAIN.into()],
        OptionPreset::Custom(custom) => {
            let mut labels: Vec<String> = Vec::new();
            for label in custom.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
                if !labels.iter().any(|existing| existing == label) {
                    labels.push(label.to_string());
                }
            }
            if vote_type == VoteType::Simple && !labels.is_empty() && !labels.iter().any(|l| l == ABSTAIN) {
                labels.push(ABSTAIN.to_string());
            }
            labels
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub created_by: String,
    pub short_description: String,
    pub long_description: String,
    pub vote_type: VoteType,
    pub options: Vec<String>,
    pub opened_at: DateTime<Utc>,
    pub open: bool,
    pub gatekept: bool,
    pub quorum_fraction: f64,
    pub allowed_voters: Vec<String>,
    pub allow_write_ins: bool,
    // Suppresses result exposure; the tally itself is unaffected
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Simple,
    Ranked,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Simple => "simple",
            VoteType::Ranked => "ranked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "simple" => Some(VoteType::Simple),
            "ranked" => Some(VoteType::Ranked),
            _ => None,
        }
    }
}

/// A single voter's ballot. Ranks in a ranked ballot only order the labels;
/// they are not required to start at 1 or be contiguous once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Ballot {
    Simple { option: String },
    Ranked { ranks: BTreeMap<String, i32> },
}

/// Audit trail entry for manual poll operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub poll_id: String,
    pub user: String,
    pub action: String,
    pub at: DateTime<Utc>,
}

/// A directory member, as returned by the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub id: String,
    pub username: String,
}

impl Poll {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        created_by: String,
        short_description: String,
        long_description: String,
        vote_type: VoteType,
        options: Vec<String>,
        quorum_fraction: f64,
        gatekept: bool,
        allowed_voters: Vec<String>,
        allow_write_ins: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_by,
            short_description,
            long_description,
            vote_type,
            options,
            opened_at: Utc::now(),
            open: true,
            gatekept,
            quorum_fraction,
            allowed_voters,
            allow_write_ins,
            hidden: false,
        }
    }

    pub fn has_option(&self, label: &str) -> bool {
        self.options.iter().any(|option| option == label)
    }
}

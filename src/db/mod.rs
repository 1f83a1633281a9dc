use crate::models::{Action, Ballot, Poll, VoteType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, migrate::MigrateDatabase};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("poll {0} not found")]
    PollNotFound(String),

    #[error("{voter} has already voted in poll {poll}")]
    AlreadyVoted { poll: String, voter: String },

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Poll access needed by the lifecycle scheduler.
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn list_open_gatekept_polls(&self) -> Result<Vec<Poll>, StoreError>;
    async fn get_poll(&self, poll_id: &str) -> Result<Poll, StoreError>;
    /// Closing an already closed poll succeeds without changing anything.
    async fn close_poll(&self, poll_id: &str) -> Result<(), StoreError>;
}

/// Ballot and voter-of-record access.
#[async_trait]
pub trait BallotStore: Send + Sync {
    async fn has_voted(&self, poll_id: &str, voter_id: &str) -> Result<bool, StoreError>;
    async fn list_ballots(&self, poll_id: &str) -> Result<Vec<Ballot>, StoreError>;
}

const POLL_COLUMNS: &str = "id, created_by, short_description, long_description, vote_type, options, \
     opened_at, open, gatekept, quorum_fraction, allowed_voters, allow_write_ins, hidden";

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self, StoreError> {
        let in_memory = db_url.contains(":memory:");
        if !in_memory && !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            Sqlite::create_database(db_url).await?;
        }

        // Every connection to an in-memory database is a separate database
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            options = options
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>);
        }
        let pool = options.connect(db_url).await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        // Options and allowed voters are JSON arrays; timestamps are RFC 3339
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                created_by TEXT NOT NULL,
                short_description TEXT NOT NULL,
                long_description TEXT NOT NULL DEFAULT '',
                vote_type TEXT NOT NULL,
                options TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                open BOOLEAN NOT NULL DEFAULT TRUE,
                gatekept BOOLEAN NOT NULL DEFAULT FALSE,
                quorum_fraction REAL NOT NULL,
                allowed_voters TEXT NOT NULL DEFAULT '[]',
                allow_write_ins BOOLEAN NOT NULL DEFAULT FALSE,
                hidden BOOLEAN NOT NULL DEFAULT FALSE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Ballots carry no voter identity
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ballots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id TEXT NOT NULL,
                option TEXT,
                ranks TEXT,
                cast_at TEXT NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // One row per voter and poll; the primary key enforces a single vote
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS voters (
                poll_id TEXT NOT NULL,
                voter_id TEXT NOT NULL,
                PRIMARY KEY (poll_id, voter_id),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Audit trail
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id TEXT NOT NULL,
                user TEXT NOT NULL,
                action TEXT NOT NULL,
                at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn create_poll(&self, poll: &Poll) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO polls (id, created_by, short_description, long_description, vote_type, options,
                               opened_at, open, gatekept, quorum_fraction, allowed_voters, allow_write_ins, hidden)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.created_by)
        .bind(&poll.short_description)
        .bind(&poll.long_description)
        .bind(poll.vote_type.as_str())
        .bind(serde_json::to_string(&poll.options)?)
        .bind(poll.opened_at.to_rfc3339())
        .bind(poll.open)
        .bind(poll.gatekept)
        .bind(poll.quorum_fraction)
        .bind(serde_json::to_string(&poll.allowed_voters)?)
        .bind(poll.allow_write_ins)
        .bind(poll.hidden)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_open_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE open = TRUE ORDER BY opened_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(poll_from_row).collect()
    }

    pub async fn list_closed_polls_owned_by(&self, user: &str) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE created_by = ? AND open = FALSE ORDER BY opened_at DESC"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(poll_from_row).collect()
    }

    pub async fn list_closed_polls_voted_by(&self, user: &str) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {POLL_COLUMNS} FROM polls
            WHERE open = FALSE AND id IN (SELECT poll_id FROM voters WHERE voter_id = ?)
            ORDER BY opened_at DESC
            "#
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(poll_from_row).collect()
    }

    pub async fn set_hidden(&self, poll_id: &str, hidden: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE polls SET hidden = ? WHERE id = ?")
            .bind(hidden)
            .bind(poll_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PollNotFound(poll_id.to_string()));
        }
        Ok(())
    }

    pub async fn record_action(&self, action: &Action) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO actions (poll_id, user, action, at) VALUES (?, ?, ?, ?)")
            .bind(&action.poll_id)
            .bind(&action.user)
            .bind(&action.action)
            .bind(action.at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_actions(&self, poll_id: &str) -> Result<Vec<Action>, StoreError> {
        let rows = sqlx::query("SELECT poll_id, user, action, at FROM actions WHERE poll_id = ? ORDER BY id")
            .bind(poll_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Action, StoreError> {
                Ok(Action {
                    poll_id: row.try_get("poll_id")?,
                    user: row.try_get("user")?,
                    action: row.try_get("action")?,
                    at: parse_timestamp(&row.try_get::<String, _>("at")?)?,
                })
            })
            .collect()
    }

    /// Stores the voter record and the ballot together. The ballot carries no
    /// voter identity; the voter record only says that a vote was cast.
    pub async fn cast_ballot(&self, poll_id: &str, voter_id: &str, ballot: &Ballot) -> Result<(), StoreError> {
        let (option, ranks) = match ballot {
            Ballot::Simple { option } => (Some(option.clone()), None),
            Ballot::Ranked { ranks } => (None, Some(serde_json::to_string(ranks)?)),
        };

        let mut tx = self.pool.begin().await?;

        // Voter record first, so a repeat vote fails before any ballot is written
        let inserted = sqlx::query("INSERT INTO voters (poll_id, voter_id) VALUES (?, ?)")
            .bind(poll_id)
            .bind(voter_id)
            .execute(&mut *tx)
            .await;
        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(StoreError::AlreadyVoted {
                    poll: poll_id.to_string(),
                    voter: voter_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        sqlx::query("INSERT INTO ballots (poll_id, option, ranks, cast_at) VALUES (?, ?, ?, ?)")
            .bind(poll_id)
            .bind(option)
            .bind(ranks)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl PollStore for Database {
    async fn list_open_gatekept_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE open = TRUE AND gatekept = TRUE ORDER BY opened_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(poll_from_row).collect()
    }

    async fn get_poll(&self, poll_id: &str) -> Result<Poll, StoreError> {
        let row = sqlx::query(&format!("SELECT {POLL_COLUMNS} FROM polls WHERE id = ?"))
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::PollNotFound(poll_id.to_string()))?;

        poll_from_row(&row)
    }

    async fn close_poll(&self, poll_id: &str) -> Result<(), StoreError> {
        // Closing is terminal; a closed poll is left as is
        sqlx::query("UPDATE polls SET open = FALSE WHERE id = ? AND open = TRUE")
            .bind(poll_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BallotStore for Database {
    async fn has_voted(&self, poll_id: &str, voter_id: &str) -> Result<bool, StoreError> {
        let found = sqlx::query("SELECT 1 FROM voters WHERE poll_id = ? AND voter_id = ?")
            .bind(poll_id)
            .bind(voter_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        Ok(found)
    }

    async fn list_ballots(&self, poll_id: &str) -> Result<Vec<Ballot>, StoreError> {
        let rows = sqlx::query("SELECT option, ranks FROM ballots WHERE poll_id = ? ORDER BY id")
            .bind(poll_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Ballot, StoreError> {
                let option: Option<String> = row.try_get("option")?;
                let ranks: Option<String> = row.try_get("ranks")?;
                // Exactly one of the two columns is set
                match (option, ranks) {
                    (Some(option), None) => Ok(Ballot::Simple { option }),
                    (None, Some(ranks)) => Ok(Ballot::Ranked {
                        ranks: serde_json::from_str::<BTreeMap<String, i32>>(&ranks)?,
                    }),
                    _ => Err(StoreError::Corrupt(format!("ballot in poll {poll_id} has no single choice"))),
                }
            })
            .collect()
    }
}

fn poll_from_row(row: &SqliteRow) -> Result<Poll, StoreError> {
    let id: String = row.try_get("id")?;
    let vote_type_str: String = row.try_get("vote_type")?;
    let vote_type = VoteType::parse(&vote_type_str)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown vote type {vote_type_str} for poll {id}")))?;

    Ok(Poll {
        created_by: row.try_get("created_by")?,
        short_description: row.try_get("short_description")?,
        long_description: row.try_get("long_description")?,
        vote_type,
        options: serde_json::from_str(&row.try_get::<String, _>("options")?)?,
        opened_at: parse_timestamp(&row.try_get::<String, _>("opened_at")?)?,
        open: row.try_get("open")?,
        gatekept: row.try_get("gatekept")?,
        quorum_fraction: row.try_get("quorum_fraction")?,
        allowed_voters: serde_json::from_str(&row.try_get::<String, _>("allowed_voters")?)?,
        allow_write_ins: row.try_get("allow_write_ins")?,
        hidden: row.try_get("hidden")?,
        id,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn database() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn poll(gatekept: bool, vote_type: VoteType) -> Poll {
        Poll::new(
            "evals".to_string(),
            "Membership vote".to_string(),
            "Should we?".to_string(),
            vote_type,
            vec!["Pass".to_string(), "Fail".to_string(), "Abstain".to_string()],
            2.0 / 3.0,
            gatekept,
            if gatekept {
                vec!["alice".to_string(), "bob".to_string()]
            } else {
                vec![]
            },
            true,
        )
    }

    #[tokio::test]
    async fn poll_round_trips() {
        let db = database().await;
        let mut created = poll(true, VoteType::Ranked);
        created.opened_at = created.opened_at - Duration::hours(3);
        db.create_poll(&created).await.unwrap();

        let loaded = db.get_poll(&created.id).await.unwrap();

        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.vote_type, VoteType::Ranked);
        assert_eq!(loaded.options, created.options);
        assert_eq!(loaded.allowed_voters, created.allowed_voters);
        assert_eq!(loaded.opened_at.timestamp(), created.opened_at.timestamp());
        assert!(loaded.open && loaded.gatekept && loaded.allow_write_ins && !loaded.hidden);
    }

    #[tokio::test]
    async fn missing_poll_is_not_found() {
        let db = database().await;

        let err = db.get_poll("nope").await.unwrap_err();

        assert!(matches!(err, StoreError::PollNotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn lists_only_open_gatekept_polls() {
        let db = database().await;
        let gatekept = poll(true, VoteType::Simple);
        let ungated = poll(false, VoteType::Simple);
        let closed = poll(true, VoteType::Simple);
        for p in [&gatekept, &ungated, &closed] {
            db.create_poll(p).await.unwrap();
        }
        db.close_poll(&closed.id).await.unwrap();

        let polls = db.list_open_gatekept_polls().await.unwrap();

        assert_eq!(polls.len(), 1);
        assert_eq!(polls[0].id, gatekept.id);
        assert_eq!(db.list_open_polls().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn closing_twice_is_harmless() {
        let db = database().await;
        let p = poll(true, VoteType::Simple);
        db.create_poll(&p).await.unwrap();

        db.close_poll(&p.id).await.unwrap();
        db.close_poll(&p.id).await.unwrap();

        assert!(!db.get_poll(&p.id).await.unwrap().open);
    }

    #[tokio::test]
    async fn second_vote_is_rejected() {
        let db = database().await;
        let p = poll(false, VoteType::Simple);
        db.create_poll(&p).await.unwrap();
        let ballot = Ballot::Simple {
            option: "Pass".to_string(),
        };

        db.cast_ballot(&p.id, "alice", &ballot).await.unwrap();
        let err = db.cast_ballot(&p.id, "alice", &ballot).await.unwrap_err();

        assert!(matches!(err, StoreError::AlreadyVoted { .. }));
        assert!(db.has_voted(&p.id, "alice").await.unwrap());
        assert!(!db.has_voted(&p.id, "bob").await.unwrap());
        assert_eq!(db.list_ballots(&p.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ranked_ballots_keep_their_ranks() {
        let db = database().await;
        let p = poll(false, VoteType::Ranked);
        db.create_poll(&p).await.unwrap();
        let ballot = Ballot::Ranked {
            ranks: BTreeMap::from([("Fail".to_string(), 1), ("Pass".to_string(), 2)]),
        };

        db.cast_ballot(&p.id, "alice", &ballot).await.unwrap();

        assert_eq!(db.list_ballots(&p.id).await.unwrap(), vec![ballot]);
    }

    #[tokio::test]
    async fn closed_poll_listings() {
        let db = database().await;
        let owned = poll(false, VoteType::Simple);
        let voted = Poll {
            created_by: "someone".to_string(),
            ..poll(false, VoteType::Simple)
        };
        for p in [&owned, &voted] {
            db.create_poll(p).await.unwrap();
        }
        db.cast_ballot(
            &voted.id,
            "evals",
            &Ballot::Simple {
                option: "Pass".to_string(),
            },
        )
        .await
        .unwrap();

        assert!(db.list_closed_polls_owned_by("evals").await.unwrap().is_empty());

        db.close_poll(&owned.id).await.unwrap();
        db.close_poll(&voted.id).await.unwrap();

        let owned_list = db.list_closed_polls_owned_by("evals").await.unwrap();
        let voted_list = db.list_closed_polls_voted_by("evals").await.unwrap();
        assert_eq!(owned_list.len(), 1);
        assert_eq!(owned_list[0].id, owned.id);
        assert_eq!(voted_list.len(), 1);
        assert_eq!(voted_list[0].id, voted.id);
    }

    #[tokio::test]
    async fn hide_and_audit() {
        let db = database().await;
        let p = poll(false, VoteType::Simple);
        db.create_poll(&p).await.unwrap();

        db.set_hidden(&p.id, true).await.unwrap();
        db.record_action(&Action {
            poll_id: p.id.clone(),
            user: "evals".to_string(),
            action: "Hide Results".to_string(),
            at: Utc::now(),
        })
        .await
        .unwrap();

        assert!(db.get_poll(&p.id).await.unwrap().hidden);
        let actions = db.list_actions(&p.id).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, "Hide Results");
        assert!(matches!(
            db.set_hidden("missing", true).await,
            Err(StoreError::PollNotFound(_))
        ));
    }
}

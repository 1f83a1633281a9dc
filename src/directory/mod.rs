pub mod oidc;

use crate::models::Member;
use async_trait::async_trait;
use log::warn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("directory has no access token yet")]
    NoToken,

    #[error("directory rejected the request: {0}")]
    Rejected(String),

    #[error("bad directory url: {0}")]
    BadUrl(String),
}

/// Membership lookups used when a gatekept poll is created and when
/// reminders need a chat recipient.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn list_active_members(&self) -> Result<Vec<Member>, DirectoryError>;
    async fn is_gatekeep_eligible(&self, member: &Member) -> Result<bool, DirectoryError>;
    /// The chat handle reminders are sent to, if the member has linked one.
    async fn chat_handle(&self, username: &str) -> Result<Option<String>, DirectoryError>;
}

/// Usernames of every active member who passes gatekeep. Members whose
/// eligibility cannot be determined are left out.
pub async fn eligible_voters(directory: &dyn Directory) -> Result<Vec<String>, DirectoryError> {
    let members = directory.list_active_members().await?;
    let mut eligible = Vec::new();
    for member in members {
        match directory.is_gatekeep_eligible(&member).await {
            Ok(true) => eligible.push(member.username),
            Ok(false) => {}
            Err(e) => warn!("Could not check gatekeep for {}: {}", member.username, e),
        }
    }
    Ok(eligible)
}


#[cfg(test)]
mod tests {
    use super::testing::FakeDirectory;
    use super::*;

    #[tokio::test]
    async fn keeps_only_gatekept_members() {
        let directory = FakeDirectory::with_members(&[("alice", true), ("bob", false), ("carol", true)]);

        let voters = eligible_voters(&directory).await.unwrap();

        assert_eq!(voters, vec!["alice".to_string(), "carol".to_string()]);
    }

    #[tokio::test]
    async fn skips_members_that_fail_lookup() {
        let mut directory = FakeDirectory::with_members(&[("alice", true), ("bob", true)]);
        directory.broken.push("bob".to_string());

        let voters = eligible_voters(&directory).await.unwrap();

        assert_eq!(voters, vec!["alice".to_string()]);
    }
}

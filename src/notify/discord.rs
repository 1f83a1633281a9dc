use super::{NotificationSink, NotifyError};
use async_trait::async_trait;
use serenity::http::Http;
use serenity::model::id::{ChannelId, UserId};
use std::sync::Arc;

/// Sends reminders and announcements through Discord's REST API. Handles are
/// numeric user or channel ids.
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(token: &str) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
        }
    }
}

#[async_trait]
impl NotificationSink for DiscordNotifier {
    async fn send_direct(&self, recipient: &str, text: &str) -> Result<(), NotifyError> {
        let user = UserId(parse_snowflake(recipient)?);
        let channel = user.create_dm_channel(&*self.http).await?;
        channel.say(&*self.http, text).await?;
        Ok(())
    }

    async fn send_broadcast(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
        ChannelId(parse_snowflake(channel)?).say(&*self.http, text).await?;
        Ok(())
    }
}

fn parse_snowflake(handle: &str) -> Result<u64, NotifyError> {
    handle
        .trim()
        .parse::<u64>()
        .map_err(|_| NotifyError::InvalidHandle(handle.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_must_be_snowflakes() {
        assert_eq!(parse_snowflake("80351110224678912").unwrap(), 80351110224678912);
        assert!(matches!(
            parse_snowflake("@alice"),
            Err(NotifyError::InvalidHandle(h)) if h == "@alice"
        ));
    }
}

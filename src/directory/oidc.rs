use super::{Directory, DirectoryError};
use crate::models::Member;
use async_trait::async_trait;
use log::{debug, error, info};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

const RETRY_AFTER_FAILURE: Duration = Duration::from_secs(30);
const REFRESH_MARGIN_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct OidcSettings {
    /// Realm URI, e.g. `https://sso.example.org/auth/realms/house`.
    pub provider_uri: String,
    pub client_id: String,
    pub client_secret: String,
    pub active_group_id: String,
    /// Gatekeep endpoint; the username is appended.
    pub gatekeep_url: String,
    pub gatekeep_token: String,
    /// User attribute holding the member's chat handle.
    pub chat_attribute: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct GatekeepResponse {
    result: bool,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(default)]
    attributes: HashMap<String, Vec<String>>,
}

/// Directory backed by an OIDC provider's admin API.
///
/// Owns a client-credentials access token and the task that keeps it fresh.
/// The refresher starts with [`OidcDirectory::start`] and stops with
/// [`OidcDirectory::shutdown`], or when the directory is dropped.
pub struct OidcDirectory {
    http: Client,
    settings: OidcSettings,
    admin_uri: String,
    token: Arc<RwLock<Option<String>>>,
    shutdown: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
    _stop_on_drop: DropGuard,
}

impl OidcDirectory {
    pub async fn start(settings: OidcSettings) -> Result<Arc<Self>, DirectoryError> {
        let http = Client::builder().timeout(settings.request_timeout).build()?;
        let admin_uri = admin_uri(&settings.provider_uri)?;
        let token = Arc::new(RwLock::new(None));

        let first_expiry = fetch_token(&http, &settings).await.map(|(access_token, expires_in)| {
            info!("Obtained directory access token (expires in {}s)", expires_in);
            (Some(access_token), refresh_delay(expires_in))
        });
        let (initial, delay) = match first_expiry {
            Ok(found) => found,
            Err(e) => {
                error!("Failed to obtain directory access token: {}", e);
                (None, RETRY_AFTER_FAILURE)
            }
        };
        *token.write().await = initial;

        Ok(Self::with_refresher(http, settings, admin_uri, token, delay))
    }

    fn with_refresher(
        http: Client,
        settings: OidcSettings,
        admin_uri: String,
        token: Arc<RwLock<Option<String>>>,
        mut delay: Duration,
    ) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let task_http = http.clone();
        let task_settings = settings.clone();
        let task_token = Arc::clone(&token);
        let task_shutdown = shutdown.clone();
        let refresher = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = match fetch_token(&task_http, &task_settings).await {
                    Ok((access_token, expires_in)) => {
                        debug!("Refreshed directory access token");
                        *task_token.write().await = Some(access_token);
                        refresh_delay(expires_in)
                    }
                    Err(e) => {
                        error!("Failed to refresh directory access token: {}", e);
                        RETRY_AFTER_FAILURE
                    }
                };
            }
            debug!("Directory token refresher stopped");
        });

        Arc::new(Self {
            http,
            settings,
            admin_uri,
            token,
            _stop_on_drop: shutdown.clone().drop_guard(),
            shutdown,
            refresher: Mutex::new(Some(refresher)),
        })
    }

    /// Stops the token refresher and waits for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.refresher.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Directory token refresher ended abnormally: {}", e);
            }
        }
    }

    async fn bearer(&self) -> Result<String, DirectoryError> {
        self.token.read().await.clone().ok_or(DirectoryError::NoToken)
    }
}

#[async_trait]
impl Directory for OidcDirectory {
    async fn list_active_members(&self) -> Result<Vec<Member>, DirectoryError> {
        let url = format!("{}/groups/{}/members", self.admin_uri, self.settings.active_group_id);
        let members = self
            .http
            .get(url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Member>>()
            .await?;
        Ok(members)
    }

    async fn is_gatekeep_eligible(&self, member: &Member) -> Result<bool, DirectoryError> {
        let response = self
            .http
            .get(format!("{}{}", self.settings.gatekeep_url, member.username))
            .header("X-VOTE-TOKEN", &self.settings.gatekeep_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DirectoryError::Rejected(format!(
                "gatekeep lookup for {} returned {}",
                member.username,
                response.status()
            )));
        }
        Ok(response.json::<GatekeepResponse>().await?.result)
    }

    async fn chat_handle(&self, username: &str) -> Result<Option<String>, DirectoryError> {
        let users = self
            .http
            .get(format!("{}/users", self.admin_uri))
            .query(&[("username", username), ("exact", "true")])
            .bearer_auth(self.bearer().await?)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<UserRecord>>()
            .await?;

        Ok(users.into_iter().next().and_then(|user| {
            user.attributes
                .get(&self.settings.chat_attribute)
                .and_then(|values| values.first().cloned())
        }))
    }
}

async fn fetch_token(http: &Client, settings: &OidcSettings) -> Result<(String, u64), DirectoryError> {
    let response = http
        .post(format!("{}/protocol/openid-connect/token", settings.provider_uri))
        .form(&[
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(DirectoryError::Rejected(format!(
            "token endpoint returned {}",
            response.status()
        )));
    }
    let token = response.json::<TokenResponse>().await?;
    Ok((token.access_token, token.expires_in))
}

fn refresh_delay(expires_in: u64) -> Duration {
    Duration::from_secs(expires_in.saturating_sub(REFRESH_MARGIN_SECS).max(REFRESH_MARGIN_SECS))
}

/// `https://host/auth/realms/x` -> `https://host/auth/admin/realms/x`
fn admin_uri(provider_uri: &str) -> Result<String, DirectoryError> {
    let url = Url::parse(provider_uri).map_err(|e| DirectoryError::BadUrl(format!("{provider_uri}: {e}")))?;
    let path = url.path().trim_end_matches('/');
    let Some(realm_at) = path.find("/realms/") else {
        return Err(DirectoryError::BadUrl(format!("{provider_uri} has no realm")));
    };
    let origin = url.origin().ascii_serialization();
    Ok(format!("{}{}/admin{}", origin, &path[..realm_at], &path[realm_at..]))
}

//! Account authentication: offline, Mojang (Yggdrasil) and Microsoft (MSA/XBL/XSTS).
//!
//! All variants produce a [`SessionToken`] the connection uses for the session-server join during
//! encrypted logins. Tokens are refreshed by a background worker and optionally persisted to disk
//! so a restart does not need another interactive login.

use crate::config::AuthType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use uuid::Uuid;

/// The shared http client (for all account service requests).
static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .build()
        .expect("failed to create http client")
});

const YGGDRASIL_AUTHENTICATE_URL: &str = "https://authserver.mojang.com/authenticate";
const YGGDRASIL_REFRESH_URL: &str = "https://authserver.mojang.com/refresh";

/// The fixed OAuth authorize URL the operator opens for the Microsoft flow.
pub const MSA_AUTH_URL: &str = "https://login.live.com/oauth20_authorize.srf?client_id=00000000402b5328&response_type=code&scope=service%3A%3Auser.auth.xboxlive.com%3A%3AMBI_SSL&redirect_uri=https%3A%2F%2Flogin.live.com%2Foauth20_desktop.srf";

const MSA_CLIENT_ID: &str = "00000000402b5328";
const MSA_REDIRECT_URI: &str = "https://login.live.com/oauth20_desktop.srf";
const MSA_SCOPE: &str = "service::user.auth.xboxlive.com::MBI_SSL";

/// Stored tokens count as valid for one day; anything older is re-authenticated from scratch.
const TOKEN_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// The internal error type for all errors related to authentication.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// An account service could not be reached.
    #[error("authentication request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The account service rejected the supplied credentials.
    #[error("credentials rejected: {0}")]
    Credentials(String),

    /// The stored or supplied token is no longer valid.
    #[error("token expired")]
    TokenExpired,

    /// The account does not own the game.
    #[error("the account does not own the game")]
    NotOwner,

    /// Reading or writing the token file failed.
    #[error("token file error: {0}")]
    Io(#[from] std::io::Error),

    /// An account service answered with an unexpected payload.
    #[error("unexpected authentication response: {0}")]
    Unexpected(String),
}

impl AuthError {
    /// Whether retrying the same authentication can possibly succeed.
    ///
    /// Credential and ownership failures repeat forever, so they must not trigger the
    /// auto-restart path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AuthError::Credentials(_) | AuthError::NotOwner)
    }
}

/// The session credentials needed for the session-server join during login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub access_token: String,
    pub player_name: String,
    pub player_id: Uuid,
}

/// The on-disk token form, guarded by an absolute expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    auth_type: AuthType,
    access_token: String,
    /// Yggdrasil client token or MSA refresh token, depending on the variant.
    secondary_token: String,
    player_name: String,
    player_id: Uuid,
    expires_at: u64,
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// The MSA/XBL/XSTS endpoints, overridable so tests can run against a local stub.
#[derive(Debug, Clone)]
pub struct MsaEndpoints {
    pub token_url: String,
    pub xbl_url: String,
    pub xsts_url: String,
    pub mc_login_url: String,
    pub entitlements_url: String,
    pub profile_url: String,
}

impl Default for MsaEndpoints {
    fn default() -> Self {
        Self {
            token_url: "https://login.live.com/oauth20_token.srf".to_string(),
            xbl_url: "https://user.auth.xboxlive.com/user/authenticate".to_string(),
            xsts_url: "https://xsts.auth.xboxlive.com/xsts/authorize".to_string(),
            mc_login_url: "https://api.minecraftservices.com/authentication/login_with_xbox"
                .to_string(),
            entitlements_url: "https://api.minecraftservices.com/entitlements/mcstore".to_string(),
            profile_url: "https://api.minecraftservices.com/minecraft/profile".to_string(),
        }
    }
}

/// One account, in one of the three supported variants.
#[derive(Debug)]
pub enum Authenticator {
    Offline {
        username: String,
    },
    Mojang(MojangAuthenticator),
    Microsoft(MicrosoftAuthenticator),
}

impl Authenticator {
    pub fn offline(username: &str) -> Self {
        Authenticator::Offline {
            username: username.to_string(),
        }
    }

    pub fn mojang(username: &str, password: &str) -> Self {
        Authenticator::Mojang(MojangAuthenticator {
            username: username.to_string(),
            password: password.to_string(),
            client_token: Uuid::new_v4().simple().to_string(),
            access_token: None,
            profile: None,
        })
    }

    pub fn microsoft() -> Self {
        Authenticator::Microsoft(MicrosoftAuthenticator {
            endpoints: MsaEndpoints::default(),
            mc_token: None,
            refresh_token: None,
            profile: None,
        })
    }

    pub fn auth_type(&self) -> AuthType {
        match self {
            Authenticator::Offline { .. } => AuthType::Offline,
            Authenticator::Mojang(_) => AuthType::Mojang,
            Authenticator::Microsoft(_) => AuthType::Microsoft,
        }
    }

    /// The name the bot will log in with.
    pub fn player_name(&self) -> Option<&str> {
        match self {
            Authenticator::Offline { username } => Some(username),
            Authenticator::Mojang(auth) => auth.profile.as_ref().map(|(_, name)| name.as_str()),
            Authenticator::Microsoft(auth) => auth.profile.as_ref().map(|(_, name)| name.as_str()),
        }
    }

    /// The session credentials, if this variant produces any.
    pub fn session_token(&self) -> Option<SessionToken> {
        match self {
            Authenticator::Offline { .. } => None,
            Authenticator::Mojang(auth) => {
                let (id, name) = auth.profile.clone()?;
                Some(SessionToken {
                    access_token: auth.access_token.clone()?,
                    player_name: name,
                    player_id: id,
                })
            }
            Authenticator::Microsoft(auth) => {
                let (id, name) = auth.profile.clone()?;
                Some(SessionToken {
                    access_token: auth.mc_token.clone()?,
                    player_name: name,
                    player_id: id,
                })
            }
        }
    }

    /// Whether [`authenticate`](Self::authenticate) can run without an interactive OAuth code.
    pub fn needs_interactive_code(&self) -> bool {
        matches!(self, Authenticator::Microsoft(auth) if auth.refresh_token.is_none())
    }

    /// Authenticates non-interactively. Microsoft accounts require a stored refresh token; use
    /// [`authenticate_with_redirect_url`](Self::authenticate_with_redirect_url) the first time.
    pub async fn authenticate(&mut self) -> Result<(), AuthError> {
        match self {
            Authenticator::Offline { .. } => Ok(()),
            Authenticator::Mojang(auth) => auth.authenticate().await,
            Authenticator::Microsoft(auth) => match auth.refresh_token.clone() {
                Some(token) => auth.authenticate_with_refresh_token(&token).await,
                None => Err(AuthError::TokenExpired),
            },
        }
    }

    /// Completes the interactive Microsoft flow from the pasted redirect URL.
    pub async fn authenticate_with_redirect_url(&mut self, url: &str) -> Result<(), AuthError> {
        match self {
            Authenticator::Microsoft(auth) => {
                let code = extract_auth_code(url)?;
                auth.authenticate_with_code(&code).await
            }
            _ => self.authenticate().await,
        }
    }

    /// Re-validates the session with the account service.
    pub async fn refresh(&mut self) -> Result<(), AuthError> {
        match self {
            Authenticator::Offline { .. } => Ok(()),
            Authenticator::Mojang(auth) => auth.refresh().await,
            Authenticator::Microsoft(auth) => match auth.refresh_token.clone() {
                Some(token) => auth.authenticate_with_refresh_token(&token).await,
                None => Err(AuthError::TokenExpired),
            },
        }
    }

    /// The cadence of the background refresh worker, if this variant needs one.
    pub fn refresh_interval(&self) -> Option<Duration> {
        match self {
            Authenticator::Offline { .. } => None,
            Authenticator::Mojang(_) => Some(Duration::from_secs(60 * 60)),
            Authenticator::Microsoft(_) => Some(Duration::from_secs(3 * 60 * 60)),
        }
    }

    /// Persists the current tokens with an absolute expiry.
    pub fn store(&self, path: &Path) -> Result<(), AuthError> {
        let stored = match self {
            Authenticator::Offline { .. } => return Ok(()),
            Authenticator::Mojang(auth) => {
                let Some(((id, name), access_token)) =
                    auth.profile.clone().zip(auth.access_token.clone())
                else {
                    return Ok(());
                };
                StoredToken {
                    auth_type: AuthType::Mojang,
                    access_token,
                    secondary_token: auth.client_token.clone(),
                    player_name: name,
                    player_id: id,
                    expires_at: now_epoch() + TOKEN_VALIDITY.as_secs(),
                }
            }
            Authenticator::Microsoft(auth) => {
                let Some(((id, name), refresh_token)) =
                    auth.profile.clone().zip(auth.refresh_token.clone())
                else {
                    return Ok(());
                };
                StoredToken {
                    auth_type: AuthType::Microsoft,
                    access_token: auth.mc_token.clone().unwrap_or_default(),
                    secondary_token: refresh_token,
                    player_name: name,
                    player_id: id,
                    expires_at: now_epoch() + TOKEN_VALIDITY.as_secs(),
                }
            }
        };

        let rendered = serde_json::to_string_pretty(&stored)
            .map_err(|err| AuthError::Unexpected(err.to_string()))?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    /// Loads persisted tokens, discarding expired or mismatching ones.
    ///
    /// Returns whether usable tokens were restored.
    pub fn load_stored(&mut self, path: &Path) -> Result<bool, AuthError> {
        if !path.exists() {
            return Ok(false);
        }
        let raw = std::fs::read_to_string(path)?;
        let stored: StoredToken = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(cause = err.to_string(), "discarding unreadable token file");
                return Ok(false);
            }
        };
        if stored.auth_type != self.auth_type() {
            return Ok(false);
        }
        if stored.expires_at <= now_epoch() {
            info!("stored token expired, discarding");
            return Ok(false);
        }

        match self {
            Authenticator::Offline { .. } => Ok(false),
            Authenticator::Mojang(auth) => {
                auth.access_token = Some(stored.access_token);
                auth.client_token = stored.secondary_token;
                auth.profile = Some((stored.player_id, stored.player_name));
                Ok(true)
            }
            Authenticator::Microsoft(auth) => {
                auth.refresh_token = Some(stored.secondary_token);
                if !stored.access_token.is_empty() {
                    auth.mc_token = Some(stored.access_token);
                }
                auth.profile = Some((stored.player_id, stored.player_name));
                Ok(true)
            }
        }
    }
}

/// Extracts the `code` query parameter from the pasted OAuth redirect URL.
fn extract_auth_code(url: &str) -> Result<String, AuthError> {
    let url = reqwest::Url::parse(url.trim())
        .map_err(|_| AuthError::Credentials("not a valid redirect URL".to_string()))?;
    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| AuthError::Credentials("redirect URL carries no code".to_string()))
}

/// The legacy Yggdrasil account flow.
#[derive(Debug)]
pub struct MojangAuthenticator {
    username: String,
    password: String,
    client_token: String,
    access_token: Option<String>,
    profile: Option<(Uuid, String)>,
}

#[derive(Debug, Deserialize)]
struct YggdrasilResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "selectedProfile")]
    selected_profile: YggdrasilProfile,
}

#[derive(Debug, Deserialize)]
struct YggdrasilProfile {
    id: Uuid,
    name: String,
}

impl MojangAuthenticator {
    async fn authenticate(&mut self) -> Result<(), AuthError> {
        info!("authenticating with Mojang");
        let response = HTTP_CLIENT
            .post(YGGDRASIL_AUTHENTICATE_URL)
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
                "clientToken": self.client_token,
                "agent": {"name": "Minecraft", "version": 1},
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AuthError::Credentials(detail));
        }

        let body: YggdrasilResponse = response.json().await?;
        self.access_token = Some(body.access_token);
        self.profile = Some((body.selected_profile.id, body.selected_profile.name));
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), AuthError> {
        let access_token = self.access_token.clone().ok_or(AuthError::TokenExpired)?;
        info!("refreshing token with Mojang");
        let response = HTTP_CLIENT
            .post(YGGDRASIL_REFRESH_URL)
            .json(&serde_json::json!({
                "accessToken": access_token,
                "clientToken": self.client_token,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::TokenExpired);
        }

        let body: YggdrasilResponse = response.json().await?;
        self.access_token = Some(body.access_token);
        self.profile = Some((body.selected_profile.id, body.selected_profile.name));
        Ok(())
    }
}

/// The documented Microsoft account flow: MSA code/refresh token, XBL, XSTS, Minecraft services,
/// ownership check, profile fetch.
#[derive(Debug)]
pub struct MicrosoftAuthenticator {
    endpoints: MsaEndpoints,
    mc_token: Option<String>,
    refresh_token: Option<String>,
    profile: Option<(Uuid, String)>,
}

impl MicrosoftAuthenticator {
    pub fn with_endpoints(endpoints: MsaEndpoints) -> Authenticator {
        Authenticator::Microsoft(Self {
            endpoints,
            mc_token: None,
            refresh_token: None,
            profile: None,
        })
    }

    async fn authenticate_with_code(&mut self, code: &str) -> Result<(), AuthError> {
        info!("redeeming OAuth code with Microsoft");
        let (access_token, refresh_token) = self
            .fetch_msa_tokens(&[("code", code), ("grant_type", "authorization_code")])
            .await?;
        self.refresh_token = Some(refresh_token);
        self.complete_with_access_token(&access_token).await
    }

    async fn authenticate_with_refresh_token(&mut self, token: &str) -> Result<(), AuthError> {
        info!("refreshing token with Microsoft");
        let (access_token, refresh_token) = self
            .fetch_msa_tokens(&[("refresh_token", token), ("grant_type", "refresh_token")])
            .await?;
        self.refresh_token = Some(refresh_token);
        self.complete_with_access_token(&access_token).await
    }

    /// Steps XBL → XSTS → Minecraft services → ownership → profile.
    async fn complete_with_access_token(&mut self, access_token: &str) -> Result<(), AuthError> {
        let xbl_token = self.authenticate_xbl(access_token).await?;
        let (xsts_token, user_hash) = self.authenticate_xsts(&xbl_token).await?;
        let mc_token = self.authenticate_minecraft(&xsts_token, &user_hash).await?;
        if !self.check_game_ownership(&mc_token).await? {
            return Err(AuthError::NotOwner);
        }
        let profile = self.fetch_profile(&mc_token).await?;

        self.mc_token = Some(mc_token);
        self.profile = Some(profile);
        Ok(())
    }

    async fn fetch_msa_tokens(
        &self,
        grant: &[(&str, &str)],
    ) -> Result<(String, String), AuthError> {
        let mut form = vec![
            ("client_id", MSA_CLIENT_ID),
            ("redirect_uri", MSA_REDIRECT_URI),
            ("scope", MSA_SCOPE),
        ];
        form.extend_from_slice(grant);

        let response = HTTP_CLIENT
            .post(&self.endpoints.token_url)
            .form(&form)
            .send()
            .await?;
        if response.status().as_u16() == 400 {
            let body: serde_json::Value = response.json().await?;
            let description = body["error_description"]
                .as_str()
                .unwrap_or("bad token request")
                .to_string();
            return Err(AuthError::Credentials(description));
        }

        let body: serde_json::Value = response.json().await?;
        let access = field_str(&body, "/access_token")?;
        let refresh = field_str(&body, "/refresh_token")?;
        Ok((access, refresh))
    }

    async fn authenticate_xbl(&self, access_token: &str) -> Result<String, AuthError> {
        info!("authenticating with XBL");
        let response = HTTP_CLIENT
            .post(&self.endpoints.xbl_url)
            .json(&serde_json::json!({
                "Properties": {
                    "AuthMethod": "RPS",
                    "SiteName": "user.auth.xboxlive.com",
                    "RpsTicket": access_token,
                },
                "RelyingParty": "http://auth.xboxlive.com",
                "TokenType": "JWT",
            }))
            .send()
            .await?;

        let raw = response.text().await?;
        if raw.is_empty() {
            return Err(AuthError::TokenExpired);
        }
        let body: serde_json::Value =
            serde_json::from_str(&raw).map_err(|err| AuthError::Unexpected(err.to_string()))?;
        field_str(&body, "/Token")
    }

    async fn authenticate_xsts(&self, xbl_token: &str) -> Result<(String, String), AuthError> {
        info!("authenticating with XSTS");
        let response = HTTP_CLIENT
            .post(&self.endpoints.xsts_url)
            .json(&serde_json::json!({
                "Properties": {
                    "SandboxId": "RETAIL",
                    "UserTokens": [xbl_token],
                },
                "RelyingParty": "rp://api.minecraftservices.com/",
                "TokenType": "JWT",
            }))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body: serde_json::Value = response.json().await?;
        if status == 401 {
            return Err(AuthError::Credentials(format!(
                "XSTS authorization failed: XErr = {}",
                body["XErr"]
            )));
        }

        let token = field_str(&body, "/Token")?;
        let user_hash = field_str(&body, "/DisplayClaims/xui/0/uhs")?;
        Ok((token, user_hash))
    }

    async fn authenticate_minecraft(
        &self,
        xsts_token: &str,
        user_hash: &str,
    ) -> Result<String, AuthError> {
        info!("authenticating with Minecraft services");
        let response = HTTP_CLIENT
            .post(&self.endpoints.mc_login_url)
            .json(&serde_json::json!({
                "identityToken": format!("XBL3.0 x={user_hash};{xsts_token}"),
            }))
            .send()
            .await?;

        let body: serde_json::Value = response.json().await?;
        field_str(&body, "/access_token")
    }

    async fn check_game_ownership(&self, mc_token: &str) -> Result<bool, AuthError> {
        info!("checking game ownership");
        let response = HTTP_CLIENT
            .get(&self.endpoints.entitlements_url)
            .bearer_auth(mc_token)
            .send()
            .await?;

        let body: serde_json::Value = response.json().await?;
        Ok(body["items"].as_array().is_some_and(|items| !items.is_empty()))
    }

    async fn fetch_profile(&self, mc_token: &str) -> Result<(Uuid, String), AuthError> {
        info!("fetching game profile");
        let response = HTTP_CLIENT
            .get(&self.endpoints.profile_url)
            .bearer_auth(mc_token)
            .send()
            .await?;

        let body: serde_json::Value = response.json().await?;
        let id = field_str(&body, "/id")?;
        let id = Uuid::parse_str(&id)
            .map_err(|_| AuthError::Unexpected(format!("malformed profile id: {id}")))?;
        let name = field_str(&body, "/name")?;
        Ok((id, name))
    }
}

fn field_str(body: &serde_json::Value, pointer: &str) -> Result<String, AuthError> {
    body.pointer(pointer)
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .ok_or_else(|| AuthError::Unexpected(format!("missing field {pointer}")))
}

/// A shared, interruptable view on one authenticator.
#[derive(Clone)]
pub struct AuthHandle {
    inner: Arc<tokio::sync::Mutex<Authenticator>>,
    authenticated: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
    refresher_running: Arc<AtomicBool>,
}

impl AuthHandle {
    pub fn new(authenticator: Authenticator) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(authenticator)),
            authenticated: Arc::new(AtomicBool::new(false)),
            interrupted: Arc::new(AtomicBool::new(false)),
            refresher_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn authenticator(&self) -> &Arc<tokio::sync::Mutex<Authenticator>> {
        &self.inner
    }

    pub fn has_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::Relaxed);
        self.spawn_refresh_worker();
    }

    /// Stops the refresh worker, e.g. when the whole bot is being unloaded.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    /// Runs the periodic token refresh until interrupted. Failures drop the authenticated flag so
    /// the next connect re-authenticates from scratch.
    fn spawn_refresh_worker(&self) {
        if self.refresher_running.swap(true, Ordering::Relaxed) {
            return;
        }

        let handle = self.clone();
        tokio::spawn(async move {
            let interval = {
                let authenticator = handle.inner.lock().await;
                authenticator.refresh_interval()
            };
            let Some(interval) = interval else {
                handle.refresher_running.store(false, Ordering::Relaxed);
                return;
            };

            loop {
                // sleep in one second slices so an interrupt is honored promptly
                for _ in 0..interval.as_secs() {
                    if handle.interrupted.load(Ordering::Relaxed) {
                        handle.refresher_running.store(false, Ordering::Relaxed);
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }

                let mut authenticator = handle.inner.lock().await;
                match authenticator.refresh().await {
                    Ok(()) => info!("token refreshed"),
                    Err(err) => {
                        error!(cause = err.to_string(), "token refresh failed");
                        handle.authenticated.store(false, Ordering::Relaxed);
                        handle.refresher_running.store(false, Ordering::Relaxed);
                        return;
                    }
                }
            }
        });
    }
}

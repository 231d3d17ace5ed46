//! Credential broker.
//!
//! Orchestrates the config-resolved SSO session, the flow engine and the
//! secure cache to answer two questions: "do I have a usable bearer token
//! for this session?" ([`Authorizer::authorize`]) and "do I have usable
//! short-lived credentials for this account/role?"
//! ([`Authorizer::get_role_credentials`]), refreshing or re-authorizing
//! as needed. Cache writes are best-effort throughout: a freshly obtained
//! credential is never discarded because it could not be persisted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::sso::{BearerTokens, RoleCredentials, SsoClient};
use crate::store::{CredentialCache, SecretStore};

/// OAuth client display name sent with dynamic registration.
const DEFAULT_CLIENT_NAME: &str = "rolekey";

/// Safety margins and deadlines, kept as configuration constants rather
/// than scattered literals.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// Minimum remaining validity to accept a cached bearer token.
    pub token_refresh_margin: Duration,
    /// Minimum remaining validity to reuse a client registration.
    pub client_expiry_margin: Duration,
    /// How long to wait for the sign-in callback.
    pub callback_timeout: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            token_refresh_margin: Duration::from_secs(5 * 60),
            client_expiry_margin: Duration::from_secs(24 * 60 * 60),
            callback_timeout: Duration::from_secs(3 * 60),
        }
    }
}

/// The credential broker for one SSO session.
pub struct Authorizer {
    session_name: String,
    client_name: String,
    cache: CredentialCache,
    sso: SsoClient,
    tunables: Tunables,
    open_browser: bool,
}

impl Authorizer {
    /// Create a broker for the given session over a secret store.
    pub fn new(
        session_name: impl Into<String>,
        sso: SsoClient,
        store: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            session_name: session_name.into(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            cache: CredentialCache::new(store),
            sso,
            tunables: Tunables::default(),
            open_browser: true,
        }
    }

    /// Override the safety margins.
    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }

    /// Override the registered client display name.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Disable the automatic browser launch (the authorize URL is printed
    /// instead).
    pub fn with_browser(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }

    /// The flow engine, for account/role listings after authorization.
    pub fn sso(&self) -> &SsoClient {
        &self.sso
    }

    /// Ensure a usable bearer token for this session, registering,
    /// refreshing or re-authorizing as needed.
    pub async fn authorize(&mut self) -> Result<()> {
        let new_client = self.ensure_client_registration().await?;

        let mut tokens: Option<BearerTokens> = None;
        if !new_client {
            tokens = match self.cache.tokens(&self.session_name) {
                Ok(t) => t,
                Err(err) => {
                    warn!(error = %err, "failed to read cached tokens");
                    None
                }
            };
            if let Some(t) = tokens.take() {
                // stored tokens are only usable with the registration
                // that produced them
                if Some(t.client_id.as_str()) == self.sso.client_id() {
                    debug!(expires_at = t.expires_at, "have cached access token");
                    self.sso.set_tokens(t.clone());
                    tokens = Some(t);
                } else {
                    debug!("cached token was issued to a different client");
                }
            }
        }

        let deadline =
            Utc::now().timestamp() + self.tunables.token_refresh_margin.as_secs() as i64;
        if let Some(t) = &tokens {
            if t.expires_at >= deadline {
                return Ok(());
            }
        }

        let has_refresh_token = tokens
            .as_ref()
            .is_some_and(|t| t.refresh_token.as_deref().is_some_and(|r| !r.is_empty()));
        if has_refresh_token {
            debug!("refreshing stale access token");
            match self.sso.refresh_tokens().await {
                Ok(fresh) => {
                    self.persist_tokens(&fresh);
                    info!(expires_at = fresh.expires_at, "obtained new access token");
                    return Ok(());
                }
                Err(Error::RefreshTokenInvalid) => {
                    debug!("refresh token is invalid, starting over");
                }
                // unknown failures are not safe to paper over with a
                // fresh sign-in
                Err(err) => return Err(err),
            }
        }

        self.reauthorize().await
    }

    /// Run a full browser re-authorization for this session.
    pub async fn reauthorize(&mut self) -> Result<()> {
        let attempt = self.sso.begin_authorize()?;
        info!(url = attempt.url(), "opening browser to complete authorization");

        if self.open_browser {
            if let Err(err) = launch_browser(attempt.url()) {
                warn!(error = %err, "could not launch a browser");
                eprintln!("Please open this link to sign in:\n{}", attempt.url());
            }
        } else {
            eprintln!("Open this link to sign in:\n{}", attempt.url());
        }

        let tokens = self
            .sso
            .listen_for_callback(attempt, self.tunables.callback_timeout)
            .await?;
        info!(expires_at = tokens.expires_at, "obtained new access token");
        self.persist_tokens(&tokens);
        Ok(())
    }

    /// Get short-lived credentials for one (account, role) pair.
    ///
    /// A non-negative `freshness_minutes` accepts a cached entry whose
    /// expiration is at least that far away; a negative value skips the
    /// cache entirely. Issuance is gated behind user consent naming the
    /// account, role, and requesting process.
    pub async fn get_role_credentials(
        &mut self,
        account_id: &str,
        role_name: &str,
        freshness_minutes: i64,
    ) -> Result<RoleCredentials> {
        if freshness_minutes >= 0 {
            let cached = match self.cache.role_credentials(account_id, role_name) {
                Ok(c) => c,
                Err(err) => {
                    warn!(error = %err, "failed to read cached role credentials");
                    None
                }
            };

            let threshold = Utc::now().timestamp() + freshness_minutes * 60;
            if let Some(creds) = cached {
                if creds.expiration >= threshold {
                    debug!(
                        expiration = creds.expiration,
                        "using cached role credentials"
                    );
                    return Ok(creds);
                }
            }
        }

        let account_label = self.account_label(account_id).await;
        let process = parent_process_name();
        let reason = format!(
            "give role credentials for account {account_label}, role \"{role_name}\" to process \"{process}\""
        );
        if let Err(err) = self.cache.store().request_consent(&reason) {
            return Err(match err {
                Error::ConsentDenied(_) => err,
                other => Error::ConsentDenied(other.to_string()),
            });
        }

        let creds = self.sso.role_credentials(account_id, role_name).await?;

        if let Err(err) = self.cache.set_role_credentials(account_id, role_name, &creds) {
            warn!(error = %err, "failed to cache role credentials");
        }
        Ok(creds)
    }

    /// Ensure a client registration with enough remaining validity,
    /// registering a new one otherwise. Returns whether a registration
    /// was just performed - in that case any previously cached token no
    /// longer belongs to the active client.
    async fn ensure_client_registration(&mut self) -> Result<bool> {
        let cached = match self.cache.client_credentials(&self.session_name) {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, "failed to read cached client registration");
                None
            }
        };

        let margin =
            Utc::now().timestamp() + self.tunables.client_expiry_margin.as_secs() as i64;
        match cached {
            Some(creds) if creds.expires_at > margin => {
                debug!(expires_at = creds.expires_at, "found existing client registration");
                self.sso.configure_client(creds);
                return Ok(false);
            }
            Some(creds) => {
                debug!(expires_at = creds.expires_at, "client registration is near expiry");
            }
            None => debug!("no existing client registration"),
        }

        let creds = self.sso.register_client(&self.client_name).await?;
        info!(expires_at = creds.expires_at, "registered new OAuth2 client");
        if let Err(err) = self.cache.set_client_credentials(&self.session_name, &creds) {
            warn!(error = %err, "failed to cache client registration");
        }
        Ok(true)
    }

    async fn account_label(&self, account_id: &str) -> String {
        match self.sso.accounts().await {
            Ok(accounts) => accounts
                .iter()
                .find(|a| a.account_id == account_id)
                .map(|a| format!("{} ({}, {})", a.account_name, a.account_id, a.email_address))
                .unwrap_or_else(|| account_id.to_string()),
            Err(err) => {
                warn!(error = %err, "failed to list accounts for the consent prompt");
                account_id.to_string()
            }
        }
    }

    fn persist_tokens(&self, tokens: &BearerTokens) {
        if let Err(err) = self.cache.set_tokens(&self.session_name, tokens) {
            warn!(error = %err, "failed to cache tokens");
        }
    }
}

/// Open the user's default browser on the authorize URL. Failure is
/// non-fatal; the caller prints the URL instead.
fn launch_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    let program = "open";
    #[cfg(not(target_os = "macos"))]
    let program = "xdg-open";

    std::process::Command::new(program)
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(|_| ())
}

/// Best-effort name of the parent process, for the consent prompt.
fn parent_process_name() -> String {
    #[cfg(unix)]
    {
        let ppid = std::os::unix::process::parent_id();
        if let Ok(comm) = std::fs::read_to_string(format!("/proc/{ppid}/comm")) {
            let comm = comm.trim();
            if !comm.is_empty() {
                return comm.to_string();
            }
        }
        if let Ok(output) = std::process::Command::new("ps")
            .args(["-o", "comm=", "-p", &ppid.to_string()])
            .output()
        {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }
    "(unknown process)".to_string()
}

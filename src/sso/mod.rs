//! OAuth/SSO flow engine.
//!
//! Implements the identity-provider side of the credential lifecycle:
//! - dynamic client registration,
//! - PKCE authorization-code issuance (see [`AuthorizeAttempt`]),
//! - the one-shot loopback callback listener ([`SsoClient::listen_for_callback`]),
//! - token refresh,
//! - paginated account/role listing and role-credential issuance.
//!
//! Ordering is enforced by construction: registration must exist before
//! an authorize attempt can be issued, and the listing/issuance calls
//! fail fast without a bearer token.

pub mod listener;
pub mod pkce;

pub use listener::AuthorizeAttempt;
pub use pkce::Pkce;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Scope requested for account/role access.
const ACCOUNT_ACCESS_SCOPE: &str = "sso:account:access";

/// Fixed loopback port registered as the OAuth redirect target.
pub const DEFAULT_CALLBACK_PORT: u16 = 65065;

/// Bearer-token header for the SSO portal APIs.
const BEARER_TOKEN_HEADER: &str = "x-amz-sso_bearer_token";

// =============================================================================
// Records and listings
// =============================================================================

/// OAuth client registration issued by the identity provider. One per
/// (application, SSO session); valid for multiple process lifetimes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Epoch seconds.
    pub expires_at: i64,
}

/// Bearer tokens for the identity provider's account/role APIs. Bound to
/// the client registration that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerTokens {
    pub access_token: String,
    pub client_id: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Epoch seconds.
    pub expires_at: i64,
}

/// Short-lived cloud credentials for one (account, role) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// Epoch seconds.
    pub expiration: i64,
    pub account_id: String,
}

/// One account the signed-in identity can access. Read-only listing,
/// never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub account_id: String,
    pub account_name: String,
    pub email_address: String,
}

/// One role available within an account. Read-only listing, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleInfo {
    pub account_id: String,
    pub role_name: String,
}

// =============================================================================
// Endpoints
// =============================================================================

/// Identity-provider endpoints, derived from the SSO region. Overridable
/// for tests.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// OIDC base URL (client registration, authorize, token).
    pub oidc: String,
    /// SSO portal base URL (account/role listings, role credentials).
    pub portal: String,
}

impl Endpoints {
    /// Standard endpoints for an AWS region.
    pub fn for_region(region: &str) -> Self {
        Self {
            oidc: format!("https://oidc.{region}.amazonaws.com"),
            portal: format!("https://portal.sso.{region}.amazonaws.com"),
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientResponse {
    client_id: String,
    client_secret: String,
    client_secret_expires_at: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateTokenResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) refresh_token: Option<String>,
    pub(crate) expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenErrorResponse {
    fn is_invalid_grant(&self) -> bool {
        self.error == "invalid_grant" || self.error.contains("InvalidGrant")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountListResponse {
    #[serde(default)]
    account_list: Vec<AccountInfo>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleListResponse {
    #[serde(default)]
    role_list: Vec<RoleInfo>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentialsResponse {
    role_credentials: RoleCredentialsWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentialsWire {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    /// Epoch milliseconds on the wire.
    expiration: i64,
}

// =============================================================================
// Token endpoint helpers
// =============================================================================

/// Everything the callback handler needs to exchange an authorization
/// code without borrowing the client.
#[derive(Debug, Clone)]
pub(crate) struct TokenExchange {
    pub(crate) http: reqwest::Client,
    pub(crate) token_url: String,
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) redirect_uri: String,
}

/// POST to the token endpoint. `map_invalid_grant` turns a provider
/// `invalid_grant` into the distinguished [`Error::RefreshTokenInvalid`]
/// so the broker can fall back to a full re-authorization.
async fn post_token(
    http: &reqwest::Client,
    url: &str,
    payload: &serde_json::Value,
    operation: &'static str,
    map_invalid_grant: bool,
) -> Result<CreateTokenResponse> {
    let response = http.post(url).json(payload).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
            if map_invalid_grant && err.is_invalid_grant() {
                return Err(Error::RefreshTokenInvalid);
            }
            return Err(Error::provider(
                operation,
                status.as_u16(),
                err.error_description.unwrap_or(err.error),
            ));
        }
        return Err(Error::provider(operation, status.as_u16(), body));
    }

    serde_json::from_str(&body)
        .map_err(|e| Error::provider(operation, status.as_u16(), format!("invalid response: {e}")))
}

/// Exchange an authorization code (plus its PKCE verifier) for tokens.
pub(crate) async fn exchange_authorization_code(
    exchange: &TokenExchange,
    code: &str,
    verifier: &str,
) -> Result<BearerTokens> {
    let payload = serde_json::json!({
        "clientId": exchange.client_id,
        "clientSecret": exchange.client_secret,
        "grantType": "authorization_code",
        "code": code,
        "codeVerifier": verifier,
        "redirectUri": exchange.redirect_uri,
    });

    let response = post_token(
        &exchange.http,
        &exchange.token_url,
        &payload,
        "create token",
        false,
    )
    .await?;

    Ok(BearerTokens {
        access_token: response.access_token,
        client_id: exchange.client_id.clone(),
        refresh_token: response.refresh_token,
        expires_at: Utc::now().timestamp() + response.expires_in,
    })
}

// =============================================================================
// SsoClient
// =============================================================================

/// Client for one identity-provider tenant (start URL + region).
///
/// Holds the active client registration and bearer tokens; per-attempt
/// authorize state lives in [`AuthorizeAttempt`] values instead.
#[derive(Debug, Clone)]
pub struct SsoClient {
    region: String,
    start_url: String,
    callback_port: u16,
    endpoints: Endpoints,
    http: reqwest::Client,
    registration: Option<ClientCredentials>,
    tokens: Option<BearerTokens>,
}

impl SsoClient {
    /// Create a client for the given SSO region and start URL.
    pub fn new(region: impl Into<String>, start_url: impl Into<String>) -> Self {
        let region = region.into();
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            endpoints: Endpoints::for_region(&region),
            region,
            start_url: start_url.into(),
            callback_port: DEFAULT_CALLBACK_PORT,
            http,
            registration: None,
            tokens: None,
        }
    }

    /// Override the provider endpoints (tests).
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Override the loopback callback port.
    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = port;
        self
    }

    /// Override the HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// The SSO region.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The start URL identifying the tenant.
    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    /// The id of the active client registration, if configured.
    pub fn client_id(&self) -> Option<&str> {
        self.registration.as_ref().map(|r| r.client_id.as_str())
    }

    /// Install a (cached) client registration.
    pub fn configure_client(&mut self, credentials: ClientCredentials) {
        self.registration = Some(credentials);
    }

    /// Install (cached) bearer tokens.
    pub fn set_tokens(&mut self, tokens: BearerTokens) {
        self.tokens = Some(tokens);
    }

    /// The current bearer tokens, if any.
    pub fn tokens(&self) -> Option<&BearerTokens> {
        self.tokens.as_ref()
    }

    /// The OAuth redirect target served by the callback listener.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}", self.callback_port)
    }

    fn access_token(&self) -> Result<&str> {
        self.tokens
            .as_ref()
            .filter(|t| !t.access_token.is_empty())
            .map(|t| t.access_token.as_str())
            .ok_or(Error::NotAuthorized)
    }

    /// Register a public OAuth client with the identity provider and
    /// install the resulting credentials.
    pub async fn register_client(&mut self, name: &str) -> Result<ClientCredentials> {
        let payload = serde_json::json!({
            "clientName": name,
            "clientType": "public",
            "grantTypes": ["refresh_token", "authorization_code"],
            "scopes": [ACCOUNT_ACCESS_SCOPE],
            "issuerUrl": self.start_url,
            "redirectUris": [self.redirect_uri()],
        });

        let response = self
            .http
            .post(format!("{}/client/register", self.endpoints.oidc))
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::provider("register client", status.as_u16(), body));
        }

        let registered: RegisterClientResponse = serde_json::from_str(&body).map_err(|e| {
            Error::provider(
                "register client",
                status.as_u16(),
                format!("invalid response: {e}"),
            )
        })?;

        let credentials = ClientCredentials {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
            expires_at: registered.client_secret_expires_at,
        };
        self.configure_client(credentials.clone());

        debug!(expires_at = credentials.expires_at, "registered OAuth2 client");
        Ok(credentials)
    }

    /// Start an authorization attempt: fresh PKCE pair and anti-CSRF
    /// state, returned as a value object together with the authorize URL.
    /// Nothing is retained on the client; the attempt is single-use and
    /// consumed by [`SsoClient::listen_for_callback`].
    pub fn begin_authorize(&self) -> Result<AuthorizeAttempt> {
        let registration = self.registration.as_ref().ok_or(Error::NotRegistered)?;

        let pkce = Pkce::generate();
        let state = pkce::random_token();
        let url = format!(
            "{}/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256&state={}",
            self.endpoints.oidc,
            urlencoding::encode(&registration.client_id),
            urlencoding::encode(&self.redirect_uri()),
            urlencoding::encode(ACCOUNT_ACCESS_SCOPE),
            urlencoding::encode(&pkce.challenge),
            urlencoding::encode(&state),
        );

        Ok(AuthorizeAttempt::new(url, state, pkce))
    }

    /// Exchange the refresh token for a new access token, rotating the
    /// refresh token if the provider returns one. A provider-reported
    /// invalid grant surfaces as [`Error::RefreshTokenInvalid`].
    pub async fn refresh_tokens(&mut self) -> Result<BearerTokens> {
        let registration = self.registration.as_ref().ok_or(Error::NotRegistered)?;
        let refresh_token = self
            .tokens
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .ok_or(Error::NotAuthorized)?;

        let payload = serde_json::json!({
            "clientId": registration.client_id,
            "clientSecret": registration.client_secret,
            "grantType": "refresh_token",
            "refreshToken": refresh_token,
        });

        let response = post_token(
            &self.http,
            &format!("{}/token", self.endpoints.oidc),
            &payload,
            "refresh tokens",
            true,
        )
        .await?;

        let tokens = BearerTokens {
            access_token: response.access_token,
            client_id: registration.client_id.clone(),
            refresh_token: response.refresh_token.or(Some(refresh_token)),
            expires_at: Utc::now().timestamp() + response.expires_in,
        };
        self.tokens = Some(tokens.clone());

        debug!(expires_at = tokens.expires_at, "refreshed access token");
        Ok(tokens)
    }

    /// All accounts the signed-in identity can access, accumulated across
    /// provider pages.
    pub async fn accounts(&self) -> Result<Vec<AccountInfo>> {
        let token = self.access_token()?;
        let url = format!("{}/assignment/accounts", self.endpoints.portal);

        let mut accounts = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).header(BEARER_TOKEN_HEADER, token);
            if let Some(t) = &next {
                request = request.query(&[("next_token", t.as_str())]);
            }
            let page: AccountListResponse = fetch_page(request, "list accounts").await?;
            accounts.extend(page.account_list);
            next = page.next_token;
            if next.is_none() {
                break;
            }
        }
        Ok(accounts)
    }

    /// All roles available in an account, accumulated across provider
    /// pages.
    pub async fn account_roles(&self, account_id: &str) -> Result<Vec<RoleInfo>> {
        let token = self.access_token()?;
        let url = format!("{}/assignment/roles", self.endpoints.portal);

        let mut roles = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .header(BEARER_TOKEN_HEADER, token)
                .query(&[("account_id", account_id)]);
            if let Some(t) = &next {
                request = request.query(&[("next_token", t.as_str())]);
            }
            let page: RoleListResponse = fetch_page(request, "list account roles").await?;
            roles.extend(page.role_list);
            next = page.next_token;
            if next.is_none() {
                break;
            }
        }
        Ok(roles)
    }

    /// Issue short-lived credentials for one (account, role) pair.
    pub async fn role_credentials(
        &self,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials> {
        let token = self.access_token()?;

        let response: RoleCredentialsResponse = fetch_page(
            self.http
                .get(format!("{}/federation/credentials", self.endpoints.portal))
                .header(BEARER_TOKEN_HEADER, token)
                .query(&[("account_id", account_id), ("role_name", role_name)]),
            "get role credentials",
        )
        .await?;

        let wire = response.role_credentials;
        Ok(RoleCredentials {
            access_key_id: wire.access_key_id,
            secret_access_key: wire.secret_access_key,
            session_token: wire.session_token,
            // the provider reports epoch milliseconds
            expiration: wire.expiration / 1000,
            account_id: account_id.to_string(),
        })
    }
}

/// Send a portal request and decode one page, wrapping failures with the
/// operation name.
async fn fetch_page<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
    operation: &'static str,
) -> Result<T> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(Error::provider(operation, status.as_u16(), body));
    }
    serde_json::from_str(&body)
        .map_err(|e| Error::provider(operation, status.as_u16(), format!("invalid response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> SsoClient {
        SsoClient::new("us-east-1", "https://corp.awsapps.com/start").with_endpoints(Endpoints {
            oidc: server.uri(),
            portal: server.uri(),
        })
    }

    fn registered_client(server: &MockServer) -> SsoClient {
        let mut client = test_client(server);
        client.configure_client(ClientCredentials {
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            expires_at: Utc::now().timestamp() + 86_400 * 90,
        });
        client
    }

    fn authorized_client(server: &MockServer) -> SsoClient {
        let mut client = registered_client(server);
        client.set_tokens(BearerTokens {
            access_token: "bearer".into(),
            client_id: "client-1".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Utc::now().timestamp() + 3600,
        });
        client
    }

    #[test]
    fn test_endpoints_for_region() {
        let endpoints = Endpoints::for_region("eu-central-1");
        assert_eq!(endpoints.oidc, "https://oidc.eu-central-1.amazonaws.com");
        assert_eq!(
            endpoints.portal,
            "https://portal.sso.eu-central-1.amazonaws.com"
        );
    }

    #[test]
    fn test_begin_authorize_requires_registration() {
        let client = SsoClient::new("us-east-1", "https://corp.awsapps.com/start");
        assert!(matches!(
            client.begin_authorize(),
            Err(Error::NotRegistered)
        ));
    }

    #[test]
    fn test_begin_authorize_url() {
        let mut client = SsoClient::new("us-east-1", "https://corp.awsapps.com/start")
            .with_callback_port(4444);
        client.configure_client(ClientCredentials {
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            expires_at: 0,
        });

        let attempt = client.begin_authorize().unwrap();
        let url = attempt.url();
        assert!(url.starts_with("https://oidc.us-east-1.amazonaws.com/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains(&urlencoding::encode("http://127.0.0.1:4444").into_owned()));
        assert!(url.contains("scope=sso%3Aaccount%3Aaccess"));
    }

    #[test]
    fn test_attempts_are_independent() {
        let mut client = SsoClient::new("us-east-1", "https://corp.awsapps.com/start");
        client.configure_client(ClientCredentials {
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            expires_at: 0,
        });

        let first = client.begin_authorize().unwrap();
        let second = client.begin_authorize().unwrap();
        assert_ne!(first.url(), second.url());
    }

    #[tokio::test]
    async fn test_listings_fail_fast_without_token() {
        let server = MockServer::start().await;
        let client = registered_client(&server);

        assert!(matches!(
            client.accounts().await,
            Err(Error::NotAuthorized)
        ));
        assert!(matches!(
            client.account_roles("111122223333").await,
            Err(Error::NotAuthorized)
        ));
        assert!(matches!(
            client.role_credentials("111122223333", "Admin").await,
            Err(Error::NotAuthorized)
        ));
    }

    #[tokio::test]
    async fn test_register_client() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/client/register"))
            .and(body_partial_json(json!({
                "clientType": "public",
                "grantTypes": ["refresh_token", "authorization_code"],
                "issuerUrl": "https://corp.awsapps.com/start",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clientId": "client-9",
                "clientSecret": "s3cret",
                "clientSecretExpiresAt": 1_900_000_000,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = test_client(&server);
        let creds = client.register_client("rolekey").await.unwrap();
        assert_eq!(creds.client_id, "client-9");
        assert_eq!(creds.expires_at, 1_900_000_000);
        assert_eq!(client.client_id(), Some("client-9"));
    }

    #[tokio::test]
    async fn test_refresh_tokens_rotates_refresh_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_partial_json(json!({
                "grantType": "refresh_token",
                "refreshToken": "refresh",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "bearer-2",
                "refreshToken": "refresh-2",
                "expiresIn": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = authorized_client(&server);
        let tokens = client.refresh_tokens().await.unwrap();
        assert_eq!(tokens.access_token, "bearer-2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(tokens.client_id, "client-1");
        assert!(tokens.expires_at > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn test_refresh_tokens_preserves_old_refresh_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "bearer-2",
                "expiresIn": 3600,
            })))
            .mount(&server)
            .await;

        let mut client = authorized_client(&server);
        let tokens = client.refresh_tokens().await.unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh"));
    }

    #[tokio::test]
    async fn test_refresh_invalid_grant_is_distinguished() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "refresh token revoked",
            })))
            .mount(&server)
            .await;

        let mut client = authorized_client(&server);
        assert!(matches!(
            client.refresh_tokens().await,
            Err(Error::RefreshTokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_refresh_other_errors_carry_context() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "server_error",
            })))
            .mount(&server)
            .await;

        let mut client = authorized_client(&server);
        match client.refresh_tokens().await {
            Err(Error::Provider {
                operation, status, ..
            }) => {
                assert_eq!(operation, "refresh tokens");
                assert_eq!(status, 500);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_accounts_paginate_in_order() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/assignment/accounts"))
            .and(query_param_is_missing("next_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accountList": [
                    {"accountId": "1", "accountName": "one", "emailAddress": "one@corp.example"},
                ],
                "nextToken": "page-2",
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/assignment/accounts"))
            .and(query_param("next_token", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accountList": [
                    {"accountId": "2", "accountName": "two", "emailAddress": "two@corp.example"},
                ],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = authorized_client(&server);
        let accounts = client.accounts().await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].account_id, "1");
        assert_eq!(accounts[1].account_id, "2");
    }

    #[tokio::test]
    async fn test_account_roles_paginate() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/assignment/roles"))
            .and(query_param("account_id", "1"))
            .and(query_param_is_missing("next_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "roleList": [{"accountId": "1", "roleName": "Admin"}],
                "nextToken": "more",
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/assignment/roles"))
            .and(query_param("next_token", "more"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "roleList": [{"accountId": "1", "roleName": "ReadOnly"}],
            })))
            .mount(&server)
            .await;

        let client = authorized_client(&server);
        let roles = client.account_roles("1").await.unwrap();
        assert_eq!(
            roles.iter().map(|r| r.role_name.as_str()).collect::<Vec<_>>(),
            vec!["Admin", "ReadOnly"]
        );
    }

    #[tokio::test]
    async fn test_role_credentials_convert_expiration_to_seconds() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/federation/credentials"))
            .and(query_param("account_id", "111122223333"))
            .and(query_param("role_name", "Admin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "roleCredentials": {
                    "accessKeyId": "AKIA",
                    "secretAccessKey": "shhh",
                    "sessionToken": "tok",
                    "expiration": 1_900_000_000_000_i64,
                },
            })))
            .mount(&server)
            .await;

        let client = authorized_client(&server);
        let creds = client
            .role_credentials("111122223333", "Admin")
            .await
            .unwrap();
        assert_eq!(creds.expiration, 1_900_000_000);
        assert_eq!(creds.account_id, "111122223333");
    }

    #[tokio::test]
    async fn test_listing_error_carries_operation() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/assignment/accounts"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let client = authorized_client(&server);
        match client.accounts().await {
            Err(Error::Provider { operation, .. }) => assert_eq!(operation, "list accounts"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

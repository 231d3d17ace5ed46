//! Per-attempt authorize state and the loopback callback listener.
//!
//! An [`AuthorizeAttempt`] carries the PKCE verifier and anti-CSRF state
//! for exactly one authorization attempt. The listener consumes the
//! attempt, binds the loopback port, services one qualifying request
//! (constant-time state check, code exchange, HTML status page) and shuts
//! down - on success, failure, deadline, or caller cancellation, whichever
//! comes first. The bound port is released on every exit path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, warn};

use super::pkce::Pkce;
use super::{BearerTokens, SsoClient, TokenExchange, exchange_authorization_code};
use crate::error::{Error, Result};

/// State for a single authorization attempt.
///
/// The verifier and state token are cryptographically random, single-use,
/// and live only as long as this value: a second attempt cannot observe
/// or clobber the first.
#[derive(Debug)]
pub struct AuthorizeAttempt {
    url: String,
    state: String,
    pkce: Pkce,
}

impl AuthorizeAttempt {
    pub(crate) fn new(url: String, state: String, pkce: Pkce) -> Self {
        Self { url, state, pkce }
    }

    /// The provider authorize URL to open in a browser.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Shared state between the listener task and the request handler.
struct CallbackContext {
    expected_state: String,
    verifier: String,
    exchange: TokenExchange,
    /// Taken by the first qualifying request; later requests find it gone.
    result_tx: Mutex<Option<oneshot::Sender<Result<BearerTokens>>>>,
    shutdown: Notify,
}

impl SsoClient {
    /// Wait for the browser to deliver the authorization code, then
    /// exchange it for tokens.
    ///
    /// Accepts exactly one qualifying request on the loopback callback
    /// port. Returns [`Error::CallbackTimeout`] when the deadline elapses
    /// first; dropping the returned future cancels the listener and frees
    /// the port as well.
    pub async fn listen_for_callback(
        &mut self,
        attempt: AuthorizeAttempt,
        timeout: Duration,
    ) -> Result<BearerTokens> {
        let registration = self.registration.as_ref().ok_or(Error::NotRegistered)?;

        let (result_tx, mut result_rx) = oneshot::channel();
        let ctx = Arc::new(CallbackContext {
            expected_state: attempt.state,
            verifier: attempt.pkce.verifier,
            exchange: TokenExchange {
                http: self.http.clone(),
                token_url: format!("{}/token", self.endpoints.oidc),
                client_id: registration.client_id.clone(),
                client_secret: registration.client_secret.clone(),
                redirect_uri: self.redirect_uri(),
            },
            result_tx: Mutex::new(Some(result_tx)),
            shutdown: Notify::new(),
        });

        let app = Router::new()
            .route("/", get(handle_callback))
            .fallback(not_found)
            .with_state(ctx.clone());

        let listener = TcpListener::bind(("127.0.0.1", self.callback_port)).await?;
        debug!(port = self.callback_port, "listening for sign-in callback");

        let shutdown = {
            let ctx = ctx.clone();
            async move {
                tokio::select! {
                    _ = ctx.shutdown.notified() => debug!("callback serviced, shutting down"),
                    _ = tokio::time::sleep(timeout) => debug!("callback deadline elapsed"),
                }
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        match result_rx.try_recv() {
            Ok(Ok(tokens)) => {
                self.tokens = Some(tokens.clone());
                Ok(tokens)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::CallbackTimeout),
        }
    }
}

async fn handle_callback(
    State(ctx): State<Arc<CallbackContext>>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, Html<String>) {
    let state = query.state.unwrap_or_default();
    if !state_matches(&ctx.expected_state, &state) {
        warn!("callback rejected: state mismatch");
        return (StatusCode::BAD_REQUEST, failure_page("invalid state"));
    }

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        warn!("callback rejected: missing authorization code");
        return (StatusCode::BAD_REQUEST, failure_page("bad request"));
    };

    // Only one callback is serviced; a request arriving after shutdown
    // has begun finds the sender gone.
    let sender = ctx.result_tx.lock().expect("lock poisoned").take();
    let Some(sender) = sender else {
        return (StatusCode::GONE, failure_page("sign-in already completed"));
    };

    match exchange_authorization_code(&ctx.exchange, &code, &ctx.verifier).await {
        Ok(tokens) => {
            let _ = sender.send(Ok(tokens));
            ctx.shutdown.notify_one();
            (
                StatusCode::OK,
                status_page("Success! You can close your browser now..."),
            )
        }
        Err(err) => {
            warn!(error = %err, "token exchange failed");
            let _ = sender.send(Err(err));
            ctx.shutdown.notify_one();
            (
                StatusCode::BAD_REQUEST,
                failure_page("Bad request, please start again."),
            )
        }
    }
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

/// Constant-time comparison of the anti-CSRF state token.
fn state_matches(expected: &str, received: &str) -> bool {
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}

fn status_page(message: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><title>rolekey</title></head>\
         <body><p>{message}</p></body></html>"
    ))
}

fn failure_page(reason: &str) -> Html<String> {
    status_page(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_matches() {
        assert!(state_matches("abc", "abc"));
        assert!(!state_matches("abc", "abd"));
        assert!(!state_matches("abc", "abcd"));
        assert!(!state_matches("abc", ""));
    }

    #[test]
    fn test_status_page_is_html() {
        let Html(page) = status_page("Success!");
        assert!(page.starts_with("<!doctype html>"));
        assert!(page.contains("Success!"));
    }
}

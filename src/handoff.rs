//! Credential handoff at the process boundary.
//!
//! Once the broker has produced a credential set, a small closed set of
//! output strategies hands it over: a `credential_process`-style JSON
//! document, `KEY=value` lines, shell `export` lines, or replacing the
//! process image with a command that inherits the credentials through its
//! environment.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::sso::RoleCredentials;

/// How the resolved credentials leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// `credential_process` v1 JSON document.
    Json,
    /// `KEY=value` lines.
    Env,
    /// Shell `export KEY=value` lines.
    Export,
    /// Replace the process image with the given command.
    Exec,
}

/// Environment-shaped view of one credential set.
#[derive(Debug, Clone)]
pub struct CredentialEnv {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
    pub region: Option<String>,
    pub profile: Option<String>,
}

/// `credential_process` v1 document.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialDocument<'a> {
    access_key_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration: Option<String>,
    secret_access_key: &'a str,
    session_token: &'a str,
    version: u32,
}

impl CredentialEnv {
    /// Build from broker-issued role credentials.
    pub fn new(credentials: &RoleCredentials) -> Self {
        Self {
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
            session_token: credentials.session_token.clone(),
            expiration: DateTime::from_timestamp(credentials.expiration, 0),
            region: None,
            profile: None,
        }
    }

    /// Set the region handed to the consumer (skip with `None` to leave
    /// an inherited `AWS_REGION` untouched).
    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    /// Set the profile display label.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// The environment variables, in a stable order.
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("AWS_ACCESS_KEY_ID", self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY", self.secret_access_key.clone()),
            ("AWS_SESSION_TOKEN", self.session_token.clone()),
        ];
        if let Some(expiration) = &self.expiration {
            vars.push(("AWS_CREDENTIAL_EXPIRATION", rfc3339(expiration)));
        }
        if let Some(region) = &self.region {
            vars.push(("AWS_REGION", region.clone()));
        }
        if let Some(profile) = &self.profile {
            vars.push(("AWS_SSO_PROFILE", profile.clone()));
        }
        vars
    }

    /// The `credential_process` v1 JSON document.
    pub fn json_document(&self) -> Result<String> {
        let document = CredentialDocument {
            access_key_id: &self.access_key_id,
            expiration: self.expiration.as_ref().map(rfc3339),
            secret_access_key: &self.secret_access_key,
            session_token: &self.session_token,
            version: 1,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// `KEY=value` lines, shell-quoted.
    pub fn env_lines(&self) -> String {
        self.vars()
            .iter()
            .map(|(key, value)| format!("{key}={}\n", shell_quote(value)))
            .collect()
    }

    /// `export KEY=value` lines, shell-quoted.
    pub fn export_lines(&self) -> String {
        self.vars()
            .iter()
            .map(|(key, value)| format!("export {key}={}\n", shell_quote(value)))
            .collect()
    }

    /// Replace the current process image with `command`, credentials
    /// injected into its environment. Only returns on failure.
    #[cfg(unix)]
    pub fn exec(&self, command: &str, args: &[String]) -> crate::error::Error {
        use std::os::unix::process::CommandExt;

        let mut cmd = std::process::Command::new(command);
        cmd.args(args);
        for (key, value) in self.vars() {
            cmd.env(key, value);
        }
        crate::error::Error::Io(cmd.exec())
    }
}

fn rfc3339(when: &DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// POSIX single-quote escaping; plain tokens pass through unquoted.
fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\"'\"'"))
    }
}

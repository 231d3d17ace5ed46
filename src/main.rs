//! rolekey -- AWS SSO credential broker.
//!
//! Command-line entry point: resolves the SSO session from the settings
//! file, drives the broker through authorization and role-credential
//! issuance, narrows the account/role selection non-interactively, and
//! hands the credentials off in the requested output format.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rolekey::broker::Authorizer;
use rolekey::config::AwsConfig;
use rolekey::handoff::{CredentialEnv, OutputFormat};
use rolekey::sso::SsoClient;
#[cfg(feature = "system-keyring")]
use rolekey::store::KeyringStore;
use rolekey::store::{FileStore, SecretStore};

#[derive(Debug, Parser)]
#[command(name = "rolekey", version, about = "AWS SSO credential broker")]
struct Cli {
    /// Name of the sso-session section in the config file; may be omitted
    /// when exactly one is configured
    session: Option<String>,

    /// AWS account id or account name; may be omitted when exactly one
    /// account is available
    account: Option<String>,

    /// SSO role name; may be omitted when exactly one role is available
    role: Option<String>,

    /// Command to execute with the credentials, with its arguments
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,

    /// Output format when no command is given
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,

    /// Accept cached role credentials valid for at least this many
    /// minutes; negative always requests fresh ones
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    freshness_minutes: i64,

    /// Print the sign-in URL instead of launching a browser
    #[arg(long)]
    no_browser: bool,

    /// Show debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli).await
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "rolekey=debug" } else { "rolekey=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AwsConfig::open()?;

    let session = match cli.session {
        Some(session) => session,
        None => {
            let sessions = config.sso_sessions();
            match sessions.as_slice() {
                [] => bail!("no sso-session sections in the config file"),
                [only] => only.to_string(),
                many => bail!(
                    "more than one sso-session available; pass one of: {}",
                    many.join(", ")
                ),
            }
        }
    };

    let sso_config = config.sso_session_config(&session)?;
    let (region, start_url) = match (sso_config.region, sso_config.start_url) {
        (Some(region), Some(start_url)) if !region.is_empty() && !start_url.is_empty() => {
            (region, start_url)
        }
        _ => bail!("SSO config is invalid for sso-session {session}"),
    };

    // authorization codes and tokens must never travel over plain http
    let parsed = url::Url::parse(&start_url)
        .map_err(|e| anyhow!("invalid sso_start_url \"{start_url}\": {e}"))?;
    if parsed.scheme() != "https" {
        bail!("sso_start_url must use https: {start_url}");
    }

    let store = default_store();
    tracing::debug!(store = store.name(), "using secret store");

    let sso = SsoClient::new(region.clone(), start_url);
    let mut auth = Authorizer::new(&session, sso, store).with_browser(!cli.no_browser);
    auth.authorize().await?;

    let accounts = auth.sso().accounts().await.context("failed to get accounts")?;
    if accounts.is_empty() {
        bail!("no accounts available");
    }
    let (account_id, account_name) = match &cli.account {
        Some(wanted) => accounts
            .iter()
            .find(|a| &a.account_id == wanted || &a.account_name == wanted)
            .map(|a| (a.account_id.clone(), a.account_name.clone()))
            .ok_or_else(|| anyhow!("no account found matching {wanted}"))?,
        None if accounts.len() == 1 => {
            (accounts[0].account_id.clone(), accounts[0].account_name.clone())
        }
        None => bail!("more than one account available; specify an account id or name"),
    };

    let roles = auth
        .sso()
        .account_roles(&account_id)
        .await
        .context("failed to get roles")?;
    if roles.is_empty() {
        bail!("no roles available for account {account_id}");
    }
    let role = match &cli.role {
        Some(wanted) => roles
            .iter()
            .find(|r| &r.role_name == wanted)
            .map(|r| r.role_name.clone())
            .ok_or_else(|| anyhow!("no role found matching {wanted}"))?,
        None if roles.len() == 1 => roles[0].role_name.clone(),
        None => bail!("more than one role available; specify a role name"),
    };

    let credentials = auth
        .get_role_credentials(&account_id, &role, cli.freshness_minutes)
        .await?;

    // leave an inherited AWS_REGION untouched
    let region_for_env = if std::env::var_os("AWS_REGION").is_some() {
        None
    } else {
        match config.default_setting("region")? {
            Some(configured) => Some(configured.to_string()),
            None => Some(region),
        }
    };

    let env = CredentialEnv::new(&credentials)
        .with_region(region_for_env)
        .with_profile(format!("{account_id}/{account_name}/{role}"));

    if let Some((command, args)) = cli.command.split_first() {
        #[cfg(unix)]
        return Err(env.exec(command, args).into());
        #[cfg(not(unix))]
        {
            let _ = (command, args);
            bail!("executing a command is only supported on Unix");
        }
    }

    match cli.output {
        OutputFormat::Json => println!("{}", env.json_document()?),
        OutputFormat::Env => print!("{}", env.env_lines()),
        OutputFormat::Export => print!("{}", env.export_lines()),
        OutputFormat::Exec => bail!("exec output requires a command"),
    }
    Ok(())
}

/// Prefer the system keyring; fall back to 0600 files when it is not
/// usable on this machine.
fn default_store() -> Arc<dyn SecretStore> {
    #[cfg(feature = "system-keyring")]
    {
        if KeyringStore::is_available() {
            return Arc::new(KeyringStore::new());
        }
        tracing::warn!("system keyring unavailable, falling back to file storage");
    }

    let dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rolekey")
        .join("secrets");
    Arc::new(FileStore::new(dir))
}

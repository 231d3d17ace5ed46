//! AWS shared-config parsing and cascading setting resolution.
//!
//! Parses the `~/.aws/config` settings file into an ordered list of
//! sections and resolves a setting for a section through the inheritance
//! chain: direct setting, then the linked `sso-session` section for
//! `sso_`-prefixed keys, then `source_profile` chains, then the anonymous
//! default section. The file is read once and held immutable afterwards.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Key prefix that consults the linked `sso-session` section.
const SSO_KEY_PREFIX: &str = "sso_";

/// Setting that links a profile to an `sso-session` section.
const SSO_SESSION_KEY: &str = "sso_session";

/// Setting that chains a profile to another profile.
const SOURCE_PROFILE_KEY: &str = "source_profile";

/// Parsed settings file.
#[derive(Debug, Default)]
pub struct AwsConfig {
    path: Option<PathBuf>,
    sections: Vec<ConfigSection>,
}

/// One `[type "name"]` section with its ordered settings.
#[derive(Debug)]
struct ConfigSection {
    kind: String,
    name: String,
    settings: Vec<(String, String)>,
}

impl ConfigSection {
    /// Last occurrence wins, mirroring overwrite-on-declare settings files.
    fn get(&self, key: &str) -> Option<&str> {
        self.settings
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Resolved SSO session parameters for one identity-provider tenant.
#[derive(Debug, Clone)]
pub struct SsoSessionConfig {
    pub name: String,
    pub region: Option<String>,
    pub start_url: Option<String>,
}

impl SsoSessionConfig {
    /// Both a region and a start URL are required before any network call.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.region.as_deref().is_some_and(|r| !r.is_empty())
            && self.start_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

impl AwsConfig {
    /// Open the settings file at the default location (`$HOME/.aws/config`).
    pub fn open() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        Self::open_path(home.join(".aws").join("config"))
    }

    /// Open a settings file at a specific path. A missing file yields an
    /// empty configuration, not an error.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using empty config");
                String::new()
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut cfg = Self::parse(&content);
        cfg.path = Some(path);
        Ok(cfg)
    }

    /// Parse settings file content.
    pub fn parse(content: &str) -> Self {
        let mut cfg = Self::default();
        let mut current: Option<usize> = None;

        for raw in content.lines() {
            let line = strip_comment(raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some((kind, name)) = parse_section_header(line) {
                current = Some(cfg.open_section(kind, name));
            } else if let Some((key, value)) = line.split_once('=') {
                if let Some(idx) = current {
                    cfg.sections[idx]
                        .settings
                        .push((key.trim().to_string(), value.trim().to_string()));
                }
            }
        }
        cfg
    }

    /// Path the config was loaded from, if it came from disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Names of all `[profile ...]` sections.
    pub fn profiles(&self) -> Vec<&str> {
        self.section_names("profile")
    }

    /// Names of all `[sso-session ...]` sections.
    pub fn sso_sessions(&self) -> Vec<&str> {
        self.section_names("sso-session")
    }

    /// Resolve a setting for a profile section.
    pub fn profile_setting(&self, profile: &str, key: &str) -> Result<Option<&str>> {
        self.resolve("profile", profile, key)
    }

    /// Resolve a setting in the anonymous default section.
    pub fn default_setting(&self, key: &str) -> Result<Option<&str>> {
        self.resolve("default", "", key)
    }

    /// SSO session parameters for a named `sso-session` section.
    pub fn sso_session_config(&self, name: &str) -> Result<SsoSessionConfig> {
        Ok(SsoSessionConfig {
            name: name.to_string(),
            region: self
                .resolve("sso-session", name, "sso_region")?
                .map(str::to_string),
            start_url: self
                .resolve("sso-session", name, "sso_start_url")?
                .map(str::to_string),
        })
    }

    /// SSO session parameters resolved through a profile. When the profile
    /// carries no `sso_session` link the start URL doubles as the session
    /// name, so cached artifacts still get a stable identity.
    pub fn sso_config_for_profile(&self, profile: &str) -> Result<SsoSessionConfig> {
        let region = self
            .profile_setting(profile, "sso_region")?
            .map(str::to_string);
        let start_url = self
            .profile_setting(profile, "sso_start_url")?
            .map(str::to_string);
        let name = match self.profile_setting(profile, SSO_SESSION_KEY)? {
            Some(session) => session.to_string(),
            None => start_url.clone().unwrap_or_default(),
        };

        Ok(SsoSessionConfig {
            name,
            region,
            start_url,
        })
    }

    /// Resolve `key` for the section `(kind, name)` through the
    /// inheritance chain.
    ///
    /// Precedence: direct setting, then the linked `sso-session` section
    /// for `sso_`-prefixed keys (non-recursive), then `source_profile`
    /// chains (recursive, cycle-checked), then the anonymous default
    /// section (non-recursive).
    pub fn resolve(&self, kind: &str, name: &str, key: &str) -> Result<Option<&str>> {
        let mut visited = HashSet::new();
        self.resolve_inner(kind, name, key, true, &mut visited)
    }

    fn resolve_inner<'a>(
        &'a self,
        kind: &str,
        name: &str,
        key: &str,
        recursive: bool,
        visited: &mut HashSet<String>,
    ) -> Result<Option<&'a str>> {
        if kind == "profile" && !visited.insert(name.to_string()) {
            return Err(Error::Config(format!(
                "source_profile cycle detected at profile \"{name}\""
            )));
        }

        let Some(section) = self.section(kind, name) else {
            return Ok(None);
        };

        if let Some(value) = section.get(key) {
            return Ok(Some(value));
        }
        if !recursive {
            return Ok(None);
        }

        if key.starts_with(SSO_KEY_PREFIX) {
            if let Some(session) = section.get(SSO_SESSION_KEY) {
                let session = session.to_string();
                if let Some(value) =
                    self.resolve_inner("sso-session", &session, key, false, visited)?
                {
                    return Ok(Some(value));
                }
            }
        }

        if let Some(source) = section.get(SOURCE_PROFILE_KEY) {
            let source = source.to_string();
            return self.resolve_inner("profile", &source, key, true, visited);
        }

        if kind != "default" {
            return self.resolve_inner("default", "", key, false, visited);
        }
        Ok(None)
    }

    fn section(&self, kind: &str, name: &str) -> Option<&ConfigSection> {
        self.sections
            .iter()
            .find(|s| s.kind == kind && s.name == name)
    }

    fn section_names(&self, kind: &str) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.name.as_str())
            .collect()
    }

    fn open_section(&mut self, kind: String, name: String) -> usize {
        if let Some(idx) = self
            .sections
            .iter()
            .position(|s| s.kind == kind && s.name == name)
        {
            return idx;
        }
        self.sections.push(ConfigSection {
            kind,
            name,
            settings: Vec::new(),
        });
        self.sections.len() - 1
    }
}

/// Parse a `[type]` / `[type name]` / `[type "name"]` section header. The
/// name token may be double-quoted; an absent name opens the anonymous
/// section of that type.
fn parse_section_header(line: &str) -> Option<(String, String)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?.trim();
    match inner.split_once(char::is_whitespace) {
        None => Some((inner.to_string(), String::new())),
        Some((kind, rest)) => {
            let name = rest.trim().trim_matches('"');
            Some((kind.to_string(), name.to_string()))
        }
    }
}

/// Remove everything after the first unescaped `#`; `\#` stays as a
/// literal hash.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut escaped = false;

    for c in line.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            '#' if escaped => {
                out.push('#');
                escaped = false;
            }
            '#' => return out,
            _ => {
                if escaped {
                    out.push('\\');
                    escaped = false;
                }
                out.push(c);
            }
        }
    }
    if escaped {
        out.push('\\');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# global defaults
[default]
region = eu-west-1
output = json

[profile dev]
sso_session = corp
region = us-east-2

[profile chained]
source_profile = base
sso_session = corp

[profile base]
role_arn = arn:aws:iam::111122223333:role/Base
region = ap-southeast-1

[sso-session corp]
sso_start_url = https://corp.awsapps.com/start # portal
sso_region = us-west-2
"#;

    #[test]
    fn test_direct_setting_wins_over_session() {
        let cfg = AwsConfig::parse(SAMPLE);
        // dev has a direct region; the linked session's sso_region differs
        assert_eq!(
            cfg.profile_setting("dev", "region").unwrap(),
            Some("us-east-2")
        );
        assert_eq!(
            cfg.profile_setting("dev", "sso_region").unwrap(),
            Some("us-west-2")
        );
    }

    #[test]
    fn test_sso_prefix_consults_linked_session() {
        let cfg = AwsConfig::parse(SAMPLE);
        assert_eq!(
            cfg.profile_setting("dev", "sso_start_url").unwrap(),
            Some("https://corp.awsapps.com/start")
        );
    }

    #[test]
    fn test_source_profile_inheritance() {
        let cfg = AwsConfig::parse(SAMPLE);
        assert_eq!(
            cfg.profile_setting("chained", "role_arn").unwrap(),
            Some("arn:aws:iam::111122223333:role/Base")
        );
        // chained region comes from base, not from [default]
        assert_eq!(
            cfg.profile_setting("chained", "region").unwrap(),
            Some("ap-southeast-1")
        );
    }

    #[test]
    fn test_default_section_fallback() {
        let cfg = AwsConfig::parse(SAMPLE);
        assert_eq!(
            cfg.profile_setting("dev", "output").unwrap(),
            Some("json")
        );
        // the default section itself does not cascade further
        assert_eq!(cfg.default_setting("role_arn").unwrap(), None);
    }

    #[test]
    fn test_missing_profile_is_absent_without_fallback() {
        let cfg = AwsConfig::parse(SAMPLE);
        assert_eq!(cfg.profile_setting("ghost", "region").unwrap(), None);
    }

    #[test]
    fn test_source_profile_cycle_is_an_error() {
        let cfg = AwsConfig::parse(
            "[profile a]\nsource_profile = b\n[profile b]\nsource_profile = a\n",
        );
        let err = cfg.profile_setting("a", "role_arn").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_self_referencing_profile_is_an_error() {
        let cfg = AwsConfig::parse("[profile a]\nsource_profile = a\n");
        assert!(cfg.profile_setting("a", "role_arn").is_err());
    }

    #[test]
    fn test_last_occurrence_wins() {
        let cfg = AwsConfig::parse("[profile p]\nregion = one\nregion = two\n");
        assert_eq!(cfg.profile_setting("p", "region").unwrap(), Some("two"));
    }

    #[test]
    fn test_reopened_section_appends() {
        let cfg = AwsConfig::parse(
            "[profile p]\nregion = one\n[default]\noutput = json\n[profile p]\nregion = three\n",
        );
        assert_eq!(cfg.profile_setting("p", "region").unwrap(), Some("three"));
    }

    #[test]
    fn test_quoted_section_names() {
        let cfg = AwsConfig::parse("[profile \"spaced name\"]\nregion = us-east-1\n");
        assert_eq!(
            cfg.profile_setting("spaced name", "region").unwrap(),
            Some("us-east-1")
        );
    }

    #[test]
    fn test_comments_and_escaped_hash() {
        let cfg = AwsConfig::parse(
            "[profile p]\nregion = us-east-1 # inline comment\ntag = a\\#b\n# whole line\n",
        );
        assert_eq!(cfg.profile_setting("p", "region").unwrap(), Some("us-east-1"));
        assert_eq!(cfg.profile_setting("p", "tag").unwrap(), Some("a#b"));
    }

    #[test]
    fn test_section_listings() {
        let cfg = AwsConfig::parse(SAMPLE);
        assert_eq!(cfg.profiles(), vec!["dev", "chained", "base"]);
        assert_eq!(cfg.sso_sessions(), vec!["corp"]);
    }

    #[test]
    fn test_sso_session_config() {
        let cfg = AwsConfig::parse(SAMPLE);
        let sso = cfg.sso_session_config("corp").unwrap();
        assert!(sso.is_complete());
        assert_eq!(sso.region.as_deref(), Some("us-west-2"));
        assert_eq!(
            sso.start_url.as_deref(),
            Some("https://corp.awsapps.com/start")
        );

        let missing = cfg.sso_session_config("nope").unwrap();
        assert!(!missing.is_complete());
    }

    #[test]
    fn test_sso_config_for_profile_falls_back_to_start_url_name() {
        let cfg = AwsConfig::parse(
            "[profile legacy]\nsso_start_url = https://old.awsapps.com/start\nsso_region = us-east-1\n",
        );
        let sso = cfg.sso_config_for_profile("legacy").unwrap();
        assert_eq!(sso.name, "https://old.awsapps.com/start");
        assert!(sso.is_complete());
    }

    #[test]
    fn test_open_path_missing_file_is_empty() {
        let cfg = AwsConfig::open_path("/nonexistent/aws/config").unwrap();
        assert!(cfg.profiles().is_empty());
    }
}

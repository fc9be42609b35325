// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for working with service configuration

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

/// How strictly the service treats failures of its collaborators
///
/// A queue send failure on submit is fatal in `Test` and `Production` but
/// logged and swallowed in `Development`, where the queue is usually not
/// running.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Development,
    Test,
    Production,
}

/// Service-level configuration, loaded once at startup
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    pub mode: ExecutionMode,
    /// Domain used to resolve the tenant host when a request names none.
    pub default_domain: String,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Path) -> Result<Config, LoadError> {
        let file_contents = fs::read_to_string(path)
            .map_err(|e| (path, e))
            .map_err(LoadError::from)?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|e| (path, e))
            .map_err(LoadError::from)?;
        Ok(config_parsed)
    }
}

#[derive(Debug)]
pub struct LoadError {
    path: PathBuf,
    kind: LoadErrorKind,
}

#[derive(Debug)]
pub enum LoadErrorKind {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl From<(&Path, std::io::Error)> for LoadError {
    fn from((path, err): (&Path, std::io::Error)) -> Self {
        LoadError { path: path.to_path_buf(), kind: LoadErrorKind::Io(err) }
    }
}

impl From<(&Path, toml::de::Error)> for LoadError {
    fn from((path, err): (&Path, toml::de::Error)) -> Self {
        LoadError { path: path.to_path_buf(), kind: LoadErrorKind::Parse(err) }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            LoadErrorKind::Io(e) => {
                write!(f, "read \"{}\": {}", self.path.display(), e)
            }
            LoadErrorKind::Parse(e) => {
                write!(f, "parse \"{}\": {}", self.path.display(), e)
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// Who gets notified when an analysis reaches a terminal status
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyTarget {
    /// suppress the notification entirely
    None,
    /// the analysis owner, if they opted in
    Owner,
    /// the owner plus opted-in host managers on CC
    Admin,
    /// the host's contact address, with result links stripped
    HostContact,
}

/// Per-tenant settings, resolved once per request from the Host record and
/// threaded explicitly through the operation
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HostConfig {
    pub queue_name: String,
    pub region: String,
    pub on_fail: NotifyTarget,
    pub on_complete: NotifyTarget,
    pub storage_bucket: String,
    /// Workflows that may not be started from the CLI source.
    #[serde(default)]
    pub cli_denied_workflows: BTreeSet<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            queue_name: "analysis-jobs".to_string(),
            region: "us-west-2".to_string(),
            on_fail: NotifyTarget::Owner,
            on_complete: NotifyTarget::Owner,
            storage_bucket: String::new(),
            cli_denied_workflows: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Config;
    use super::ExecutionMode;
    use super::LoadError;

    #[test]
    fn test_config_nonexistent() {
        let error = Config::from_file(std::path::Path::new(
            "/nonexistent/test_config_nonexistent",
        ))
        .expect_err("expected config to fail from nonexistent path");
        assert!(matches!(error, LoadError { kind: super::LoadErrorKind::Io(_), .. }));
    }

    #[test]
    fn test_config_parse() {
        let parsed: Config = toml::from_str(
            "mode = \"development\"\ndefault_domain = \"app.example.org\"",
        )
        .unwrap();
        assert_eq!(parsed.mode, ExecutionMode::Development);
        assert_eq!(parsed.default_domain, "app.example.org");
    }

    #[test]
    fn test_config_bad_mode() {
        let result: Result<Config, _> = toml::from_str(
            "mode = \"staging\"\ndefault_domain = \"app.example.org\"",
        );
        assert!(result.is_err());
    }
}

//! Configuration for stallguard.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (applied by the CLI on top of the resolved config)
//! 2. Environment variables (STALLGUARD_UPLOAD_USER, STALLGUARD_UPLOAD_PASSWORD,
//!    STALLGUARD_STORE_USER, STALLGUARD_STORE_PASSWORD)
//! 3. Config file (.stallguard/config.yaml, or an explicit path)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .stallguard/config.yaml
//! - Relative paths in a discovered file are resolved against the directory
//!   containing `.stallguard/`; in an explicit file, against the file's directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{Credentials, DEFAULT_LOG_DIR, DEFAULT_LOG_FILE_NAME, DEFAULT_TRACKED_DIRS};
use crate::task::RunLayout;

/// Directory searched for in the current directory and its parents
pub const CONFIG_DIR: &str = ".stallguard";
/// File name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_STORE_ADDR: &str = "127.0.0.1:8080";

pub const ENV_UPLOAD_USER: &str = "STALLGUARD_UPLOAD_USER";
pub const ENV_UPLOAD_PASSWORD: &str = "STALLGUARD_UPLOAD_PASSWORD";
pub const ENV_STORE_USER: &str = "STALLGUARD_STORE_USER";
pub const ENV_STORE_PASSWORD: &str = "STALLGUARD_STORE_PASSWORD";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerConfig {
    pub executable: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub log_file_name: Option<String>,
    pub output_root: Option<String>,
    pub tracked_dirs: Option<Vec<String>>,
    pub log_dir: Option<String>,
    pub retain_failed_uploads: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadConfig {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    pub addr: Option<String>,
    pub dir: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Resolved configuration with absolute paths and defaults filled in
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Path to config file (if one was used)
    pub config_file: Option<PathBuf>,
    pub runner: RunnerSettings,
    pub upload: UploadSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunnerSettings {
    pub executable: Option<PathBuf>,
    pub timeout_seconds: u64,
    pub log_file_name: String,
    /// `None` means `<exe dir>/<exe stem>/Saved`
    pub output_root: Option<PathBuf>,
    pub tracked_dirs: Vec<String>,
    pub log_dir: String,
    pub retain_failed_uploads: Option<PathBuf>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            executable: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            log_file_name: DEFAULT_LOG_FILE_NAME.to_string(),
            output_root: None,
            tracked_dirs: DEFAULT_TRACKED_DIRS.iter().map(|d| d.to_string()).collect(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            retain_failed_uploads: None,
        }
    }
}

impl RunnerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn layout(&self) -> RunLayout {
        RunLayout {
            output_root: self.output_root.clone(),
            log_file_name: Some(self.log_file_name.clone()),
            tracked_dirs: Some((self.tracked_dirs.clone(), self.log_dir.clone())),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadSettings {
    pub base_url: Option<String>,
    pub username: String,
    #[serde(serialize_with = "redact")]
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreSettings {
    pub addr: String,
    pub dir: Option<PathBuf>,
    pub username: String,
    #[serde(serialize_with = "redact")]
    pub password: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_STORE_ADDR.to_string(),
            dir: None,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl StoreSettings {
    /// Credentials to require, if both parts are set
    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::from_parts(&self.username, &self.password)
    }
}

fn redact<S: serde::Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_empty() {
        serializer.serialize_str("")
    } else {
        serializer.serialize_str("********")
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Directory that relative paths in `config_path` are resolved against
fn base_dir(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    match parent.file_name() {
        Some(name) if name == CONFIG_DIR => parent.parent().unwrap_or(Path::new(".")).to_path_buf(),
        _ => parent.to_path_buf(),
    }
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

impl ResolvedConfig {
    /// Defaults only
    pub fn defaults() -> Self {
        Self {
            config_file: None,
            runner: RunnerSettings::default(),
            upload: UploadSettings::default(),
            store: StoreSettings::default(),
        }
    }

    /// Layer a parsed config file over the current values
    fn apply_file(&mut self, file: ConfigFile, base: &Path) {
        let runner = file.runner;
        if let Some(exe) = runner.executable {
            self.runner.executable = Some(resolve_path(base, &exe));
        }
        if let Some(secs) = runner.timeout_seconds {
            self.runner.timeout_seconds = secs;
        }
        if let Some(name) = runner.log_file_name {
            self.runner.log_file_name = name;
        }
        if let Some(root) = runner.output_root {
            self.runner.output_root = Some(resolve_path(base, &root));
        }
        if let Some(dirs) = runner.tracked_dirs {
            self.runner.tracked_dirs = dirs;
        }
        if let Some(log_dir) = runner.log_dir {
            self.runner.log_dir = log_dir;
        }
        if let Some(dir) = runner.retain_failed_uploads {
            self.runner.retain_failed_uploads = Some(resolve_path(base, &dir));
        }

        let upload = file.upload;
        if upload.base_url.is_some() {
            self.upload.base_url = upload.base_url;
        }
        if let Some(username) = upload.username {
            self.upload.username = username;
        }
        if let Some(password) = upload.password {
            self.upload.password = password;
        }

        let store = file.store;
        if let Some(addr) = store.addr {
            self.store.addr = addr;
        }
        if let Some(dir) = store.dir {
            self.store.dir = Some(resolve_path(base, &dir));
        }
        if let Some(username) = store.username {
            self.store.username = username;
        }
        if let Some(password) = store.password {
            self.store.password = password;
        }
    }

    /// Layer credential environment variables over the current values
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_UPLOAD_USER) {
            self.upload.username = v;
        }
        if let Some(v) = lookup(ENV_UPLOAD_PASSWORD) {
            self.upload.password = v;
        }
        if let Some(v) = lookup(ENV_STORE_USER) {
            self.store.username = v;
        }
        if let Some(v) = lookup(ENV_STORE_PASSWORD) {
            self.store.password = v;
        }
    }
}

/// Load configuration from the config file, environment and defaults.
///
/// `explicit` names a config file that must exist; without it the current
/// directory and its parents are searched and a missing file is not an error.
pub fn load(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().context("Failed to determine current directory")?;
            find_config_file(&cwd)
        }
    };

    let mut config = ResolvedConfig::defaults();
    if let Some(path) = &config_file {
        let file = load_config_file(path)?;
        config.apply_file(file, &base_dir(path));
        tracing::debug!(path = %path.display(), "loaded config file");
    }
    config.apply_env(|key| std::env::var(key).ok());
    config.config_file = config_file;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let config_dir = dir.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join(CONFIG_FILE);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = ResolvedConfig::defaults();
        assert_eq!(config.runner.timeout_seconds, 60);
        assert_eq!(config.runner.log_file_name, "log.txt");
        assert_eq!(config.runner.tracked_dirs, vec!["Logs", "Profiling", "Screenshots"]);
        assert_eq!(config.store.addr, "127.0.0.1:8080");
        assert!(config.store.credentials().is_none());
    }

    #[test]
    fn test_config_file_parsing_and_relative_paths() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"
version: "1"
runner:
  executable: bin/game
  timeout_seconds: 5
  tracked_dirs: [Logs]
  retain_failed_uploads: /var/keep
upload:
  base_url: http://store:8080
store:
  dir: artifacts
  username: admin
  password: pw
"#,
        );

        let mut config = ResolvedConfig::defaults();
        config.apply_file(load_config_file(&path).unwrap(), &base_dir(&path));

        assert_eq!(config.runner.executable, Some(temp.path().join("bin/game")));
        assert_eq!(config.runner.timeout(), Duration::from_secs(5));
        assert_eq!(config.runner.tracked_dirs, vec!["Logs"]);
        assert_eq!(config.runner.log_dir, "Logs");
        assert_eq!(config.runner.retain_failed_uploads, Some(PathBuf::from("/var/keep")));
        assert_eq!(config.upload.base_url.as_deref(), Some("http://store:8080"));
        assert_eq!(config.store.dir, Some(temp.path().join("artifacts")));
        assert_eq!(
            config.store.credentials(),
            Some(Credentials {
                username: "admin".to_string(),
                password: "pw".to_string()
            })
        );
    }

    #[test]
    fn test_explicit_file_resolves_against_its_directory() {
        let path = PathBuf::from("/etc/stallguard/runner.yaml");
        assert_eq!(base_dir(&path), PathBuf::from("/etc/stallguard"));
        let discovered = PathBuf::from("/srv/project/.stallguard/config.yaml");
        assert_eq!(base_dir(&discovered), PathBuf::from("/srv/project"));
    }

    #[test]
    fn test_find_config_file_searches_parents() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "version: \"1\"\n");
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(path));
    }

    #[test]
    fn test_env_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            "upload:\n  username: file-user\n  password: file-pw\n",
        );

        let mut config = ResolvedConfig::defaults();
        config.apply_file(load_config_file(&path).unwrap(), &base_dir(&path));
        let env: HashMap<&str, &str> = [(ENV_UPLOAD_USER, "env-user"), (ENV_STORE_PASSWORD, "s")]
            .into_iter()
            .collect();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.upload.username, "env-user");
        assert_eq!(config.upload.password, "file-pw");
        assert_eq!(config.store.password, "s");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(load(Some(&temp.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn test_passwords_are_redacted_when_shown() {
        let mut config = ResolvedConfig::defaults();
        config.upload.password = "secret".to_string();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("secret"));
        assert!(yaml.contains("********"));
    }
}

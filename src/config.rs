//! Runtime configuration read from the process environment, optionally
//! pre-populated from a `.env` file.

use crate::client::{CloudServer, DEFAULT_ACCOUNT, DEFAULT_PASSWORD, RETRIES};
use crate::device::{DEFAULT_PORT, DEFAULT_TIMEOUT};
use crate::security::DeviceCredentials;
use crate::utils::parse_device_id;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("{0}")]
    EnvFile(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub account: String,
    pub password: String,
    pub cloud_server: CloudServer,
    pub cloud_retries: u32,
    pub device_ip: String,
    pub device_port: u16,
    pub device_id: u64,
    /// Preprovisioned LAN credentials; fetched from the cloud when absent.
    pub credentials: Option<DeviceCredentials>,
    /// Reply timeout per exchange with the device.
    pub device_timeout: Duration,
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let account = get("MSMART_ACCOUNT").unwrap_or_else(|| DEFAULT_ACCOUNT.to_string());
        let password = get("MSMART_PASSWORD").unwrap_or_else(|| DEFAULT_PASSWORD.to_string());

        let cloud_server = match get("MSMART_CLOUD_URL") {
            Some(url) => CloudServer::Custom(url),
            None if get("USE_CHINA_SERVER").as_deref() == Some("1") => CloudServer::China,
            None => CloudServer::Global,
        };

        let cloud_retries = match get("CLOUD_RETRIES") {
            Some(s) => match s.parse::<u32>() {
                Ok(0) => return Err(invalid("CLOUD_RETRIES", "must be at least 1")),
                Ok(n) => n,
                Err(e) => return Err(invalid("CLOUD_RETRIES", e.to_string())),
            },
            None => RETRIES,
        };

        let device_ip = get("DEVICE_IP").ok_or(ConfigError::Missing("DEVICE_IP"))?;

        let device_port = match get("DEVICE_PORT") {
            Some(s) => s.parse::<u16>().map_err(|e| invalid("DEVICE_PORT", e.to_string()))?,
            None => DEFAULT_PORT,
        };

        let device_id = get("DEVICE_ID")
            .ok_or(ConfigError::Missing("DEVICE_ID"))
            .and_then(|s| parse_device_id(&s).ok_or_else(|| invalid("DEVICE_ID", format!("not a device id: {}", s))))?;

        let credentials = match (get("DEVICE_TOKEN"), get("DEVICE_KEY")) {
            (Some(token), Some(key)) => {
                Some(DeviceCredentials::from_hex(&token, &key).map_err(|e| invalid("DEVICE_TOKEN/DEVICE_KEY", e.to_string()))?)
            }
            (None, None) => None,
            _ => return Err(invalid("DEVICE_TOKEN/DEVICE_KEY", "set both or neither")),
        };

        let device_timeout = match get("DEVICE_TIMEOUT_SECS") {
            Some(s) => Duration::from_secs(s.parse::<u64>().map_err(|e| invalid("DEVICE_TIMEOUT_SECS", e.to_string()))?),
            None => DEFAULT_TIMEOUT,
        };

        Ok(Config {
            account,
            password,
            cloud_server,
            cloud_retries,
            device_ip,
            device_port,
            device_id,
            credentials,
            device_timeout,
        })
    }
}

// =====================
// .env files
// =====================

#[derive(Debug)]
pub struct LoadedEnvFile {
    pub path: PathBuf,
    pub explicit: bool,
}

/// Handle `--env-file <path>` (or `--env-file=<path>`), falling back to
/// `./.env` when present. Variables already set in the environment win.
pub fn configure_env_from_args(args: impl Iterator<Item = std::ffi::OsString>) -> Result<Option<LoadedEnvFile>, ConfigError> {
    let mut args = args;
    let mut env_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        let path = match arg.to_str() {
            Some("--env-file") => args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| ConfigError::EnvFile("`--env-file` requires a path argument".into()))?,
            Some(s) if s.starts_with("--env-file=") => match &s["--env-file=".len()..] {
                "" => return Err(ConfigError::EnvFile("`--env-file` requires a path argument".into())),
                p => PathBuf::from(p),
            },
            Some("--") => break,
            Some(other) => return Err(ConfigError::EnvFile(format!("unrecognised argument: {}", other))),
            None => return Err(ConfigError::EnvFile("argument contains invalid UTF-8".into())),
        };
        if env_file.replace(path).is_some() {
            return Err(ConfigError::EnvFile("`--env-file` provided more than once".into()));
        }
    }

    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(ConfigError::EnvFile(format!("env file not found: {}", path.display())));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }

    let default_path = Path::new(".env");
    if default_path.is_file() {
        load_env_file(default_path)?;
        Ok(Some(LoadedEnvFile {
            path: default_path.to_path_buf(),
            explicit: false,
        }))
    } else {
        Ok(None)
    }
}

fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::EnvFile(format!("failed to read {}: {}", path.display(), e)))?;

    for (key, value) in parse_env_file(&contents).map_err(|e| ConfigError::EnvFile(format!("{}:{}", path.display(), e)))? {
        if std::env::var_os(&key).is_none() {
            // Only called from the binary before the runtime starts any threads.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// Parse `KEY=value` lines; errors are reported as `line: reason`.
pub fn parse_env_file(contents: &str) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if let Some(pair) = parse_env_assignment(line).map_err(|e| format!("{}: {}", index + 1, e))? {
            out.push(pair);
        }
    }
    Ok(out)
}

fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw) = assignment.split_once('=').ok_or("missing '=' in assignment")?;
    let key = key.trim();
    if key.is_empty() {
        return Err("variable name cannot be empty".into());
    }
    if key.contains(char::is_whitespace) {
        return Err(format!("variable name contains whitespace: {}", key));
    }

    Ok(Some((key.to_string(), parse_env_value(raw)?)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    let (quote, rest) = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => (q, &raw[1..]),
        _ => return Ok(raw.split('#').next().unwrap_or_default().trim_end().to_string()),
    };

    let mut value = String::new();
    let mut chars = rest.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quote == '"' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('r') => value.push('\r'),
                Some('t') => value.push('\t'),
                Some(other) => value.push(other),
                None => return Err("unterminated escape sequence".into()),
            },
            c if c == quote => {
                let remainder = chars.as_str().trim();
                return if remainder.is_empty() || remainder.starts_with('#') {
                    Ok(value)
                } else {
                    Err("unexpected characters after closing quote".into())
                };
            }
            c => value.push(c),
        }
    }
    Err("unterminated quoted value".into())
}

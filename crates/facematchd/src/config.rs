use facematch_core::verifier::DEFAULT_DISTANCE_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Optional TOML layer; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind_addr: Option<String>,
    gallery_root: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    model_path: Option<PathBuf>,
    distance_threshold: Option<f32>,
    canonical_size: Option<u32>,
    max_upload_bytes: Option<usize>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    smtp_user: Option<String>,
    smtp_pass: Option<String>,
    sender: Option<String>,
}

/// SMTP login; present only when both user and password are configured.
#[derive(Debug, Clone)]
pub struct SmtpCredentials {
    pub user: String,
    pub pass: String,
}

/// Daemon configuration: TOML file, then `FACEMATCH_*` environment, then defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:5001).
    pub bind_addr: String,
    /// Folder holding one subfolder per event gallery.
    pub gallery_root: PathBuf,
    /// Where probe images live for the duration of a request.
    pub temp_dir: PathBuf,
    /// Facenet512 ONNX model.
    pub model_path: PathBuf,
    /// Cosine distance at or below which two faces match.
    pub distance_threshold: f32,
    /// Side of the square canonical resolution.
    pub canonical_size: u32,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp: Option<SmtpCredentials>,
    /// From address; defaults to the SMTP user.
    pub sender: Option<String>,
}

impl Config {
    /// Load from `FACEMATCH_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("FACEMATCH_CONFIG") {
            Some(path) => read_file(Path::new(&path))?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key: &str| std::env::var(key).ok()))
    }

    /// Parse a TOML document and layer `env` over it.
    pub fn from_toml(
        source: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, toml::de::Error> {
        let file: FileConfig = toml::from_str(source)?;
        Ok(Self::resolve(file, env))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let model_path = env("FACEMATCH_MODEL_PATH")
            .map(PathBuf::from)
            .or(file.model_path)
            .unwrap_or_else(|| default_model_dir(&env).join("facenet512.onnx"));

        let smtp_user = env("FACEMATCH_SMTP_USER").or(file.smtp_user);
        let smtp_pass = env("FACEMATCH_SMTP_PASS").or(file.smtp_pass);
        let smtp = match (smtp_user, smtp_pass) {
            (Some(user), Some(pass)) => Some(SmtpCredentials { user, pass }),
            _ => None,
        };

        Self {
            bind_addr: env("FACEMATCH_BIND_ADDR")
                .or(file.bind_addr)
                .unwrap_or_else(|| "127.0.0.1:5001".to_string()),
            gallery_root: env("FACEMATCH_GALLERY_ROOT")
                .map(PathBuf::from)
                .or(file.gallery_root)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            temp_dir: env("FACEMATCH_TEMP_DIR")
                .map(PathBuf::from)
                .or(file.temp_dir)
                .unwrap_or_else(|| PathBuf::from("temp")),
            model_path,
            distance_threshold: parsed(&env, "FACEMATCH_DISTANCE_THRESHOLD")
                .or(file.distance_threshold)
                .unwrap_or(DEFAULT_DISTANCE_THRESHOLD),
            canonical_size: parsed(&env, "FACEMATCH_CANONICAL_SIZE")
                .or(file.canonical_size)
                .unwrap_or(224),
            max_upload_bytes: parsed(&env, "FACEMATCH_MAX_UPLOAD_BYTES")
                .or(file.max_upload_bytes)
                .unwrap_or(16 * 1024 * 1024),
            smtp_host: env("FACEMATCH_SMTP_HOST")
                .or(file.smtp_host)
                .unwrap_or_else(|| "smtp.gmail.com".to_string()),
            smtp_port: parsed(&env, "FACEMATCH_SMTP_PORT")
                .or(file.smtp_port)
                .unwrap_or(587),
            sender: env("FACEMATCH_SENDER")
                .or(file.sender)
                .or_else(|| smtp.as_ref().map(|c| c.user.clone())),
            smtp,
        }
    }

    /// Model path as the string form the ONNX loader expects.
    pub fn model_path_str(&self) -> String {
        self.model_path.to_string_lossy().into_owned()
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&source).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn default_model_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch/models")
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::constants::{DEFAULT_TIMEOUT_MS, OUTPUT_LIMIT_BYTES};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {msg}")]
    Invalid { key: &'static str, msg: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// Directory holding one sub-directory per problem.
    pub contests_dir: PathBuf,
    /// Scratch space for per-execution work directories.
    pub work_dir: PathBuf,
    pub gnucpp_path: PathBuf,
    pub default_timeout_ms: u64,
    /// Bytes of stdout or stderr a submission may write before it is killed.
    pub output_limit_bytes: usize,
    /// Serve every request with the scripted stub executor instead of the
    /// compiler.
    pub use_stub_executor: bool,
}

impl Config {
    /// Reads the configuration from the environment, after loading `.env`
    /// if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| "[::1]:50051".to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "LISTEN_ADDR",
                msg: e.to_string(),
            })?;

        let default_timeout_ms = match lookup("DEFAULT_TIMEOUT_MS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                Ok(_) => DEFAULT_TIMEOUT_MS,
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        key: "DEFAULT_TIMEOUT_MS",
                        msg: e.to_string(),
                    });
                }
            },
            None => DEFAULT_TIMEOUT_MS,
        };

        let output_limit_bytes = match lookup("OUTPUT_LIMIT_BYTES") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(bytes) if bytes > 0 => bytes,
                Ok(_) => {
                    return Err(ConfigError::Invalid {
                        key: "OUTPUT_LIMIT_BYTES",
                        msg: "must be positive".to_string(),
                    });
                }
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        key: "OUTPUT_LIMIT_BYTES",
                        msg: e.to_string(),
                    });
                }
            },
            None => OUTPUT_LIMIT_BYTES,
        };

        let use_stub_executor = match lookup("USE_STUB_EXECUTOR").as_deref() {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "USE_STUB_EXECUTOR",
                    msg: format!("expected true or false, got {:?}", other),
                });
            }
        };

        Ok(Self {
            listen_addr,
            contests_dir: lookup("CONTESTS_DIR")
                .unwrap_or_else(|| "./Contests".to_string())
                .into(),
            work_dir: lookup("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("datasetrunner")),
            gnucpp_path: lookup("GNUCPP_PATH")
                .unwrap_or_else(|| "/usr/bin/g++".to_string())
                .into(),
            default_timeout_ms,
            output_limit_bytes,
            use_stub_executor,
        })
    }
}

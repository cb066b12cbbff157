use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use clip_engine::EngineConfig;
use clip_engine::memory::TimelineFixture;
use serde::Deserialize;

/// Contents of the configuration file given on the command line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CliConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Where timeline calls go.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendConfig {
    /// A running host speaking newline-delimited JSON.
    Tcp {
        address: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    /// The in-process simulator, seeded from a fixture file.
    Memory { fixture: PathBuf },
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}

pub fn load_config(path: &Path) -> Result<CliConfig, ConfigError> {
    read_json(path)
}

pub fn load_fixture(path: &Path) -> Result<TimelineFixture, ConfigError> {
    read_json(path)
}

fn read_json<T>(path: &Path) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned,
{
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

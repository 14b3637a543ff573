use crate::events::Workflow;
use facecheck_core::PlanError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0} session already running")]
    SessionActive(Workflow),
    #[error("no session is running")]
    NoSession,
    #[error("employee id must not be empty")]
    EmptyEmployeeId,
    #[error("invalid enrollment plan: {0}")]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("engine task exited")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

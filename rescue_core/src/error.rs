use thiserror::Error;

use crate::protocol::ProtocolId;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("protocol {0} not found")]
    ProtocolNotFound(ProtocolId),
    #[error("invalid protocol{}: {reason}", origin(.index, .id))]
    InvalidProtocol {
        /// Position in a batch import, when the protocol came from one
        index: Option<usize>,
        id: Option<ProtocolId>,
        reason: String,
    },
    #[error("timer arm failure: {0}")]
    TimerArm(String),
    #[error("invalid dose: {0}")]
    InvalidDose(String),
}

impl EngineError {
    pub(crate) fn invalid(id: Option<ProtocolId>, reason: impl Into<String>) -> Self {
        Self::InvalidProtocol {
            index: None,
            id,
            reason: reason.into(),
        }
    }

    /// Attach a batch position to an `InvalidProtocol`; other variants pass through.
    pub(crate) fn at_index(self, at: usize) -> Self {
        match self {
            Self::InvalidProtocol { id, reason, .. } => Self::InvalidProtocol {
                index: Some(at),
                id,
                reason,
            },
            other => other,
        }
    }
}

fn origin(index: &Option<usize>, id: &Option<ProtocolId>) -> String {
    match (index, id) {
        (Some(i), Some(id)) => format!(" (entry {i}, id {id})"),
        (Some(i), None) => format!(" (entry {i})"),
        (None, Some(id)) => format!(" {id}"),
        (None, None) => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
pub use eyre::Report;

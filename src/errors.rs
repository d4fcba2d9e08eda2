use thiserror::Error;

/// Typed error hierarchy for mcptrace.
///
/// Used at module boundaries (proxy, journal, stress, config). Leaf-level
/// glue can keep using `anyhow::Result` — the `Internal` variant makes `?`
/// conversion seamless.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to spawn tool server: {0}")]
    SpawnFailed(String),

    #[error("failed to parse line as JSON: {0}")]
    ParseError(String),

    #[error("response id {0} has no in-flight request")]
    CorrelationMiss(String),

    #[error("stress probe exceeded its {0}ms deadline")]
    ProbeTimeout(u64),

    #[error("journal write failed: {0}")]
    JournalWriteError(String),

    #[error("peer closed its stream")]
    PeerClosed,

    #[error("malformed chaos config: {0}")]
    ConfigError(String),

    #[error("{kind} {name:?} already exists")]
    Conflict { kind: &'static str, name: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TraceError {
    /// Whether this error is fatal to the owning run, per the taxonomy in
    /// the error-handling design: SpawnFailed, JournalWriteError and
    /// Internal end the run; everything else is locally absorbed.
    pub fn is_fatal_to_run(&self) -> bool {
        match self {
            Self::SpawnFailed(_) | Self::JournalWriteError(_) | Self::Internal(_) => true,
            Self::ParseError(_)
            | Self::CorrelationMiss(_)
            | Self::ProbeTimeout(_)
            | Self::PeerClosed
            | Self::ConfigError(_)
            | Self::Conflict { .. } => false,
        }
    }
}

pub type TraceResult<T> = std::result::Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_failed_is_fatal() {
        assert!(TraceError::SpawnFailed("enoent".into()).is_fatal_to_run());
    }

    #[test]
    fn parse_error_is_not_fatal() {
        assert!(!TraceError::ParseError("bad json".into()).is_fatal_to_run());
    }

    #[test]
    fn correlation_miss_is_not_fatal() {
        assert!(!TraceError::CorrelationMiss("7".into()).is_fatal_to_run());
    }

    #[test]
    fn peer_closed_is_not_fatal() {
        assert!(!TraceError::PeerClosed.is_fatal_to_run());
    }
}

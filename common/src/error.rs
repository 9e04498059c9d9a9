use std::fmt;

/// The error taxonomy of the engine (see SPEC_FULL.md §7).
///
/// Every boundary wraps the underlying cause with a short textual tag so the
/// surfaced message reads as a breadcrumb, e.g. `"embedding: connection reset"`.
#[derive(thiserror::Error, Debug)]
pub enum ColonyError {
    /// Bad input: malformed request, unknown query type, unknown extension.
    /// Never retried; callers should surface this as a 4xx.
    #[error("validation: {0}")]
    Validation(String),

    /// Unknown project/source/node. Callers should prefer returning an empty
    /// result where the spec allows it (e.g. structural queries) and reserve
    /// this variant for cases that truly have no empty-result representation.
    #[error("not found: {0}")]
    NotFound(String),

    /// A second indexing job was requested for a project that already has
    /// one running.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient failure from an external dependency (embedding/chat API,
    /// network, database) that was retried to exhaustion.
    #[error("{tag}: {source}")]
    Transient {
        tag: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Permanent failure from an external dependency: auth errors or requests
    /// the vendor rejects outright. Not retried.
    #[error("{tag}: {source}")]
    Permanent {
        tag: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The embedding/chat collaborator is unreachable because no API key is
    /// configured. Everything else keeps working (§6).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Change detection, workspace detection, or graph-writer transaction
    /// failure: the source's run is aborted, other sources continue.
    #[error("{tag}: {source}")]
    Fatal {
        tag: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ColonyError {
    pub fn transient(tag: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        ColonyError::Transient { tag, source: Box::new(source) }
    }

    pub fn permanent(tag: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        ColonyError::Permanent { tag, source: Box::new(source) }
    }

    pub fn fatal(tag: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        ColonyError::Fatal { tag, source: Box::new(source) }
    }

    pub fn fatal_msg(tag: &'static str, message: impl fmt::Display) -> Self {
        ColonyError::Fatal { tag, source: Box::new(SimpleCause(message.to_string())) }
    }

    /// Whether this error class is retryable at the lowest level that owns
    /// the request. Validation/NotFound/Conflict/Permanent are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ColonyError::Transient { .. })
    }
}

#[derive(Debug)]
struct SimpleCause(String);

impl fmt::Display for SimpleCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SimpleCause {}

pub type Result<T> = std::result::Result<T, ColonyError>;

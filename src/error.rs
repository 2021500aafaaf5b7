use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Database,
    /// Graph or version absent, or not owned by the caller. Deliberately
    /// ambiguous so non-owners cannot probe for existence.
    NotFoundOrForbidden,
    InvalidInput,
    /// The external interpreter is not configured or could not be reached.
    InterpreterUnavailable,
    /// Interpreter output could not be coerced into a graph payload.
    InterpreterOutputUnparseable,
    /// Interpreter returned a structurally valid but empty graph.
    EmptyResult,
    /// Uniqueness constraint violation, e.g. a duplicate username.
    IntegrityConflict,
    Unknown,
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn database(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Database,
            code: "database_error",
            public,
            source,
        }
    }

    pub fn not_found_or_forbidden(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFoundOrForbidden,
            code: "not_found_or_forbidden",
            public,
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
            public,
            source,
        }
    }

    pub fn interpreter_unavailable(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InterpreterUnavailable,
            code: "interpreter_unavailable",
            public,
            source,
        }
    }

    pub fn unparseable(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InterpreterOutputUnparseable,
            code: "interpreter_output_unparseable",
            public,
            source,
        }
    }

    pub fn empty_result(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::EmptyResult,
            code: "empty_result",
            public,
            source,
        }
    }

    pub fn conflict(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::IntegrityConflict,
            code: "integrity_conflict",
            public,
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            source,
        }
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.public, self.code, self.source)
    }
}

impl std::error::Error for LibError {}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        Self::database("Database request failed", anyhow!(value))
    }
}

use thiserror::Error;

// ── Fetch ─────────────────────────────────────────────────────────────────────

/// One failed upstream request. `page` is set for paginated endpoints.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} on page {page:?} ({url})")]
    Status {
        status: u16,
        page: Option<u32>,
        url: String,
    },

    #[error("Request error on page {page:?}: {message}")]
    Transport { page: Option<u32>, message: String },

    #[error("Upstream returned ok={ok} on page {page:?}")]
    NotOk { page: Option<u32>, ok: i64 },

    #[error("Malformed body on page {page:?}: {message}")]
    Body { page: Option<u32>, message: String },
}

impl FetchError {
    /// Throttling, server errors and dropped connections are worth another try.
    /// Everything else fails the same way twice.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Transport { .. } => true,
            FetchError::NotOk { .. } | FetchError::Body { .. } => false,
        }
    }
}

// ── Parse ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing field `{0}`")]
    MissingField(&'static str),

    #[error("Field `{field}` has unexpected value {value}")]
    BadField { field: &'static str, value: String },

    #[error("Embedded status not found: missing anchor {0}")]
    MissingAnchor(&'static str),

    #[error("Not a counter: {0:?}")]
    Counter(String),

    #[error("Unreadable date expression: {0:?}")]
    Date(String),
}

// ── Post resolution (fetch + parse) ───────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PostError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

// ── Scoring ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    #[error("{user_name}: profile has no {field}")]
    MissingProfile {
        user_name: String,
        field: &'static str,
    },

    #[error("{user_name}: statuses_count is 0, ln(1) = 0 leaves the cognition score undefined")]
    LogDomain { user_name: String },

    #[error("{user_name}: no posts fetched, attention score undefined")]
    NoFetchedPosts { user_name: String },
}

// ── Subject construction ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubjectError {
    #[error("user_name must not be empty")]
    EmptyName,

    #[error("{0}: user_id must be non-zero")]
    ZeroId(String),
}

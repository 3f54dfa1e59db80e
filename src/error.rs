use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The browsing session or the collection page could not be brought up.
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("page structure not recognized: {0}")]
    Parse(String),

    #[error("no usable search result: {0}")]
    Resolution(String),

    #[error("acquisition failed: {0}")]
    Acquisition(String),

    #[error("tag container unusable: {0}")]
    Tag(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("webdriver error (status={status}): {message}")]
    WebDriver { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] ureq::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external tool is missing: {tool}")]
    ExternalToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ExternalToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("external tool timed out: {tool} after {secs}s")]
    ExternalToolTimedOut { tool: String, secs: u64 },
}

impl EngineError {
    /// Only setup failures abort a run; everything else is isolated to one item.
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, EngineError::Setup(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

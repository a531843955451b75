use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeckError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Mutation failed: {0}")]
    Mutation(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Operation already in flight: {0}")]
    DuplicateOperation(String),
}

pub type Result<T> = std::result::Result<T, DeckError>;

impl From<reqwest::Error> for DeckError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeckError::Timeout(err.to_string())
        } else if err.is_connect() {
            DeckError::Network(format!("Connection failed: {err}"))
        } else {
            DeckError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for DeckError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => DeckError::Timeout(err.to_string()),
            _ => DeckError::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DeckError {
    fn from(err: serde_json::Error) -> Self {
        DeckError::Serialization(err.to_string())
    }
}

/// Configuration for retry behavior on transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try.
    pub max_attempts: u32,
    /// Initial backoff duration in milliseconds, doubled per attempt.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, initial_backoff_ms: u64) -> Self {
        self.initial_backoff_ms = initial_backoff_ms;
        self
    }

    fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        let backoff = self
            .initial_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        std::time::Duration::from_millis(backoff.min(self.max_backoff_ms))
    }
}

/// Retry an async operation with exponential backoff.
pub async fn retry_with_backoff<F, Fut, T>(mut operation: F, policy: RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= policy.max_attempts {
                    return Err(error);
                }

                let backoff = policy.backoff_for(attempt);
                attempt += 1;

                tracing::warn!(
                    "Operation failed, retrying in {:?} (attempt {}/{}): {}",
                    backoff,
                    attempt,
                    policy.max_attempts,
                    error
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Run `primary`, falling back to `fallback` on failure.
///
/// Returns the primary error when both fail, since that is the one the
/// caller asked for.
pub async fn with_fallback<F, Fut, T, FB, FutB>(primary: F, fallback: FB) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    FB: FnOnce() -> FutB,
    FutB: std::future::Future<Output = Result<T>>,
{
    match primary().await {
        Ok(result) => Ok(result),
        Err(primary_error) => {
            tracing::warn!("Primary operation failed, trying fallback: {}", primary_error);
            match fallback().await {
                Ok(result) => Ok(result),
                Err(fallback_error) => {
                    tracing::warn!("Fallback also failed: {}", fallback_error);
                    Err(primary_error)
                }
            }
        }
    }
}

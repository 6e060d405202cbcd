//! Error types for dnssd-streams.

use std::fmt;
use std::time::Duration;

/// Result type alias.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Platform error code used when a resolve attempt times out.
///
/// Matches the code the DNS-SD platform reports for its own timeouts, so a
/// locally-enforced timeout is indistinguishable in shape from a platform
/// failure.
pub const TIMEOUT_CODE: i64 = -72007;

/// Structured error payload reported by the platform: an error domain plus
/// a numeric code, as delivered by `didNotSearch` / `didNotResolve` style
/// callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error domain the code belongs to.
    pub domain: String,
    /// Numeric error code within the domain.
    pub code: i64,
}

impl ErrorInfo {
    /// Create an error payload.
    pub fn new(domain: impl Into<String>, code: i64) -> Self {
        Self {
            domain: domain.into(),
            code,
        }
    }

    /// Payload for a locally-enforced resolve timeout.
    pub fn timed_out() -> Self {
        Self::new("dnssd", TIMEOUT_CODE)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.domain, self.code)
    }
}

/// Main error type.
///
/// Every failure surfaces as a single terminal event on the producer where
/// it originated; a failed single-flight cache entry is evicted so a retry
/// is a fresh attempt. Cloneable so one failure can fan out to every
/// subscriber of a shared producer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// A browse session failed to start or was torn down by the platform.
    #[error("browse failed: {0}")]
    Browse(ErrorInfo),

    /// Resolution failed, either reported by the platform or by the
    /// caller-specified timeout expiring.
    #[error("resolution failed: {0}")]
    Resolution(ErrorInfo),

    /// Publishing the entity for inbound connections failed.
    #[error("publish failed: {0}")]
    Publish(ErrorInfo),

    /// Neither half of a connection's stream pair could be obtained.
    #[error("could not establish streams to service")]
    StreamSetup,

    /// The platform reported an error on an open byte stream.
    #[error("stream error: {0}")]
    StreamIo(ErrorInfo),

    /// Fallback for platform failures with no classification.
    #[error("unknown discovery error")]
    Unknown,
}

impl DiscoveryError {
    /// Resolution failure for a timeout that expired locally.
    pub fn resolve_timeout(after: Duration) -> Self {
        tracing::debug!(?after, "resolve timed out");
        Self::Resolution(ErrorInfo::timed_out())
    }

    /// True if this is a resolution timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Resolution(info) if info.code == TIMEOUT_CODE)
    }
}

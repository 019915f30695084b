use thiserror::Error;

/// Errors from AWS service operations.
#[derive(Debug, Clone, Error)]
pub enum AwsError {
    /// The SDK returned a service error with no more specific
    /// classification.
    #[error("AWS service error: {0}")]
    ServiceError(String),

    /// The request was throttled.
    #[error("AWS request throttled")]
    Throttled,

    /// A network or connection error occurred.
    #[error("AWS connection error: {0}")]
    Connection(String),

    /// The request timed out.
    #[error("AWS request timed out")]
    Timeout,

    /// A start request failed because the requested instance type has no
    /// capacity in the availability zone. Retryable via the type-fallback
    /// list.
    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    /// STS assume-role failed. Fatal to the current target.
    #[error("role assumption failed for {role_arn}: {message}")]
    RoleAssumption { role_arn: String, message: String },

    /// A configuration or payload problem on our side.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl AwsError {
    /// Whether retrying the same request may succeed without intervention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled | Self::Connection(_) | Self::Timeout
        )
    }

    /// Whether this is the capacity-insufficiency signal that drives the
    /// instance-type fallback list.
    #[must_use]
    pub fn is_insufficient_capacity(&self) -> bool {
        matches!(self, Self::InsufficientCapacity(_))
    }
}

/// Classify an SDK error string into the appropriate [`AwsError`].
///
/// The SDK surfaces service error codes inside the rendered message; this
/// helper inspects it for the patterns the scheduler branches on.
pub fn classify_sdk_error(error_str: &str) -> AwsError {
    let lower = error_str.to_lowercase();
    if lower.contains("insufficientinstancecapacity") || lower.contains("insufficient capacity") {
        AwsError::InsufficientCapacity(error_str.to_owned())
    } else if lower.contains("throttl") || lower.contains("rate exceed") || lower.contains("too many")
    {
        AwsError::Throttled
    } else if lower.contains("timeout") || lower.contains("timed out") {
        AwsError::Timeout
    } else if lower.contains("connection")
        || lower.contains("connect")
        || lower.contains("dns")
        || lower.contains("network")
    {
        AwsError::Connection(error_str.to_owned())
    } else {
        AwsError::ServiceError(error_str.to_owned())
    }
}

/// Whether an EC2 stop failure indicates the instance cannot hibernate, in
/// which case the stop is retried as a plain stop.
#[must_use]
pub fn is_hibernation_unsupported(error_str: &str) -> bool {
    error_str
        .to_lowercase()
        .contains("unsupportedhibernationconfiguration")
}

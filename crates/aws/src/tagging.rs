use chrono::{DateTime, Utc};

/// Informational tag values written onto resources in a problematic state,
/// so operators can spot misconfiguration from the console without reading
/// logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoTags {
    /// Tag key for the machine-readable error code.
    pub error_code_key: String,
    /// Tag key for the human-readable message.
    pub error_message_key: String,
}

impl Default for InfoTags {
    fn default() -> Self {
        Self {
            error_code_key: "offhours:error-code".to_owned(),
            error_message_key: "offhours:error-message".to_owned(),
        }
    }
}

/// Error codes surfaced as informational tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoTagCode {
    /// The resource's schedule tag names a schedule that does not exist.
    UnknownSchedule,
    /// The resource's shape cannot be scheduled (e.g. an Aurora instance
    /// managed through its cluster).
    UnsupportedResource,
    /// The schedule cannot be compiled for this resource type (e.g. an
    /// auto-scaling group with a recurrence the scheduled-action grammar
    /// cannot express).
    IncompatibleSchedule,
}

impl InfoTagCode {
    /// Return a string representation of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownSchedule => "UnknownSchedule",
            Self::UnsupportedResource => "UnsupportedResource",
            Self::IncompatibleSchedule => "IncompatibleSchedule",
        }
    }
}

impl InfoTags {
    /// The tag pairs for an error state: a timestamped code plus the
    /// message.
    #[must_use]
    pub fn error_pairs(
        &self,
        code: InfoTagCode,
        message: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        vec![
            (
                self.error_code_key.clone(),
                format!("{} ({})", code.as_str(), now.format("%Y-%m-%d %H:%M UTC")),
            ),
            (self.error_message_key.clone(), message.to_owned()),
        ]
    }

    /// The tag keys to remove when the resource is healthy again.
    #[must_use]
    pub fn clear_keys(&self) -> Vec<String> {
        vec![self.error_code_key.clone(), self.error_message_key.clone()]
    }
}

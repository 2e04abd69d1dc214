//! Error types for the OpenNebula provider

use std::time::Duration;

use nebula_core::provider::ProviderError;

/// Errors raised while talking to an OpenNebula controller or preparing a request
#[derive(Debug, thiserror::Error)]
pub enum OneError {
    /// Malformed input that will never succeed on retry
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other failure reported by the remote API
    #[error("{operation} failed: {message}")]
    RemoteOperation { operation: String, message: String },

    #[error(
        "Timed out after {elapsed:?} waiting for VM {id} to become {target} (last seen: {last_seen})"
    )]
    Timeout {
        id: i64,
        target: String,
        elapsed: Duration,
        last_seen: String,
    },

    #[error("VM {id} entered boot failure: {message}")]
    BootFailure { id: i64, message: String },

    /// The requested change can only be applied by recreating the VM
    #[error("Cannot change {} in place", .0.join(", "))]
    RequiresReplacement(Vec<String>),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Xml(String),
}

impl OneError {
    pub fn validation(message: impl Into<String>) -> Self {
        OneError::Validation(message.into())
    }

    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        OneError::RemoteOperation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OneError::NotFound(_))
    }
}

impl From<quick_xml::DeError> for OneError {
    fn from(e: quick_xml::DeError) -> Self {
        OneError::Xml(e.to_string())
    }
}

impl From<quick_xml::Error> for OneError {
    fn from(e: quick_xml::Error) -> Self {
        OneError::Xml(e.to_string())
    }
}

impl From<OneError> for ProviderError {
    fn from(e: OneError) -> Self {
        let replace = matches!(e, OneError::RequiresReplacement(_));
        let error = ProviderError::new(e.to_string()).with_cause(e);
        if replace {
            error.requiring_replacement()
        } else {
            error
        }
    }
}

pub type OneResult<T> = Result<T, OneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_error_sets_flag() {
        let err: ProviderError =
            OneError::RequiresReplacement(vec!["cpu".to_string(), "disk".to_string()]).into();
        assert!(err.requires_replacement);
        assert_eq!(err.message, "Cannot change cpu, disk in place");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn remote_error_names_operation() {
        let err: ProviderError = OneError::remote("one.vm.rename", "[VirtualMachineRename] denied").into();
        assert!(!err.requires_replacement);
        assert_eq!(err.message, "one.vm.rename failed: [VirtualMachineRename] denied");
    }
}

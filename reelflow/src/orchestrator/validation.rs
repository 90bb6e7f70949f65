//! Input validation for workflow requests.

use crate::core::WorkflowRequest;
use crate::errors::{ConfigurationError, ValidationError};
use regex::Regex;

/// Pattern an identity must match.
pub const IDENTITY_PATTERN: &str = r"^[A-Za-z0-9_.:@-]{1,128}$";

/// Longest accepted source identifier, in characters.
pub const MAX_IDENTIFIER_CHARS: usize = 2048;

/// Rejects malformed requests before any collaborator is called.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    identity: Regex,
    max_hint_chars: usize,
}

impl RequestValidator {
    /// Creates a validator accepting hints up to `max_hint_chars`.
    pub fn new(max_hint_chars: usize) -> Result<Self, ConfigurationError> {
        let identity = Regex::new(IDENTITY_PATTERN)
            .map_err(|e| ConfigurationError::new("identity_pattern", e.to_string()))?;
        Ok(Self {
            identity,
            max_hint_chars,
        })
    }

    /// Checks identity, identifier and hint.
    pub fn validate(&self, request: &WorkflowRequest) -> Result<(), ValidationError> {
        if !self.identity.is_match(&request.identity) {
            return Err(ValidationError::new(
                "identity",
                "must be 1-128 characters of letters, digits or _.:@-",
            ));
        }

        let identifier = request.identifier.as_str();
        if identifier.trim().is_empty() {
            return Err(ValidationError::new("identifier", "must not be empty"));
        }
        if identifier.chars().any(char::is_whitespace) {
            return Err(ValidationError::new("identifier", "must not contain whitespace"));
        }
        if identifier.chars().count() > MAX_IDENTIFIER_CHARS {
            return Err(ValidationError::new(
                "identifier",
                format!("longer than {MAX_IDENTIFIER_CHARS} characters"),
            ));
        }

        if let Some(hint) = &request.hint {
            if hint.chars().count() > self.max_hint_chars {
                return Err(ValidationError::new(
                    "hint",
                    format!("longer than {} characters", self.max_hint_chars),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> RequestValidator {
        RequestValidator::new(20).unwrap()
    }

    #[test]
    fn test_accepts_well_formed_request() {
        let request = WorkflowRequest::new("user_1@chat", "https://example.com/a?b=c").with_hint("short");
        assert!(validator().validate(&request).is_ok());
    }

    #[test]
    fn test_rejects_bad_identity() {
        for identity in ["", "has space", "x".repeat(129).as_str()] {
            let err = validator().validate(&WorkflowRequest::new(identity, "doc")).unwrap_err();
            assert_eq!(err.field, "identity", "identity {identity:?}");
        }
    }

    #[test]
    fn test_rejects_bad_identifier() {
        for identifier in ["", "   ", "two words", "a".repeat(MAX_IDENTIFIER_CHARS + 1).as_str()] {
            let err = validator().validate(&WorkflowRequest::new("u", identifier)).unwrap_err();
            assert_eq!(err.field, "identifier");
        }
    }

    #[test]
    fn test_hint_limit_counts_characters() {
        let at_limit = WorkflowRequest::new("u", "doc").with_hint("é".repeat(20));
        assert!(validator().validate(&at_limit).is_ok());

        let over = WorkflowRequest::new("u", "doc").with_hint("é".repeat(21));
        assert_eq!(validator().validate(&over).unwrap_err().field, "hint");
    }
}

//! Error types for the signature library.
//!
//! This module defines all error types that can occur while signing, reading
//! and verifying document package signatures.

/// Result type alias for signature library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during signature processing.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)] // "Invalid" prefix is intentional for clarity
pub enum Error {
    /// Missing signing certificate, or one whose serial number cannot be encoded
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// An operation was requested in a state that does not allow it
    #[error("Precondition violated: {0}")]
    PreconditionViolated(String),

    /// Signature index outside the current signature list
    #[error("Signature index {index} out of range (have {len})")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of signatures available
        len: usize,
    },

    /// Signature, tree buffer or buffering node could not be constructed
    #[error("Security component unavailable: {0}")]
    ComponentUnavailable(String),

    /// Stream or storage resolved to a format the operation cannot handle
    #[error("Format mismatch: expected {expected}, found {found}")]
    FormatMismatch {
        /// Format the operation needs
        expected: String,
        /// Format that was resolved
        found: String,
    },

    /// Package entry does not exist
    #[error("Package entry not found: {0}")]
    EntryNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// XML reading or writing error
    #[error("XML error: {0}")]
    Xml(String),

    /// Zip archive error
    #[error("Archive error: {0}")]
    Archive(String),

    /// Signing, verification or key decoding error
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Base64 or UTF-8 decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::Archive(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_out_of_range_error() {
        let err = Error::IndexOutOfRange { index: 3, len: 2 };
        let msg = format!("{}", err);
        assert!(msg.contains("index 3"));
        assert!(msg.contains("have 2"));
    }

    #[test]
    fn test_format_mismatch_error() {
        let err = Error::FormatMismatch {
            expected: "relationship storage".to_string(),
            found: "plain stream".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("relationship storage"));
        assert!(msg.contains("plain stream"));
    }

    #[test]
    fn test_invalid_certificate_error() {
        let err = Error::InvalidCertificate("no certificate selected".to_string());
        assert!(format!("{}", err).contains("no certificate selected"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}

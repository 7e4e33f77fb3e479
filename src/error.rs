//! Error types for the virtual display client.

use thiserror::Error;

/// Errors that can occur while fetching, transforming, or presenting a frame.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP transport failed (connection refused, DNS, timeout, etc.)
    #[error("request failed: {0}")]
    Network(String),

    /// Server returned a non-success HTTP status code
    #[error("server returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (may be empty)
        body: String,
    },

    /// Malformed response body or undecodable image bytes
    #[error("decode failed: {0}")]
    Decode(String),

    /// Output image could not be serialized
    #[error("encode failed: {0}")]
    Encode(String),

    /// The display sink rejected the frame
    #[error("render failed: {0}")]
    Render(String),

    /// Setup endpoint reported a failure in its JSON body
    #[error("registration failed (status {status}): {message}")]
    Registration {
        /// Application-level status from the response body
        status: u16,
        /// Failure message from the response body
        message: String,
    },

    /// Invalid configuration detected before the refresh loop starts
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem error reading or writing the config file
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Decode(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Status {
            status: 500,
            body: "internal".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("internal"));

        let err = Error::Registration {
            status: 404,
            message: "device not found".to_string(),
        };
        assert!(err.to_string().contains("device not found"));
    }
}

//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] types. The media API secret that signs room
//! credentials and the question-generator API key are held in these wrappers,
//! so any struct deriving `Debug` around them prints `[REDACTED]` instead of
//! the value.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct MediaCredentials {
//!     api_key: String,
//!     api_secret: SecretString,
//! }
//!
//! let creds = MediaCredentials {
//!     api_key: "APIabc".to_string(),
//!     api_secret: SecretString::from("signing-secret"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("signing-secret"));
//! assert_eq!(creds.api_secret.expose_secret(), "signing-secret");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("livekit-secret");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("livekit-secret"));
    }

    #[test]
    fn test_deserialized_secret_stays_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct GeneratorCredentials {
            endpoint: String,
            api_key: SecretString,
        }

        let json = r#"{"endpoint": "https://llm.local/v1", "api_key": "gsk-123"}"#;
        let creds: GeneratorCredentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.api_key.expose_secret(), "gsk-123");
        let debug = format!("{creds:?}");
        assert!(debug.contains("llm.local"));
        assert!(!debug.contains("gsk-123"));
    }
}

//! Middleware configuration

use crate::key::{KeyPolicy, DEFAULT_MAX_KEY_BODY};

/// How the default policy fingerprints request bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKeyMode {
    /// Exact byte match: distinct bodies can never collapse, at the
    /// cost of keeping the encoded body in the key
    Exact,
    /// SHA-256 digest: constant-size keys for large bodies
    Digest,
}

/// Configuration options for [`DedupMiddleware`](crate::DedupMiddleware)
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Whether deduplication is active; when false every request is
    /// passed straight to the handler
    pub enabled: bool,

    /// Body fingerprinting mode for the default key policy
    pub body_key_mode: BodyKeyMode,

    /// Cap on how much body the key pipeline will buffer; larger
    /// bodies fail key derivation and the request is handled without
    /// deduplication
    pub max_buffered_body: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            body_key_mode: BodyKeyMode::Exact,
            max_buffered_body: DEFAULT_MAX_KEY_BODY,
        }
    }
}

impl DedupConfig {
    /// Disable deduplication (pass-through middleware)
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Set the body fingerprinting mode
    pub fn body_key_mode(mut self, mode: BodyKeyMode) -> Self {
        self.body_key_mode = mode;
        self
    }

    /// Set the body buffering cap
    pub fn max_buffered_body(mut self, limit: usize) -> Self {
        self.max_buffered_body = limit;
        self
    }

    /// Build the key policy this configuration describes
    pub fn key_policy(&self) -> KeyPolicy {
        let policy = match self.body_key_mode {
            BodyKeyMode::Exact => KeyPolicy::exact(),
            BodyKeyMode::Digest => KeyPolicy::digest(),
        };
        policy.max_body(self.max_buffered_body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DedupConfig::default();

        assert!(config.enabled);
        assert_eq!(config.body_key_mode, BodyKeyMode::Exact);
        assert_eq!(config.max_buffered_body, DEFAULT_MAX_KEY_BODY);
    }

    #[test]
    fn test_builder_disabled() {
        let config = DedupConfig::default().disabled();

        assert!(!config.enabled);
    }

    #[test]
    fn test_builder_chaining() {
        let config = DedupConfig::default()
            .body_key_mode(BodyKeyMode::Digest)
            .max_buffered_body(1024);

        assert_eq!(config.body_key_mode, BodyKeyMode::Digest);
        assert_eq!(config.max_buffered_body, 1024);
    }
}

//! Storage key generation.
//!
//! A raw caller identifier (an IP address, a user id) is namespaced before it
//! touches the store, so that limiters sharing a store never collide.

use std::fmt;
use std::sync::Arc;

/// Turns a raw identifier into the key stored in a [`LimiterStore`](super::LimiterStore).
#[derive(Clone)]
pub enum KeyGenerator {
    /// Prepend a fixed prefix, e.g. `"api:"` turns `203.0.113.5` into `api:203.0.113.5`.
    Prefix(String),
    /// Arbitrary namespacing function.
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl KeyGenerator {
    /// Create a prefix key generator.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        KeyGenerator::Prefix(prefix.into())
    }

    /// Create a key generator from a closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        KeyGenerator::Custom(Arc::new(f))
    }

    /// Generate the storage key for an identifier.
    pub fn generate(&self, identifier: &str) -> String {
        match self {
            KeyGenerator::Prefix(prefix) => {
                let mut key = String::with_capacity(prefix.len() + identifier.len());
                key.push_str(prefix);
                key.push_str(identifier);
                key
            }
            KeyGenerator::Custom(f) => f(identifier),
        }
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        KeyGenerator::Prefix(String::new())
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyGenerator::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
            KeyGenerator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

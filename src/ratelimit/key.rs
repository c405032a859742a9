//! Client identity keys.

/// Token used when the request carries no credential.
pub const ANONYMOUS_TOKEN: &str = "anon";

/// A key that identifies one client for rate limiting.
///
/// The key is the credential token combined with the source address, so the
/// same token used from two addresses is limited separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Credential token, or `anon`
    pub token: String,
    /// Client source address
    pub source: String,
}

impl RateLimitKey {
    /// Create a key from a token and source address.
    pub fn new(token: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            source: source.into(),
        }
    }

    /// Create a key from an optional credential.
    ///
    /// Missing and empty credentials both map to the anonymous token.
    pub fn from_parts(token: Option<&str>, source: &str) -> Self {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => ANONYMOUS_TOKEN,
        };
        Self::new(token, source)
    }

    /// Convert the key to its string form, `rate:{token}:{source}`.
    pub fn to_string_key(&self) -> String {
        format!("rate:{}:{}", self.token, self.source)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_key_format() {
        let key = RateLimitKey::from_parts(None, "127.0.0.1");
        assert_eq!(key.to_string(), "rate:anon:127.0.0.1");
    }

    #[test]
    fn test_empty_token_is_anonymous() {
        let key = RateLimitKey::from_parts(Some(""), "10.0.0.1");
        assert_eq!(key.token, ANONYMOUS_TOKEN);
    }

    #[test]
    fn test_token_is_kept_verbatim() {
        let key = RateLimitKey::from_parts(Some("Bearer abc.def"), "::1");
        assert_eq!(key.to_string_key(), "rate:Bearer abc.def:::1");
    }

    #[test]
    fn test_same_token_different_source_differs() {
        let a = RateLimitKey::new("t", "10.0.0.1");
        let b = RateLimitKey::new("t", "10.0.0.2");
        assert_ne!(a, b);
        assert_ne!(a.to_string(), b.to_string());
    }
}

//! Shared bearer-token check for the query API.

use crate::error::AuthError;

/// Allow-list of bearer tokens. An empty list rejects every request.
#[derive(Debug, Clone, Default)]
pub struct TokenGate {
    tokens: Vec<String>,
}

impl TokenGate {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Check an `Authorization` header value.
    pub fn check(&self, header: Option<&str>) -> Result<(), AuthError> {
        let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(AuthError::Missing)?;
        let (scheme, token) = header.split_once(' ').unwrap_or((header, ""));
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::Invalid);
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        // Scan every entry so timing does not reveal which one matched.
        let matched = self
            .tokens
            .iter()
            .fold(false, |acc, t| constant_time_eq(t.as_bytes(), token.as_bytes()) | acc);
        if matched {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_token() {
        let gate = TokenGate::new(vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(gate.check(Some("Bearer beta")), Ok(()));
        assert_eq!(gate.check(Some("bearer alpha")), Ok(()));
    }

    #[test]
    fn test_rejections() {
        let gate = TokenGate::new(vec!["alpha".to_string()]);
        assert_eq!(gate.check(None), Err(AuthError::Missing));
        assert_eq!(gate.check(Some("Bearer ")), Err(AuthError::Missing));
        assert_eq!(gate.check(Some("Bearer alph")), Err(AuthError::Invalid));
        assert_eq!(gate.check(Some("Basic alpha")), Err(AuthError::Invalid));
    }

    #[test]
    fn test_empty_allow_list_rejects_everything() {
        let gate = TokenGate::new(vec![String::new()]);
        assert!(gate.is_empty());
        assert_eq!(gate.check(Some("Bearer ")), Err(AuthError::Missing));
        assert_eq!(gate.check(Some("Bearer anything")), Err(AuthError::Invalid));
    }
}

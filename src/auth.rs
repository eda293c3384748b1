//! Bearer-token resolution at the identity boundary.
//!
//! Token issuance lives in an external identity platform; this side only
//! maps a presented bearer token to a configured user id, in constant
//! time.

use crate::config::ApiToken;

/// Constant-time token comparison. Returns `false` if either token is
/// empty.
pub fn validate_token(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.is_empty() || expected.is_empty() {
        return false;
    }

    let len_match = provided.len() == expected.len();

    let mut diff: u8 = 0;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }

    len_match && diff == 0
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();

    if header.len() < 7 {
        return None;
    }

    let (prefix, token) = header.split_at(7);
    if prefix.eq_ignore_ascii_case("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    } else {
        None
    }
}

/// Resolve an Authorization header to a configured user id. Every
/// configured token is compared so timing does not leak which one
/// matched.
pub fn resolve_user(header: Option<&str>, tokens: &[ApiToken]) -> Option<String> {
    let provided = extract_bearer_token(header?)?;

    let mut matched = None;
    for entry in tokens {
        if validate_token(provided, &entry.token) && matched.is_none() {
            matched = Some(entry.user_id.clone());
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Vec<ApiToken> {
        vec![
            ApiToken {
                user_id: "user-1".to_string(),
                token: "secret-one".to_string(),
            },
            ApiToken {
                user_id: "user-2".to_string(),
                token: "secret-two".to_string(),
            },
        ]
    }

    #[test]
    fn test_validate_token_matching() {
        assert!(validate_token("secret123", "secret123"));
        assert!(validate_token("a", "a"));
    }

    #[test]
    fn test_validate_token_mismatch() {
        assert!(!validate_token("secret123", "secret124"));
        assert!(!validate_token("secret123", "SECRET123"));
        assert!(!validate_token("short", "longer"));
    }

    #[test]
    fn test_validate_token_empty() {
        assert!(!validate_token("", ""));
        assert!(!validate_token("", "secret"));
        assert!(!validate_token("secret", ""));
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer secret123"), Some("secret123"));
        assert_eq!(extract_bearer_token("bearer secret123"), Some("secret123"));
        assert_eq!(extract_bearer_token("Basic secret123"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token(""), None);
    }

    #[test]
    fn test_resolve_user() {
        assert_eq!(
            resolve_user(Some("Bearer secret-two"), &tokens()),
            Some("user-2".to_string())
        );
        assert_eq!(resolve_user(Some("Bearer nope"), &tokens()), None);
        assert_eq!(resolve_user(None, &tokens()), None);
        assert_eq!(resolve_user(Some("Bearer secret-one"), &[]), None);
    }
}

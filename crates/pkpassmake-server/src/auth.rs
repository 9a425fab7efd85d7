//! Request authorization for the signing endpoint.
//!
//! Clients send the shared token in the `Authorization` header, either
//! verbatim or as `Bearer <token>`. Comparison is constant-time.

use crate::error::{Result, ServerError};
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroizing;

/// Constant-time comparison of two byte slices.
///
/// Returns `false` immediately on length mismatch; the token length is not
/// secret.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Check the `Authorization` header in a raw header block against
/// `expected`.
///
/// # Errors
///
/// Returns `ServerError::Unauthorized` if the header is missing or does not
/// match.
pub fn check_authorization(header_block: &str, expected: &Zeroizing<String>) -> Result<()> {
    const HEADER_PREFIX: &str = "authorization:";
    const BEARER_PREFIX: &str = "bearer ";

    for line in header_block.lines() {
        let Some(name) = line.get(..HEADER_PREFIX.len()) else {
            continue;
        };
        if !name.eq_ignore_ascii_case(HEADER_PREFIX) {
            continue;
        }
        let value = line[HEADER_PREFIX.len()..].trim();
        if constant_time_eq(value.as_bytes(), expected.as_bytes()) {
            return Ok(());
        }
        if let Some(scheme) = value.get(..BEARER_PREFIX.len()) {
            if scheme.eq_ignore_ascii_case(BEARER_PREFIX) {
                let token = value[BEARER_PREFIX.len()..].trim();
                if constant_time_eq(token.as_bytes(), expected.as_bytes()) {
                    return Ok(());
                }
            }
        }
        warn!("Invalid authorization token");
        return Err(ServerError::Unauthorized);
    }

    warn!("Missing Authorization header");
    Err(ServerError::Unauthorized)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token() -> Zeroizing<String> {
        Zeroizing::new("s3cret-token".to_string())
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_accepts_raw_and_bearer() {
        assert!(check_authorization("Authorization: s3cret-token\r\n", &token()).is_ok());
        assert!(check_authorization("authorization: Bearer s3cret-token\r\n", &token()).is_ok());
        assert!(check_authorization(
            "Host: signer\r\nAUTHORIZATION:   bearer s3cret-token  \r\n",
            &token()
        )
        .is_ok());
    }

    #[test]
    fn test_rejects_wrong_or_missing() {
        assert!(matches!(
            check_authorization("Authorization: Bearer nope\r\n", &token()),
            Err(ServerError::Unauthorized)
        ));
        assert!(check_authorization("Host: signer\r\n", &token()).is_err());
        assert!(check_authorization("", &token()).is_err());
    }

    #[test]
    fn test_does_not_match_other_headers() {
        // Proxy-Authorization is a different header
        assert!(check_authorization("Proxy-Authorization: s3cret-token\r\n", &token()).is_err());
    }
}

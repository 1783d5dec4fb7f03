use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The longest a user token may live, in seconds.
pub const MAX_TOKEN_DURATION: u64 = 86400;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing or malformed credentials")]
    InvalidToken,
    #[error("Token has expired")]
    Expired,
    #[error("Endpoint not allowed for this principal")]
    WrongKind,
}

/// An authenticated caller and its authority.
#[derive(Debug, Clone)]
pub enum Principal {
    /// Unrestricted authority, matched against the configured token set
    Admin,
    /// The mixer's callback identity, only valid on internal endpoints
    Internal,
    /// A contributor bounded by queue quotas
    User(UserClaims),
    /// A broadcaster bounded by streaming time
    Livestream(LivestreamClaims),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub user_id: String,
    pub max_queue_songs: u32,
    pub max_add_requests: u32,
    #[serde(rename = "typ")]
    kind: TokenKind,
    exp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivestreamClaims {
    pub user_id: String,
    pub max_streaming_seconds: u64,
    pub show_name: Option<String>,
    pub min_recording_duration: u64,
    #[serde(rename = "typ")]
    kind: TokenKind,
    exp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TokenKind {
    User,
    Livestream,
}

#[cfg(test)]
impl UserClaims {
    pub(crate) fn for_tests(user_id: &str, max_queue_songs: u32, max_add_requests: u32) -> Self {
        Self {
            user_id: user_id.to_string(),
            max_queue_songs,
            max_add_requests,
            kind: TokenKind::User,
            exp: u64::MAX,
        }
    }
}

#[cfg(test)]
impl LivestreamClaims {
    pub(crate) fn for_tests(user_id: &str, max_streaming_seconds: u64) -> Self {
        Self {
            user_id: user_id.to_string(),
            max_streaming_seconds,
            show_name: Some("test show".to_string()),
            min_recording_duration: 0,
            kind: TokenKind::Livestream,
            exp: u64::MAX,
        }
    }
}

/// Resolves bearer credentials into principals and issues new tokens.
pub struct Auth {
    admin_tokens: Vec<String>,
    internal_token: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl Auth {
    pub fn new(admin_tokens: Vec<String>, internal_token: String, jwt_secret: &str) -> Self {
        Self {
            admin_tokens,
            internal_token,
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
        }
    }

    /// Resolves a bearer credential to a principal.
    pub fn resolve(&self, token: &str) -> Result<Principal, AuthError> {
        if self.admin_tokens.iter().any(|t| t == token) {
            return Ok(Principal::Admin);
        }

        if self.internal_token == token {
            return Ok(Principal::Internal);
        }

        if let Ok(claims) = self.decode_claims::<UserClaims>(token) {
            if claims.kind == TokenKind::User {
                return Ok(Principal::User(claims));
            }
        }

        let claims = self.decode_claims::<LivestreamClaims>(token)?;

        if claims.kind != TokenKind::Livestream {
            return Err(AuthError::InvalidToken);
        }

        Ok(Principal::Livestream(claims))
    }

    /// Issues a user token. Duration is capped at a day.
    pub fn issue_user_token(
        &self,
        duration_seconds: u64,
        max_queue_songs: u32,
        max_add_requests: u32,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let duration = duration_seconds.min(MAX_TOKEN_DURATION);
        let expires_at = Utc::now() + Duration::seconds(duration as i64);

        let claims = UserClaims {
            user_id: format!("user_{}", aircast_core::random_string(12)),
            max_queue_songs,
            max_add_requests,
            kind: TokenKind::User,
            exp: expires_at.timestamp() as u64,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| AuthError::InvalidToken)?;

        Ok((token, expires_at))
    }

    /// Issues a livestream token. The token outlives the streaming limit by
    /// a factor of two, so reconnects within a session window keep working.
    pub fn issue_livestream_token(
        &self,
        max_streaming_seconds: u64,
        show_name: Option<String>,
        min_recording_duration: u64,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let expires_at = Utc::now() + Duration::seconds((max_streaming_seconds * 2) as i64);

        let claims = LivestreamClaims {
            user_id: format!("dj_{}", aircast_core::random_string(12)),
            max_streaming_seconds,
            show_name,
            min_recording_duration,
            kind: TokenKind::Livestream,
            exp: expires_at.timestamp() as u64,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| AuthError::InvalidToken)?;

        Ok((token, expires_at))
    }

    /// Decodes a livestream credential, as presented by the mixer's auth
    /// callback.
    pub fn verify_livestream_token(&self, token: &str) -> Result<LivestreamClaims, AuthError> {
        let claims = self.decode_claims::<LivestreamClaims>(token)?;

        if claims.kind != TokenKind::Livestream {
            return Err(AuthError::WrongKind);
        }

        Ok(claims)
    }

    fn decode_claims<C>(&self, token: &str) -> Result<C, AuthError>
    where
        C: serde::de::DeserializeOwned,
    {
        decode::<C>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn auth() -> Auth {
        Auth::new(
            vec!["admin-token".to_string()],
            "internal-token".to_string(),
            "test-secret",
        )
    }

    #[test]
    fn test_admin_and_internal_tokens_resolve() {
        let auth = auth();

        assert!(matches!(
            auth.resolve("admin-token").unwrap(),
            Principal::Admin
        ));
        assert!(matches!(
            auth.resolve("internal-token").unwrap(),
            Principal::Internal
        ));
    }

    #[test]
    fn test_user_token_round_trip() {
        let auth = auth();

        let (token, _) = auth.issue_user_token(3600, 2, 3).unwrap();

        let Principal::User(claims) = auth.resolve(&token).unwrap() else {
            panic!("expected a user principal");
        };

        assert_eq!(claims.max_queue_songs, 2);
        assert_eq!(claims.max_add_requests, 3);
        assert!(claims.user_id.starts_with("user_"));
    }

    #[test]
    fn test_livestream_token_round_trip() {
        let auth = auth();

        let (token, expires_at) = auth
            .issue_livestream_token(120, Some("night show".to_string()), 30)
            .unwrap();

        let claims = auth.verify_livestream_token(&token).unwrap();
        assert_eq!(claims.max_streaming_seconds, 120);
        assert_eq!(claims.show_name.as_deref(), Some("night show"));
        assert_eq!(claims.min_recording_duration, 30);

        let lifetime = (expires_at - Utc::now()).num_seconds();
        assert!(
            lifetime >= 120 * 2 - 5,
            "the token should outlive the limit twice over, got {lifetime}s"
        );
    }

    #[test]
    fn test_user_token_is_not_a_livestream_token() {
        let auth = auth();

        let (token, _) = auth.issue_user_token(3600, 1, 1).unwrap();

        assert!(
            auth.verify_livestream_token(&token).is_err(),
            "a user token must not open a live session"
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(auth().resolve("not-a-token").is_err());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let issuer = auth();
        let verifier = Auth::new(vec![], "other".to_string(), "other-secret");

        let (token, _) = issuer.issue_user_token(3600, 1, 1).unwrap();
        assert!(verifier.resolve(&token).is_err());
    }
}

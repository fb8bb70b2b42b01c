//! Invite token codec.
//!
//! Encodes the invite's identity claims into a signed bearer token for the
//! emailed signup link. The codec owns all encode/decode logic; nothing else
//! in the service parses tokens, and decoded claims are never trusted for
//! state transitions without re-reading the row under a lock.

use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ServiceError;
use crate::models::{Invite, InviteRole};

/// Claims embedded in an invite token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteClaims {
    /// Subject: the invite id.
    pub sub: Uuid,
    /// Recipient email, normalized.
    pub email: String,
    /// Granted role.
    pub role: InviteRole,
    /// Expiration time (Unix timestamp), mirrors the row's expiry.
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
}

impl InviteClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Token codec keyed by a shared secret (HS256).
#[derive(Clone)]
pub struct InviteTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl InviteTokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Encode the claims of an invite into a token.
    pub fn encode(&self, invite: &Invite) -> Result<String, ServiceError> {
        let role = invite
            .role()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("invite has unknown role")))?;

        let claims = InviteClaims {
            sub: invite.invite_id,
            email: invite.email.clone(),
            role,
            exp: invite.expiry_utc.timestamp(),
            iat: Utc::now().timestamp(),
        };

        let header = Header::new(Algorithm::HS256);
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    /// Decode and verify a token.
    ///
    /// Malformed or tampered input fails `InvalidToken`; a structurally valid
    /// token whose embedded expiry has passed fails `TokenExpired`. The two
    /// kinds stay distinguishable so the caller can tell the user why.
    pub fn decode(&self, token: &str) -> Result<InviteClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        match decode::<InviteClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(ServiceError::TokenExpired),
                _ => Err(ServiceError::InvalidToken),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn codec() -> InviteTokenService {
        InviteTokenService::new("test-secret-for-invite-tokens")
    }

    fn invite() -> Invite {
        Invite::new(
            "new.teacher@school.edu".to_string(),
            InviteRole::Teacher,
            Uuid::new_v4(),
            7,
        )
    }

    #[test]
    fn round_trip_reproduces_claims() {
        let codec = codec();
        let invite = invite();

        let token = codec.encode(&invite).unwrap();
        let claims = codec.decode(&token).unwrap();

        assert_eq!(claims.sub, invite.invite_id);
        assert_eq!(claims.email, invite.email);
        assert_eq!(claims.role, InviteRole::Teacher);
        assert_eq!(claims.exp, invite.expiry_utc.timestamp());
    }

    #[test]
    fn corrupted_token_is_invalid() {
        let codec = codec();
        let token = codec.encode(&invite()).unwrap();

        // Flip one character in the payload section.
        let mut bytes = token.into_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] = if bytes[mid] == b'A' { b'B' } else { b'A' };
        let corrupted = String::from_utf8(bytes).unwrap();

        assert!(matches!(
            codec.decode(&corrupted),
            Err(ServiceError::InvalidToken)
        ));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = codec().encode(&invite()).unwrap();
        let other = InviteTokenService::new("a-different-secret");

        assert!(matches!(
            other.decode(&token),
            Err(ServiceError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_reported_as_expired_not_invalid() {
        let codec = codec();
        let mut invite = invite();
        invite.expiry_utc = Utc::now() - Duration::hours(1);

        let token = codec.encode(&invite).unwrap();
        assert!(matches!(
            codec.decode(&token),
            Err(ServiceError::TokenExpired)
        ));
    }
}

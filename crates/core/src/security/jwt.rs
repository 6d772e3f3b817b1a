use crate::{config::TokenConfig, error::ErrorCode, error::Result, types::TokenClaims, Error};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

const CURRENT_TOKEN_VERSION: u8 = 1;

/// Versioned, MAC-signed token codec (§4.3, §6.2). `encode` is
/// deterministic given its inputs (HMAC is deterministic over a fixed
/// key); `decode` rejects any tampering because the signature covers
/// every claim, including the fingerprint.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenCodec {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.signing_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.signing_secret.as_bytes()),
        }
    }

    /// Encode a session into a signed token string. Callers build
    /// [`TokenClaims`] with `version = CURRENT_TOKEN_VERSION`.
    pub fn encode(&self, claims: &TokenClaims) -> Result<String> {
        let header = Header::new(Algorithm::HS512);
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| Error::new(ErrorCode::BadToken, format!("failed to encode token: {e}")))
    }

    /// Decode and verify a token. Fails `BadToken` on a bad MAC,
    /// malformed structure, or unrecognized version; fails `ExpiredToken`
    /// when the signature is valid but `expires_at` has passed.
    pub fn decode(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.validate_exp = true;
        // exp is carried as `expires_at`, not the registered `exp` claim;
        // jsonwebtoken only auto-validates `exp`/`nbf` when present under
        // those names, so disable its built-in exp check and do it below.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => Error::new(ErrorCode::ExpiredToken, "token expired"),
                _ => Error::new(ErrorCode::BadToken, format!("invalid token: {e}")),
            }
        })?;

        let claims = token_data.claims;
        if claims.version != CURRENT_TOKEN_VERSION {
            return Err(Error::new(ErrorCode::BadToken, "unrecognized token version"));
        }

        let now = chrono::Utc::now().timestamp();
        if claims.expires_at <= now {
            return Err(Error::new(ErrorCode::ExpiredToken, "token expired"));
        }

        Ok(claims)
    }

    pub fn current_version() -> u8 {
        CURRENT_TOKEN_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionId, TenantId, UserId};

    fn codec() -> TokenCodec {
        TokenCodec::new(&TokenConfig {
            signing_secret: "a-test-secret-at-least-32-bytes-long".to_string(),
            access_ttl_seconds: 900,
        })
    }

    fn sample_claims() -> TokenClaims {
        TokenClaims {
            version: TokenCodec::current_version(),
            session_id: SessionId::new(),
            user_id: UserId::new(),
            tenant_id: TenantId::new(),
            roles: vec!["analyst".to_string()],
            issued_at: chrono::Utc::now().timestamp(),
            expires_at: chrono::Utc::now().timestamp() + 900,
            fingerprint: "fp-1".to_string(),
        }
    }

    #[test]
    fn round_trips_valid_token() {
        let codec = codec();
        let claims = sample_claims();
        let token = codec.encode(&claims).unwrap();
        let decoded = codec.decode(&token).unwrap();
        assert_eq!(decoded.session_id, claims.session_id);
        assert_eq!(decoded.fingerprint, claims.fingerprint);
    }

    #[test]
    fn encode_is_deterministic() {
        let codec = codec();
        let claims = sample_claims();
        assert_eq!(codec.encode(&claims).unwrap(), codec.encode(&claims).unwrap());
    }

    #[test]
    fn tampered_payload_rejects() {
        let codec = codec();
        let token = codec.encode(&sample_claims()).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let tampered_payload = format!("{}AA", parts[1]);
        parts[1] = &tampered_payload;
        let tampered = parts.join(".");
        assert!(codec.decode(&tampered).is_err());
    }

    #[test]
    fn expired_token_reports_expired_not_bad() {
        let codec = codec();
        let mut claims = sample_claims();
        claims.expires_at = chrono::Utc::now().timestamp() - 10;
        let token = codec.encode(&claims).unwrap();
        let err = codec.decode(&token).unwrap_err();
        assert_eq!(err.code, ErrorCode::ExpiredToken);
    }
}

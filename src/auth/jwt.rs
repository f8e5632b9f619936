//! Token service: stateless HS256 tokens for sessions and email verification.

use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

pub use super::claims::{Claims, TokenKind};
use crate::{config::JwtConfig, state::AppState};

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error)]
pub enum TokenError {
    /// Bad signature, malformed payload, wrong kind or expired. Deliberately
    /// a single variant.
    #[error("invalid token")]
    Invalid,

    #[error("failed to sign token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    verify_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::new(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs(cfg.ttl_minutes.max(0) as u64 * 60),
            verify_ttl: Duration::from_secs(cfg.verify_ttl_hours.max(0) as u64 * 3600),
        }
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Verify => self.verify_ttl,
        }
    }

    pub fn issue_at(
        &self,
        subject: &str,
        kind: TokenKind,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let exp = now + TimeDuration::seconds(self.ttl(kind).as_secs() as i64);
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)?;
        debug!(kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn issue_access_token(&self, subject: &str) -> Result<String, TokenError> {
        self.issue_at(subject, TokenKind::Access, OffsetDateTime::now_utc())
    }

    pub fn issue_verification_token(&self, subject: &str) -> Result<String, TokenError> {
        self.issue_at(subject, TokenKind::Verify, OffsetDateTime::now_utc())
    }

    /// Signature, issuer and audience first, then expiry against `now` with no leeway.
    pub fn decode_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| {
                debug!(error = %e, "jwt rejected");
                TokenError::Invalid
            })?
            .claims;

        if claims.exp <= now.unix_timestamp() {
            debug!(kind = ?claims.kind, "jwt expired");
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }

    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode_at(token, OffsetDateTime::now_utc())
    }

    /// `decode` that also insists on the token kind.
    pub fn decode_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.decode(token)?;
        if claims.kind != kind {
            debug!(expected = ?kind, got = ?claims.kind, "jwt kind mismatch");
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }
}

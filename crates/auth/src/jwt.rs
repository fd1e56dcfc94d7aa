//! Bearer token verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Verifies a raw bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HS256 shared-secret validator.
///
/// The token carries `issued_at`/`expires_at` as RFC 3339 timestamps rather
/// than the registered `iat`/`exp` claims, so the time window is checked by
/// [`validate_claims`] against the caller-supplied `now`.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header, encode};

    use dentaflow_core::ClinicId;

    use crate::{PrincipalId, Role};

    fn mint(secret: &str, ttl: Duration) -> (String, JwtClaims) {
        let now = Utc::now();
        let claims = JwtClaims {
            sub: PrincipalId::new(),
            clinic_id: ClinicId::new(),
            roles: vec![Role::new("doctor")],
            issued_at: now,
            expires_at: now + ttl,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (token, claims)
    }

    #[test]
    fn round_trips_claims_signed_with_same_secret() {
        let (token, claims) = mint("s3cret", Duration::minutes(5));
        let v = Hs256JwtValidator::new("s3cret");
        assert_eq!(v.validate(&token, Utc::now()).unwrap(), claims);
    }

    #[test]
    fn rejects_wrong_secret() {
        let (token, _) = mint("s3cret", Duration::minutes(5));
        let v = Hs256JwtValidator::new("other");
        assert!(matches!(
            v.validate(&token, Utc::now()),
            Err(TokenValidationError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let (token, _) = mint("s3cret", Duration::minutes(5));
        let v = Hs256JwtValidator::new("s3cret");
        let later = Utc::now() + Duration::minutes(6);
        assert_eq!(v.validate(&token, later), Err(TokenValidationError::Expired));
    }
}

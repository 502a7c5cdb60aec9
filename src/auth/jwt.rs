use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::AppError;

use super::Claims;

/// Validates the session JWT a client presents when asking for a
/// connection ticket. The ticket itself is a separate credential.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))
    }

    /// Validate an `Authorization` header value, accepting only the
    /// `Bearer <token>` form.
    pub fn validate_bearer(&self, header: Option<&str>) -> Result<Claims, AppError> {
        let header = header.ok_or_else(|| AppError::Auth("Missing authorization".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Auth("Expected bearer token".to_string()))?;
        self.validate(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            issuer: None,
            audience: None,
        }
    }

    fn mint(claims: &Claims, secret: &str) -> String {
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&Header::default(), claims, &key).unwrap()
    }

    fn session_claims() -> Claims {
        Claims {
            sub: "user-123".to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
            roles: vec!["player".to_string()],
            name: Some("Ada".to_string()),
            extra: Default::default(),
        }
    }

    #[test]
    fn test_valid_token() {
        let config = test_config();
        let validator = JwtValidator::new(&config);

        let token = mint(&session_claims(), &config.secret);
        let claims = validator.validate(&token).unwrap();
        assert_eq!(claims.sub, "user-123");
        assert_eq!(claims.display_name(), "Ada");
    }

    #[test]
    fn test_invalid_token() {
        let validator = JwtValidator::new(&test_config());
        assert!(validator.validate("invalid-token").is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let validator = JwtValidator::new(&test_config());
        let token = mint(&session_claims(), "a-different-secret");
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_bearer_header() {
        let config = test_config();
        let validator = JwtValidator::new(&config);
        let token = mint(&session_claims(), &config.secret);

        let claims = validator
            .validate_bearer(Some(&format!("Bearer {}", token)))
            .unwrap();
        assert_eq!(claims.sub, "user-123");

        assert!(validator.validate_bearer(None).is_err());
        assert!(validator.validate_bearer(Some(&token)).is_err());
    }
}

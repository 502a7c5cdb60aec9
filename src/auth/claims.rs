use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Session claims carried by the JWT presented to `/auth/ticket`.
///
/// Sessions are minted elsewhere; this crate only reads them. Claims it
/// does not know about are preserved in `extra` so validation stays
/// compatible with whatever the session service adds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user id
    pub sub: String,
    /// Expiry, seconds since the epoch
    pub exp: i64,
    /// Issue time, seconds since the epoch
    pub iat: i64,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Display name, when the session carries one
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Display name, falling back to the subject id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(name: Option<&str>) -> Claims {
        Claims {
            sub: "user-123".to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
            roles: vec!["player".to_string()],
            name: name.map(String::from),
            extra: Default::default(),
        }
    }

    #[test]
    fn test_display_name_falls_back_to_sub() {
        assert_eq!(claims(Some("Ada")).display_name(), "Ada");
        assert_eq!(claims(None).display_name(), "user-123");
    }

    #[test]
    fn test_unknown_claims_survive_in_extra() {
        let raw = r#"{
            "sub": "user-9",
            "exp": 4102444800,
            "iat": 1735689600,
            "sessionVersion": 3
        }"#;
        let parsed: Claims = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.sub, "user-9");
        assert!(parsed.roles.is_empty());
        assert_eq!(
            parsed.extra.get("sessionVersion"),
            Some(&serde_json::json!(3))
        );
    }
}

//! Input and output types for the auth flows.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of client driving the flow. The engine is channel-agnostic; the
/// caller uses this to decide how to deliver the refresh token (cookie for
/// web, response body for mobile).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Web,
    Mobile,
}

/// Per-request client metadata the caller extracted from the transport.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Opaque captcha proof, consulted only when the per-email
    /// registration quota is exhausted.
    pub captcha_token: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub client_type: ClientType,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub client_type: ClientType,
}

/// Token pair handed back by register, login, and refresh.
#[derive(Clone, Debug, Serialize)]
pub struct IssuedSession {
    pub user_id: Uuid,
    pub access_token: String,
    /// Raw opaque token. This is the only time it exists outside the
    /// caller's hands; storage keeps a digest.
    pub refresh_token: String,
}

/// Profile view returned by the `me` flow.
#[derive(Clone, Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub is_email_verified: bool,
    pub created_at_unix: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn register_input_defaults_client_type() -> Result<()> {
        let input: RegisterInput =
            serde_json::from_str(r#"{"email":"a@x.com","password":"longenough1"}"#)?;
        assert_eq!(input.client_type, ClientType::Web);
        Ok(())
    }

    #[test]
    fn client_type_uses_lowercase_wire_form() -> Result<()> {
        let input: LoginInput = serde_json::from_str(
            r#"{"email":"a@x.com","password":"longenough1","client_type":"mobile"}"#,
        )?;
        assert_eq!(input.client_type, ClientType::Mobile);
        Ok(())
    }

    #[test]
    fn issued_session_serializes_all_fields() -> Result<()> {
        let issued = IssuedSession {
            user_id: Uuid::nil(),
            access_token: "jwt".to_string(),
            refresh_token: "opaque".to_string(),
        };
        let value: serde_json::Value = serde_json::to_value(&issued)?;
        assert_eq!(value["access_token"], "jwt");
        assert_eq!(value["refresh_token"], "opaque");
        Ok(())
    }
}

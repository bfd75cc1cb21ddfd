//! Client protocol messages
//!
//! Every frame is a JSON text message discriminated by its `type` field.
//! Job results are not modelled here: the bus payload is already the final
//! JSON and is forwarded to the socket verbatim.

use serde::{Deserialize, Serialize};

pub const WELCOME_MESSAGE: &str = "Connected to Websocket!";
pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed. Please check your credentials.";
pub const SERVER_ERROR_MESSAGE: &str = "A server error occurred. Please try again later.";

/// Messages the server sends on its own behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Welcome {
        message: String,
    },
    Auth {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn welcome() -> Self {
        Self::Welcome {
            message: WELCOME_MESSAGE.to_string(),
        }
    }

    pub fn auth_ok() -> Self {
        Self::Auth {
            success: true,
            message: None,
        }
    }

    pub fn auth_failed() -> Self {
        Self::Auth {
            success: false,
            message: Some(AUTH_FAILED_MESSAGE.to_string()),
        }
    }

    pub fn server_error() -> Self {
        Self::Error {
            message: SERVER_ERROR_MESSAGE.to_string(),
        }
    }

    /// Encode as a JSON text payload
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages a client may send
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Bind this connection to the user the token belongs to
    Join {
        #[serde(default, rename = "accessToken")]
        access_token: Option<String>,
        #[serde(default, rename = "refreshToken")]
        refresh_token: Option<String>,
    },
    /// Anything else is accepted and ignored
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_messages_wire_shape() {
        let welcome: serde_json::Value =
            serde_json::from_str(&ServerMessage::welcome().to_text().unwrap()).unwrap();
        assert_eq!(
            welcome,
            json!({ "type": "welcome", "message": "Connected to Websocket!" })
        );

        let ok = serde_json::to_value(ServerMessage::auth_ok()).unwrap();
        assert_eq!(ok, json!({ "type": "auth", "success": true }));

        let failed = serde_json::to_value(ServerMessage::auth_failed()).unwrap();
        assert_eq!(
            failed,
            json!({
                "type": "auth",
                "success": false,
                "message": "Authentication failed. Please check your credentials."
            })
        );

        let error = serde_json::to_value(ServerMessage::server_error()).unwrap();
        assert_eq!(
            error,
            json!({
                "type": "error",
                "message": "A server error occurred. Please try again later."
            })
        );
    }

    #[test]
    fn test_parse_join() {
        let msg = ClientMessage::parse(r#"{"type":"join","accessToken":"abc"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                access_token: Some("abc".into()),
                refresh_token: None,
            }
        );
    }

    #[test]
    fn test_unknown_type_is_ignored_not_rejected() {
        let msg = ClientMessage::parse(r#"{"type":"typing"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
    }

    #[test]
    fn test_non_json_is_rejected() {
        assert!(ClientMessage::parse("hello").is_err());
    }
}

//! Wire models for the Mailosaur servers API.

use serde::{Deserialize, Serialize};

/// A Mailosaur virtual server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Unique identifier, assigned by Mailosaur.
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Users with access to the server.
    #[serde(default)]
    pub users: Vec<String>,
    /// Number of messages currently held.
    #[serde(default)]
    pub messages: i64,
}

/// Body of a create-server request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCreateOptions {
    /// Name of the new server.
    pub name: String,
}

impl ServerCreateOptions {
    /// Options for a server with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PasswordResponse {
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_tolerates_missing_fields() {
        let server: Server = serde_json::from_value(json!({"id": "abc", "name": "one"})).unwrap();
        assert_eq!(server.id, "abc");
        assert!(server.users.is_empty());
        assert_eq!(server.messages, 0);
    }

    #[test]
    fn test_server_round_trips_users() {
        let server: Server = serde_json::from_value(json!({
            "id": "abc",
            "name": "one",
            "users": ["u1"],
            "messages": 4,
        }))
        .unwrap();
        let json = serde_json::to_value(&server).unwrap();
        assert_eq!(json["users"], json!(["u1"]));
        assert_eq!(json["messages"], 4);
    }
}

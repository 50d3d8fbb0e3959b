//! Socket server protocol message types
//!
//! Defines the JSON message format for client-server communication.
//! File events are not wrapped: they go out as the bare
//! [`FileEvent`](crate::server::FileEvent) payload.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Client-to-server message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Query the server
    Query {
        id: u64,
        method: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    /// Ping to check connection
    Ping,
}

/// Server-to-client message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection established
    Connected(ConnectionInfo),
    /// Query response
    Response {
        id: u64,
        result: serde_json::Value,
    },
    /// Error response
    Error {
        id: Option<u64>,
        code: String,
        message: String,
    },
    /// Pong response
    Pong,
}

/// Connection info returned after the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub client_id: String,
    pub user_id: String,
    pub root: PathBuf,
}

/// Params for `list_files`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilesParams {
    #[serde(default)]
    pub path: String,
}

/// Params for `read_file`
#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileParams {
    pub path: String,
    /// Return base64 bytes and a MIME type instead of UTF-8 text
    #[serde(default)]
    pub raw: bool,
}

/// Params for `write_file`
#[derive(Debug, Clone, Deserialize)]
pub struct WriteFileParams {
    pub path: String,
    pub content: String,
}

/// Params for `delete_file`
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteFileParams {
    pub path: String,
}

/// Params for `upload_files`
#[derive(Debug, Clone, Deserialize)]
pub struct UploadFilesParams {
    /// Target directory, relative to the workspace root
    #[serde(default)]
    pub path: String,
    pub files: Vec<UploadedFile>,
}

/// One file in an `upload_files` request
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub content_base64: String,
}

/// Entry returned by `list_files`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified: f64,
    pub extension: Option<String>,
}

/// Kind of a listed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    File,
    Directory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parse() {
        let json = r#"{"type":"query","id":3,"method":"list_files","params":{"path":"docs"}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Query { id, method, params } => {
                assert_eq!(id, 3);
                assert_eq!(method, "list_files");
                let params: ListFilesParams = serde_json::from_value(params).unwrap();
                assert_eq!(params.path, "docs");
            }
            _ => panic!("Expected Query message"),
        }

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientMessage::Ping));
    }

    #[test]
    fn test_query_params_default() {
        let json = r#"{"type":"query","id":1,"method":"whoami"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Query { params, .. } if params.is_null()));

        let read: ReadFileParams = serde_json::from_str(r#"{"path":"a.txt"}"#).unwrap();
        assert!(!read.raw);
    }

    #[test]
    fn test_server_message_shape() {
        let msg = ServerMessage::Error {
            id: Some(4),
            code: "path_traversal".to_string(),
            message: "nope".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["id"], 4);
        assert_eq!(value["code"], "path_traversal");

        let connected = ServerMessage::Connected(ConnectionInfo {
            client_id: "cli_1".to_string(),
            user_id: "alice".to_string(),
            root: PathBuf::from("/ws/alice"),
        });
        let value = serde_json::to_value(&connected).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["user_id"], "alice");
    }

    #[test]
    fn test_file_entry_serialization() {
        let entry = FileEntry {
            name: "docs".to_string(),
            path: "docs".to_string(),
            entry_type: EntryType::Directory,
            size: 0,
            modified: 1.5,
            extension: None,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "directory");
        assert!(value["extension"].is_null());
    }
}

//! Push-channel wire messages. Every message is a JSON object tagged by `type`.

use novel_dl_core::TaskStatus;
use novel_dl_db::Task;
use serde::{Deserialize, Serialize};

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RequestAuth {
        message: String,
    },
    AuthResponse {
        success: bool,
        message: String,
    },
    TaskUpdate {
        task_id: i64,
        owner_id: i64,
        state: TaskStatus,
        progress: i64,
        message: Option<String>,
        timestamp: String,
    },
    TaskDeleted {
        task_id: i64,
        owner_id: i64,
        timestamp: String,
    },
}

impl ServerMessage {
    pub fn request_auth() -> Self {
        ServerMessage::RequestAuth {
            message: "Please authenticate with your JWT token.".to_string(),
        }
    }

    pub fn auth_response(success: bool, message: impl Into<String>) -> Self {
        ServerMessage::AuthResponse {
            success,
            message: message.into(),
        }
    }

    pub fn task_update(task: &Task) -> Self {
        ServerMessage::TaskUpdate {
            task_id: task.id,
            owner_id: task.owner_id,
            state: task.status,
            progress: task.progress,
            message: task.message.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn task_deleted(task_id: i64, owner_id: i64) -> Self {
        ServerMessage::TaskDeleted {
            task_id,
            owner_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Client to server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        #[serde(default)]
        token: String,
    },
}

//! 记忆层：对话消息、地点地图、配方表、对话日志

pub mod chat_log;
pub mod conversation;
pub mod locations;
pub mod recipes;

use std::path::PathBuf;

use thiserror::Error;

pub use chat_log::ChatLog;
pub use conversation::{render_transcript, Message, Role};
pub use locations::{LocationDescriptor, LocationStore};
pub use recipes::RecipeBook;

/// 持久化读写失败
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

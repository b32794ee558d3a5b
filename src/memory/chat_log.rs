//! 对话日志：每个会话一个以启动时间命名的文本文件

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::memory::Message;

/// 追加式对话日志；写入失败只记录 warn，不影响回合
#[derive(Debug)]
pub struct ChatLog {
    path: Option<PathBuf>,
    lock: Mutex<()>,
}

impl ChatLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let path = match std::fs::create_dir_all(dir) {
            Ok(()) => Some(dir.join(format!(
                "{}.txt",
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            ))),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "Chat log disabled: {}", e);
                None
            }
        };
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// 不写文件的日志（测试用）
    pub fn disabled() -> Self {
        Self {
            path: None,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn append(&self, message: &Message) {
        let Some(path) = &self.path else {
            return;
        };
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| {
                write!(
                    f,
                    "\n\n[Time] {} {}\n{}",
                    chrono::Local::now().to_rfc3339(),
                    message.role.as_str(),
                    message.content
                )
            });
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), "Chat log write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_writes_role_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::new(dir.path().join("chat_log"));
        log.append(&Message::user("chop the tree"));
        log.append(&Message::assistant("<do>Action(CHOP, -, -, -, -) = 1</do>"));

        let text = std::fs::read_to_string(log.path().unwrap()).unwrap();
        assert!(text.contains("user\nchop the tree"));
        assert!(text.contains("assistant\n<do>"));
    }

    #[test]
    fn test_disabled_log_is_noop() {
        let log = ChatLog::disabled();
        log.append(&Message::user("ignored"));
        assert!(log.path().is_none());
    }
}

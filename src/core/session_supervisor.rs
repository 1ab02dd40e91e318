//! 会话监管：中断管理
//!
//! 根 CancellationToken 代表整个会话；每轮用户输入派生一个子 token。
//! Ctrl+C 只取消当前轮，退出时取消根 token。

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// 可克隆的句柄：前端的 Ctrl+C 监听与编排循环共享
#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    root: CancellationToken,
    current: Arc<Mutex<CancellationToken>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let current = Arc::new(Mutex::new(root.child_token()));
        Self { root, current }
    }

    /// 开始新一轮：换一个新的子 token
    pub fn begin_turn(&self) -> CancellationToken {
        let token = self.root.child_token();
        if let Ok(mut current) = self.current.lock() {
            *current = token.clone();
        }
        token
    }

    /// 取消当前轮（用户 Ctrl+C）
    pub fn cancel(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }

    /// 结束整个会话
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

//! 编排循环状态
//!
//! 当前状态存放在 watch 通道里；每次切换发出 StateChanged 事件，前端从事件通道观察。

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::core::AgentEvent;

/// 编排循环的状态机
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    AwaitingModel,
    ExecutingTools,
    AwaitingConfirmation,
    Compacting,
    Terminated,
}

impl LoopState {
    pub fn label(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::AwaitingModel => "awaiting model",
            LoopState::ExecutingTools => "executing tools",
            LoopState::AwaitingConfirmation => "awaiting confirmation",
            LoopState::Compacting => "compacting",
            LoopState::Terminated => "terminated",
        }
    }
}

/// 事件出口：可选的事件通道 + 状态 watch
#[derive(Debug)]
pub struct EventSink {
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    state: watch::Sender<LoopState>,
}

impl EventSink {
    pub fn new(events: Option<mpsc::UnboundedSender<AgentEvent>>) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self { events, state }
    }

    pub fn send(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn set_state(&self, next: LoopState) {
        let prev = *self.state.borrow();
        if prev == next {
            return;
        }
        tracing::debug!(from = prev.label(), to = next.label(), "state transition");
        self.state.send_replace(next);
        self.send(AgentEvent::StateChanged { state: next });
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }
}

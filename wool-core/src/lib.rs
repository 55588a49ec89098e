//! # WOOL Core
//!
//! WOOL 对话脚本语言的核心库：解析 `.wool` 文件、执行节点、管理变量与会话。
//!
//! ## 架构概述
//!
//! `wool-core` 是纯逻辑核心，不依赖任何 IO。
//! 客户端（聊天界面、命令行等）通过 **回复驱动模式** 与对话交互：
//!
//! ```text
//! Client                         DialogueSession
//!   │                              │
//!   │──── start(dialogue) ───────►│
//!   │◄─── Node（已执行） ──────────│
//!   │──── progress(reply_id) ────►│ set / action
//!   │◄─── Progress { actions, node } ──│
//!   │                              │
//! ```
//!
//! ## 核心类型
//!
//! - [`Dialogue`] / [`Project`]：解析后的对话与对话集合
//! - [`VariableStore`]：一个用户的变量存储，变更时通知监听者
//! - [`ActiveDialogue`]：单个对话的执行状态机
//! - [`DialogueSession`]：跨对话的会话，记录 [`InteractionLog`]
//! - [`ClientMessage`]：发送给客户端的节点内容
//!
//! ## 使用示例
//!
//! ```ignore
//! use std::sync::Arc;
//! use wool_core::{ClientMessage, DialogueSession, VariableStore, event_time_now, parse_project};
//!
//! let project = parse_project([("intro", text)])?;
//! let store = Arc::new(VariableStore::new());
//! let mut session = DialogueSession::new(&project, store);
//!
//! let mut node = session.start("intro", None, event_time_now(0))?;
//! loop {
//!     let message = ClientMessage::from_node(&node);
//!     if message.is_final() {
//!         break;
//!     }
//!     let reply_id = ask_user(&message);
//!     match session.progress(reply_id, event_time_now(0))?.node {
//!         Some(next) => node = next,
//!         None => break,
//!     }
//! }
//! ```
//!
//! ## 模块结构
//!
//! - [`script`]：AST、表达式与解析器
//! - [`value`]：变量值
//! - [`store`]：变量存储
//! - [`runtime`]：执行器、对话状态机与会话
//! - [`interaction`]：交互记录
//! - [`message`]：客户端消息
//! - [`diagnostic`]：静态检查
//! - [`error`]：错误类型定义

pub mod diagnostic;
pub mod error;
pub mod interaction;
pub mod message;
pub mod runtime;
pub mod script;
pub mod store;
pub mod value;

// 重导出核心类型
pub use diagnostic::{
    Diagnostic, DiagnosticLevel, DiagnosticResult, analyze_dialogue, analyze_project,
    from_parse_errors, from_project_errors,
};
pub use error::{ParseError, ParseErrors, ProjectErrors, RuntimeError, WoolError, WoolResult};
pub use interaction::{
    DialogueOutcome, Interaction, InteractionLog, InteractionSource, LoggedDialogue,
};
pub use message::{ClientMessage, MessageReply, MessageSegment};
pub use runtime::{
    AUTO_FORWARD_STATEMENT, ActiveDialogue, DialogueSession, DialogueState, Executor, Progress,
    SelectedReply,
};
pub use script::{
    Dialogue, EvalContext, EvalError, Node, NodeBody, NodePointer, Parser, Project, parse_project,
};
pub use store::{
    ChangeSource, EventTime, ListenerHandle, StoreChange, StoreListener, VariableStore,
    WriteOptions, event_time_now,
};
pub use value::Value;

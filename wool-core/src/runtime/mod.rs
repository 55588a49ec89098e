//! # Runtime 模块
//!
//! 对话执行引擎，负责节点执行、回复处理和会话管理。
//!
//! ## 模块结构
//!
//! - [`executor`]：把 AST 正文执行为只含文本与客户端命令的正文
//! - [`engine`]：单个对话的执行状态机
//! - [`session`]：跨对话的会话与交互记录

pub mod engine;
pub mod executor;
pub mod session;

pub use engine::{AUTO_FORWARD_STATEMENT, ActiveDialogue, DialogueState, SelectedReply};
pub use executor::{Executor, user_statement};
pub use session::{DialogueSession, Progress};

//! # AST 模块
//!
//! 定义 WOOL 对话的语法树：项目 → 对话 → 节点 → 正文 → 片段/回复 → 命令。
//!
//! ## 设计说明
//!
//! AST 是解析器的输出，解析完成后不再修改，可在多个会话间共享。
//! 执行引擎读取 AST，产生只含已解析文本和客户端命令的新正文。
//!
//! 所有类型都实现 `Display`，输出可重新解析的 WOOL 源码。
//!
//! ## 模块结构
//!
//! - [`vstring`]：插值字符串
//! - [`pointer`]：节点指针
//! - [`command`]：命令（action/if/random/set/input）
//! - [`input`]：输入命令的各个子类型
//! - [`body`]：节点正文与回复
//! - [`node`]：节点与头部
//! - [`dialogue`]：对话
//! - [`project`]：一组对话

pub mod body;
pub mod command;
pub mod dialogue;
pub mod input;
pub mod node;
pub mod pointer;
pub mod project;
pub mod vstring;

pub use body::{NodeBody, Reply, Segment};
pub use command::{
    ActionCommand, ActionType, Command, IfClause, IfCommand, RandomClause, RandomCommand,
    SetCommand,
};
pub use dialogue::{Dialogue, DialogueSummary, START_NODE};
pub use input::{
    EmailInput, InputCommand, NumericInput, SetInput, SetOption, TIME_NOW, TextInput, TimeInput,
    evaluate_time,
};
pub use node::{Node, NodeHeader};
pub use pointer::{END_NODE, NodePointer};
pub use project::Project;
pub use vstring::{StringSegment, VariableString};

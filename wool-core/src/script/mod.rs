//! # Script 模块
//!
//! WOOL 对话脚本：AST 定义、表达式与解析器实现。
//!
//! ## 模块结构
//!
//! - [`ast`]：对话语法树定义
//! - [`expr`]：表达式树与求值
//! - [`parser`]：分词器与各级解析器

pub mod ast;
pub mod expr;
pub mod parser;

pub use ast::*;
pub use expr::{EvalContext, EvalError, Expr, evaluate, evaluate_to_bool};
pub use parser::{Parser, parse_project};

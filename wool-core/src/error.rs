//! # Error 模块
//!
//! 定义 wool-core 中使用的错误类型。
//!
//! - [`ParseError`] / [`ParseErrors`]：解析阶段收集的错误，整份文件一次性报告
//! - [`ProjectErrors`]：项目中各个对话的解析错误
//! - [`RuntimeError`]：执行阶段的错误（节点/回复/对话未找到、表达式求值失败等）
//! - [`WoolError`]：统一错误类型

use std::collections::BTreeMap;

use thiserror::Error;

use crate::script::expr::EvalError;

/// 解析错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// 带源码位置的语法错误
    #[error("第 {line} 行第 {column} 列：{message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// 某个节点内的错误
    #[error("节点 {node} 出错：{error}")]
    Node {
        node: String,
        error: Box<ParseError>,
    },

    /// 无效的对话名
    #[error("无效的对话名：{name}")]
    InvalidDialogueName { name: String },

    /// 外部节点指针指向项目中不存在的对话
    #[error("对话 {dialogue} 中的外部节点指针指向未知对话 {referenced}")]
    UnknownDialogue { dialogue: String, referenced: String },
}

impl ParseError {
    /// 创建语法错误
    pub fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    /// 用节点标题包装错误
    ///
    /// 标题未知（例如头部尚未读到 `title`）时原样返回。
    pub fn in_node(self, node: Option<&str>) -> Self {
        match node {
            Some(node) => Self::Node {
                node: node.to_string(),
                error: Box::new(self),
            },
            None => self,
        }
    }

    /// 错误所在行号（若有）
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Syntax { line, .. } => Some(*line),
            Self::Node { error, .. } => error.line(),
            _ => None,
        }
    }

    /// 错误所在列号（若有）
    pub fn column(&self) -> Option<usize> {
        match self {
            Self::Syntax { column, .. } => Some(*column),
            Self::Node { error, .. } => error.column(),
            _ => None,
        }
    }

    /// 错误所属节点标题（若有）
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::Node { node, .. } => Some(node),
            _ => None,
        }
    }

    /// 不含位置与节点前缀的错误描述
    pub fn message(&self) -> String {
        match self {
            Self::Syntax { message, .. } => message.clone(),
            Self::Node { error, .. } => error.message(),
            other => other.to_string(),
        }
    }
}

/// 一次解析收集到的全部错误
#[derive(Error, Debug, Clone, PartialEq, Default)]
#[error("解析失败，共 {} 个错误", .0.len())]
pub struct ParseErrors(pub Vec<ParseError>);

impl ParseErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: ParseError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: ParseErrors) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParseError> {
        self.0.iter()
    }

    /// 是否包含消息中带有指定片段的错误
    pub fn contains_message(&self, fragment: &str) -> bool {
        self.0.iter().any(|e| e.message().contains(fragment))
    }
}

impl From<ParseError> for ParseErrors {
    fn from(error: ParseError) -> Self {
        Self(vec![error])
    }
}

impl<'a> IntoIterator for &'a ParseErrors {
    type Item = &'a ParseError;
    type IntoIter = std::slice::Iter<'a, ParseError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for ParseErrors {
    type Item = ParseError;
    type IntoIter = std::vec::IntoIter<ParseError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// 项目解析错误，按对话名分组
#[derive(Error, Debug, Clone, PartialEq, Default)]
#[error("项目解析失败，{} 个对话存在错误", .0.len())]
pub struct ProjectErrors(pub BTreeMap<String, ParseErrors>);

impl ProjectErrors {
    pub fn push(&mut self, dialogue: &str, error: ParseError) {
        self.0.entry(dialogue.to_string()).or_default().push(error);
    }

    pub fn extend(&mut self, dialogue: String, errors: ParseErrors) {
        self.0.entry(dialogue).or_default().extend(errors);
    }

    pub fn get(&self, dialogue: &str) -> Option<&ParseErrors> {
        self.0.get(dialogue)
    }

    /// 存在错误的对话数
    pub fn dialogue_count(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 按对话名遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParseErrors)> {
        self.0.iter().map(|(name, errors)| (name.as_str(), errors))
    }
}

/// 运行时错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// 节点未找到
    #[error("对话 '{dialogue}' 中未找到节点 '{node}'")]
    NodeNotFound { dialogue: String, node: String },

    /// 回复未找到
    #[error("节点 '{node}' 中未找到回复 {reply_id}")]
    ReplyNotFound { node: String, reply_id: u32 },

    /// 对话未找到
    #[error("对话 '{dialogue}' 未找到")]
    DialogueNotFound { dialogue: String },

    /// 表达式求值失败
    #[error("表达式求值失败: {0}")]
    Eval(#[from] EvalError),

    /// 状态不匹配
    #[error("当前状态不允许此操作：期望 {expected}，实际 {actual}")]
    StateMismatch { expected: String, actual: String },

    /// 外部节点指针只能由会话层处理
    #[error("外部节点指针 {dialogue}.{node} 无法在当前对话内继续")]
    ExternalPointer { dialogue: String, node: String },

    /// 无效的状态操作
    #[error("无效的状态操作: {message}")]
    InvalidState { message: String },
}

/// wool-core 统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WoolError {
    /// 解析错误
    #[error("{0}")]
    Parse(#[from] ParseErrors),

    /// 项目解析错误
    #[error("{0}")]
    Project(#[from] ProjectErrors),

    /// 运行时错误
    #[error("运行时错误: {0}")]
    Runtime(#[from] RuntimeError),
}

impl From<ParseError> for WoolError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error.into())
    }
}

impl From<EvalError> for WoolError {
    fn from(error: EvalError) -> Self {
        Self::Runtime(error.into())
    }
}

/// Result 类型别名
pub type WoolResult<T> = Result<T, WoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_wrapping_keeps_position() {
        let err = ParseError::syntax(3, 7, "Reply 未结束").in_node(Some("Start"));
        assert_eq!(err.line(), Some(3));
        assert_eq!(err.column(), Some(7));
        assert_eq!(err.node(), Some("Start"));
        assert_eq!(err.message(), "Reply 未结束");
        assert_eq!(err.to_string(), "节点 Start 出错：第 3 行第 7 列：Reply 未结束");
    }

    #[test]
    fn test_in_node_without_title_is_identity() {
        let err = ParseError::syntax(1, 1, "x");
        assert_eq!(err.clone().in_node(None), err);
    }

    #[test]
    fn test_parse_errors_display_and_search() {
        let mut errors = ParseErrors::new();
        errors.push(ParseError::syntax(1, 1, "缺少标题"));
        errors.push(ParseError::InvalidDialogueName {
            name: "a b".to_string(),
        });
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.to_string(), "解析失败，共 2 个错误");
        assert!(errors.contains_message("缺少标题"));
        assert!(errors.contains_message("无效的对话名"));
        assert!(!errors.contains_message("不存在"));
    }

    #[test]
    fn test_wool_error_conversions() {
        let err: WoolError = RuntimeError::DialogueNotFound {
            dialogue: "intro".to_string(),
        }
        .into();
        assert!(matches!(err, WoolError::Runtime(_)));

        let err: WoolError = ParseError::syntax(2, 1, "x").into();
        assert!(matches!(err, WoolError::Parse(ref e) if e.len() == 1));
    }
}

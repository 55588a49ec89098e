//! # 诊断模块
//!
//! 对话静态检查和诊断 API，不依赖 IO 或执行引擎。
//!
//! ## 设计原则
//!
//! - 纯函数 API，可在无 IO 环境下运行
//! - 诊断分级：Error（必须修复）、Warn（建议修复）、Info（信息提示）
//! - 复用 parser/AST，解析错误直接转换为诊断条目

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::error::{ParseErrors, ProjectErrors};
use crate::script::ast::{Dialogue, END_NODE, NodePointer, Project, START_NODE};

/// 诊断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    /// 信息提示
    Info,
    /// 警告（建议修复）
    Warn,
    /// 错误（必须修复）
    Error,
}

impl std::fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// 诊断条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    /// 对话名
    pub dialogue: String,
    /// 相关节点标题
    pub node: Option<String>,
    /// 行号（如果可定位，从 1 开始）
    pub line: Option<usize>,
    /// 列号（从 1 开始）
    pub column: Option<usize>,
    pub message: String,
    /// 诊断详情（可选）
    pub detail: Option<String>,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, dialogue: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            dialogue: dialogue.into(),
            node: None,
            line: None,
            column: None,
            message: message.into(),
            detail: None,
        }
    }

    /// 创建错误诊断
    pub fn error(dialogue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, dialogue, message)
    }

    /// 创建警告诊断
    pub fn warn(dialogue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warn, dialogue, message)
    }

    /// 创建信息诊断
    pub fn info(dialogue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Info, dialogue, message)
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// 设置行号与列号
    pub fn with_position(mut self, line: usize, column: Option<usize>) -> Self {
        self.line = Some(line);
        self.column = column;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.level, self.dialogue)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        if let Some(node) = &self.node {
            write!(f, " ({})", node)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\n  | {}", detail)?;
        }
        Ok(())
    }
}

/// 诊断结果
#[derive(Debug, Clone, Default)]
pub struct DiagnosticResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// 合并另一个结果
    pub fn merge(&mut self, other: DiagnosticResult) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn error_count(&self) -> usize {
        self.count(DiagnosticLevel::Error)
    }

    pub fn warn_count(&self) -> usize {
        self.count(DiagnosticLevel::Warn)
    }

    fn count(&self, level: DiagnosticLevel) -> usize {
        self.diagnostics.iter().filter(|d| d.level == level).count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// 按最低级别过滤
    pub fn filter_by_level(&self, min_level: DiagnosticLevel) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level >= min_level)
            .collect()
    }
}

/// 把一份对话的解析错误转换为诊断
pub fn from_parse_errors(dialogue: &str, errors: &ParseErrors) -> DiagnosticResult {
    let mut result = DiagnosticResult::new();
    for error in errors {
        let mut diag = Diagnostic::error(dialogue, error.message());
        if let Some(node) = error.node() {
            diag = diag.with_node(node);
        }
        if let Some(line) = error.line() {
            diag = diag.with_position(line, error.column());
        }
        result.push(diag);
    }
    result
}

/// 把项目解析错误转换为诊断
pub fn from_project_errors(errors: &ProjectErrors) -> DiagnosticResult {
    let mut result = DiagnosticResult::new();
    for (dialogue, errors) in errors.iter() {
        result.merge(from_parse_errors(dialogue, errors));
    }
    result
}

/// 分析单个对话
///
/// # 返回
///
/// - Warn：从 `Start` 出发无法到达的节点
/// - Info：外部节点指针引用的对话
/// - Info：只被读取、从未在对话中写入的变量（需要外部提供）
pub fn analyze_dialogue(dialogue: &Dialogue) -> DiagnosticResult {
    let mut result = structure(dialogue);
    let written = dialogue.variables_written();
    for name in dialogue.variables_needed().difference(&written) {
        result.push(
            Diagnostic::info(dialogue.name(), format!("变量 ${} 只被读取，需要外部提供", name))
                .with_detail("对话中没有 set 命令或 input 命令写入该变量"),
        );
    }
    result
}

/// 分析整个项目
///
/// 变量检查跨对话进行：在任一对话中写入的变量都不再报告。
pub fn analyze_project(project: &Project) -> DiagnosticResult {
    let mut result = DiagnosticResult::new();
    let mut needed: BTreeSet<(String, String)> = BTreeSet::new();
    let mut written = HashSet::new();
    for dialogue in project.dialogues() {
        result.merge(structure(dialogue));
        needed.extend(
            dialogue
                .variables_needed()
                .into_iter()
                .map(|name| (name, dialogue.name().to_string())),
        );
        written.extend(dialogue.variables_written());
    }

    let mut reported = HashSet::new();
    for (name, dialogue) in &needed {
        if !written.contains(name) && reported.insert(name) {
            result.push(Diagnostic::info(
                dialogue.as_str(),
                format!("变量 ${} 只被读取，需要外部提供", name),
            ));
        }
    }
    result
}

fn structure(dialogue: &Dialogue) -> DiagnosticResult {
    let mut result = DiagnosticResult::new();

    let reachable = reachable_nodes(dialogue);
    for node in dialogue.nodes() {
        if !reachable.contains(&node.title().to_lowercase()) {
            result.push(
                Diagnostic::warn(dialogue.name(), format!("节点 {} 无法从 Start 到达", node.title()))
                    .with_node(node.title()),
            );
        }
    }

    for referenced in dialogue.dialogues_referenced() {
        result.push(Diagnostic::info(
            dialogue.name(),
            format!("引用外部对话 /{}", referenced),
        ));
    }
    result
}

/// 从 `Start` 出发沿内部指针可到达的节点（小写标题）
fn reachable_nodes(dialogue: &Dialogue) -> HashSet<String> {
    let mut visited = HashSet::new();
    let Some(start) = dialogue.start_node() else {
        return visited;
    };
    visited.insert(START_NODE.to_lowercase());
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        for pointer in node.body.pointers() {
            let target = match &pointer {
                NodePointer::Internal(title) => title.as_str(),
                NodePointer::End => END_NODE,
                NodePointer::External { .. } => continue,
            };
            if visited.insert(target.to_lowercase()) {
                if let Some(next) = dialogue.node(target) {
                    queue.push_back(next);
                }
            }
        }
    }
    visited
}

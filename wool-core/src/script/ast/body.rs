//! # 节点正文
//!
//! 正文由有序的片段（文本或命令）和若干回复组成。
//!
//! ## 不变量
//!
//! - 相邻的文本片段在插入时合并，正文中不存在两个连续的文本片段
//! - 每个正文最多一个自动前进回复（没有陈述的回复）

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::command::Command;
use super::pointer::NodePointer;
use super::vstring::VariableString;

/// 正文片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    Text(VariableString),
    Command(Command),
}

/// 回复选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// 节点内唯一的 ID，解析时从 1 开始顺序分配
    pub id: u32,
    /// 用户陈述，`None` 表示自动前进
    pub statement: Option<NodeBody>,
    pub pointer: NodePointer,
    /// 选择该回复时执行的命令（只能是 `action` 或 `set`）
    pub commands: Vec<Command>,
}

impl Reply {
    pub fn is_auto_forward(&self) -> bool {
        self.statement.is_none()
    }

    pub fn collect_read_variables(&self, names: &mut BTreeSet<String>) {
        if let Some(statement) = &self.statement {
            statement.collect_read_variables(names);
        }
        for command in &self.commands {
            command.collect_read_variables(names);
        }
    }

    pub fn collect_write_variables(&self, names: &mut BTreeSet<String>) {
        if let Some(statement) = &self.statement {
            statement.collect_write_variables(names);
        }
        for command in &self.commands {
            command.collect_write_variables(names);
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[[")?;
        if let Some(statement) = &self.statement {
            write!(f, "{statement}|")?;
        }
        write!(f, "{}", self.pointer)?;
        if !self.commands.is_empty() {
            f.write_str("|")?;
            for command in &self.commands {
                write!(f, "{command}")?;
            }
        }
        f.write_str("]]")
    }
}

/// 节点正文
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeBody {
    segments: Vec<Segment>,
    replies: Vec<Reply>,
}

impl NodeBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只含一段纯文本的正文
    pub fn from_text(text: &str) -> Self {
        let mut body = Self::new();
        body.add_text(VariableString::from_text(text));
        body
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn replies(&self) -> &[Reply] {
        &self.replies
    }

    /// 没有任何片段和回复
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.replies.is_empty()
    }

    /// 追加片段，文本与前一个文本片段合并
    pub fn add_segment(&mut self, segment: Segment) {
        match (self.segments.last_mut(), segment) {
            (Some(Segment::Text(last)), Segment::Text(text)) => last.append(&text),
            (_, segment) => self.segments.push(segment),
        }
    }

    pub fn add_text(&mut self, text: VariableString) {
        self.add_segment(Segment::Text(text));
    }

    pub fn add_command(&mut self, command: Command) {
        self.add_segment(Segment::Command(command));
    }

    pub fn add_reply(&mut self, reply: Reply) {
        self.replies.push(reply);
    }

    /// 是否已有自动前进回复
    pub fn has_auto_forward_reply(&self) -> bool {
        self.replies.iter().any(Reply::is_auto_forward)
    }

    /// 按 ID 查找回复，先查本正文的回复，再查 `if`/`random` 子正文
    pub fn find_reply_by_id(&self, reply_id: u32) -> Option<&Reply> {
        self.replies
            .iter()
            .find(|reply| reply.id == reply_id)
            .or_else(|| {
                self.segments.iter().find_map(|segment| match segment {
                    Segment::Command(command) => command.find_reply_by_id(reply_id),
                    Segment::Text(_) => None,
                })
            })
    }

    /// 去除开头与末尾的空白文本
    pub fn trim_whitespace(&mut self) {
        while let Some(Segment::Text(text)) = self.segments.first_mut() {
            text.remove_leading_whitespace();
            if !text.is_empty() {
                break;
            }
            self.segments.remove(0);
        }
        while let Some(Segment::Text(text)) = self.segments.last_mut() {
            text.remove_trailing_whitespace();
            if !text.is_empty() {
                break;
            }
            self.segments.pop();
        }
    }

    /// 规范化已解析文本中的空白
    ///
    /// 连续的换行合并为一个，连续的空格与制表符合并为一个空格，去除每行首尾空白并删除空行。
    /// 一行可以跨越多个文本片段（中间隔着命令）。规范化后为空的文本片段被删除。
    ///
    /// 只能在所有变量都已替换后调用。
    ///
    /// # 参数
    ///
    /// - `trim`: 是否去除最后一个文本片段末尾的空白（只对节点顶层正文为 `true`）
    pub fn normalize_whitespace(&mut self, trim: bool) {
        let mut in_line = false;
        let mut last_text = None;
        let mut kept = Vec::with_capacity(self.segments.len());
        for segment in self.segments.drain(..) {
            let text = match segment {
                Segment::Text(text) => text,
                other => {
                    kept.push(other);
                    continue;
                }
            };
            let collapsed = collapse_whitespace(&text.to_raw_string());
            let mut normalized = String::new();
            let mut lines = collapsed.split('\n').peekable();
            while let Some(line) = lines.next() {
                let line = line.trim();
                if lines.peek().is_some() {
                    if in_line && line.is_empty() {
                        normalized.push('\n');
                    } else if in_line {
                        normalized.push(' ');
                        normalized.push_str(line);
                        normalized.push('\n');
                    } else if !line.is_empty() {
                        normalized.push_str(line);
                        normalized.push('\n');
                    }
                    in_line = false;
                } else if !line.is_empty() {
                    if in_line {
                        normalized.push(' ');
                    }
                    normalized.push_str(line);
                    in_line = true;
                }
            }
            if normalized.is_empty() {
                last_text = None;
            } else {
                last_text = Some(kept.len());
                kept.push(Segment::Text(VariableString::from_text(normalized)));
            }
        }
        if let Some(index) = last_text.filter(|_| trim) {
            if let Some(Segment::Text(text)) = kept.get_mut(index) {
                let trimmed = text.to_raw_string().trim_end().to_string();
                *text = VariableString::from_text(trimmed);
                if text.is_empty() {
                    kept.remove(index);
                }
            }
        }
        self.segments = kept;
    }

    /// 正文的纯文本内容：文本片段原样拼接，命令被忽略
    pub fn plain_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Text(text) => Some(text.to_raw_string()),
                Segment::Command(_) => None,
            })
            .collect()
    }

    pub fn collect_read_variables(&self, names: &mut BTreeSet<String>) {
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => text.collect_variables(names),
                Segment::Command(command) => command.collect_read_variables(names),
            }
        }
        for reply in &self.replies {
            reply.collect_read_variables(names);
        }
    }

    pub fn collect_write_variables(&self, names: &mut BTreeSet<String>) {
        for segment in &self.segments {
            if let Segment::Command(command) = segment {
                command.collect_write_variables(names);
            }
        }
        for reply in &self.replies {
            reply.collect_write_variables(names);
        }
    }

    /// 收集全部回复（包括子正文中的回复）的节点指针
    pub fn collect_pointers(&self, pointers: &mut BTreeSet<NodePointer>) {
        for segment in &self.segments {
            if let Segment::Command(command) = segment {
                command.collect_pointers(pointers);
            }
        }
        pointers.extend(self.replies.iter().map(|reply| reply.pointer.clone()));
    }

    /// 读取的变量
    pub fn read_variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_read_variables(&mut names);
        names
    }

    /// 写入的变量
    pub fn write_variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_write_variables(&mut names);
        names
    }

    pub fn pointers(&self) -> BTreeSet<NodePointer> {
        let mut pointers = BTreeSet::new();
        self.collect_pointers(&mut pointers);
        pointers
    }
}

/// `[\r\n]+` → `\n`，`[\t ]+` → 空格
fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' | '\n' => {
                while chars.next_if(|c| matches!(c, '\r' | '\n')).is_some() {}
                result.push('\n');
            }
            '\t' | ' ' => {
                while chars.next_if(|c| matches!(c, '\t' | ' ')).is_some() {}
                result.push(' ');
            }
            other => result.push(other),
        }
    }
    result
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Text(text) => write!(f, "{text}"),
            Segment::Command(command) => write!(f, "{command}"),
        }
    }
}

impl fmt::Display for NodeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{segment}")?;
        }
        for reply in &self.replies {
            write!(f, "\n{reply}")?;
        }
        Ok(())
    }
}

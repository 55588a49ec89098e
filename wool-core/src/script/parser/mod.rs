//! # Parser 模块
//!
//! `.wool` 对话文件解析器（手写递归下降，无 regex 依赖）。
//!
//! ## 架构
//!
//! ```text
//! 原始文本 → [按行读取] → 头部 + 正文行 → [分词] → Vec<Token> → [正文解析] → Node
//!                                                        ↓
//!                                                   命令 / 回复解析
//! ```
//!
//! ## 文件格式
//!
//! ```text
//! title: Start
//! speaker: Bot
//! ---
//! Hello $name!
//! [[Hi|Next]]
//! ===
//! ```
//!
//! ## 设计原则
//!
//! - 单个节点的错误不会中断整份文件的解析：跳到下一个 `===` 后继续，最后一次性报告所有错误
//! - 节点内的错误都带有节点标题
//! - 起始节点和节点指针目标的检查只在所有节点都解析成功后进行
//!
//! ## 模块结构
//!
//! - `tokenizer`: 正文分词
//! - `body`: 正文解析
//! - `command`: 命令解析
//! - `reply`: 回复解析
//! - `state`: 节点解析状态
//! - `helpers`: 记号游标与名称匹配
//! - `expr_parser`: 表达式解析器
//! - `project`: 多个对话一起解析并检查外部节点指针

mod body;
mod command;
mod expr_parser;
mod helpers;
mod project;
mod reply;
mod state;
mod tokenizer;


use tracing::{debug, info, warn};

use crate::error::{ParseError, ParseErrors};
use crate::script::ast::{Dialogue, END_NODE, Node, NodeHeader, NodePointer, START_NODE};

use body::{BODY_COMMANDS, BodyParser};
use state::{NodeState, PointerToken};

pub use expr_parser::parse_expression;
pub use helpers::{is_dialogue_name, is_identifier, is_node_name, resolve_dialogue_id};
pub use project::parse_project;
pub use tokenizer::{BodyTokenizer, Token, TokenValue};

/// 节点结束标记
const NODE_END: &str = "===";

/// 头部结束标记
const HEADER_END: &str = "---";

/// 对话解析器
#[derive(Debug, Default)]
pub struct Parser {
    /// 本次解析登记的节点指针
    pointers: Vec<PointerToken>,
}

/// 逐行读取源码，支持 `\n`、`\r\n` 和 `\r` 换行
struct LineReader<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    /// 最后一行之后是否有换行符
    ends_with_newline: bool,
}

impl<'a> LineReader<'a> {
    fn new(text: &'a str) -> Self {
        let mut lines = Vec::new();
        let bytes = text.as_bytes();
        let mut start = 0;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' => {
                    lines.push(&text[start..i]);
                    i += 1;
                    start = i;
                }
                b'\r' => {
                    lines.push(&text[start..i]);
                    i += 1;
                    if bytes.get(i) == Some(&b'\n') {
                        i += 1;
                    }
                    start = i;
                }
                _ => i += 1,
            }
        }
        let ends_with_newline = start == text.len();
        if !ends_with_newline {
            lines.push(&text[start..]);
        }
        Self {
            lines,
            pos: 0,
            ends_with_newline,
        }
    }

    /// 读取下一行，返回 (行号, 内容)
    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        let line = self.lines.get(self.pos).copied()?;
        self.pos += 1;
        Some((self.pos, line))
    }

    /// 文件末尾的位置 (行号, 列号)
    fn end_position(&self) -> (usize, usize) {
        match self.lines.last() {
            Some(last) if !self.ends_with_newline => (self.lines.len(), last.chars().count() + 1),
            _ => (self.lines.len() + 1, 1),
        }
    }

    /// 跳过当前节点剩余的行（包括 `===`）
    fn skip_to_node_end(&mut self) {
        while let Some((_, line)) = self.next_line() {
            if line_content(line) == NODE_END {
                return;
            }
        }
    }
}

/// 去除 `//` 注释和首尾空白，只用于头部行和分隔行
fn line_content(line: &str) -> &str {
    line.split_once("//").map_or(line, |(content, _)| content).trim()
}

/// 正在读取的头部
#[derive(Default)]
struct HeaderFields {
    /// 已出现的头部名称
    keys: Vec<String>,
    /// (取值, 行号, 列号)
    speaker: Option<(String, usize, usize)>,
    tags: Vec<(String, String)>,
}

impl HeaderFields {
    fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Parser {
    /// 创建新的解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析一份对话源码
    ///
    /// # 参数
    ///
    /// - `dialogue_name`: 对话名，`/` 分隔的路径，不含扩展名
    /// - `text`: 源码
    ///
    /// # 返回
    ///
    /// 解析后的 `Dialogue`，或收集到的全部错误
    pub fn parse(&mut self, dialogue_name: &str, text: &str) -> Result<Dialogue, ParseErrors> {
        self.pointers.clear();
        let mut errors = ParseErrors::new();
        if !is_dialogue_name(dialogue_name) {
            errors.push(ParseError::InvalidDialogueName {
                name: dialogue_name.to_string(),
            });
        }

        let mut dialogue = Dialogue::new(dialogue_name);
        let mut reader = LineReader::new(text);
        let mut node_error = false;
        loop {
            let mut state = NodeState::new(dialogue_name);
            let mut read_end = false;
            match self.read_node(&mut reader, &dialogue, &mut state, &mut read_end) {
                Ok(None) => break,
                Ok(Some(node)) => {
                    debug!(dialogue = %dialogue_name, node = %node.title(), "节点解析完成");
                    dialogue.add_node(node);
                    self.pointers.extend(state.into_pointers());
                }
                Err(error) => {
                    let error = error.in_node(state.title());
                    warn!(dialogue = %dialogue_name, error = %error, "节点解析失败");
                    errors.push(error);
                    node_error = true;
                    if !read_end {
                        reader.skip_to_node_end();
                    }
                }
            }
        }
        if node_error {
            return Err(errors);
        }

        if !dialogue.contains_node(START_NODE) {
            let (line, column) = reader.end_position();
            errors.push(ParseError::syntax(
                line,
                column,
                format!("未找到标题为 \"{START_NODE}\" 的节点"),
            ));
        }
        for pointer in &self.pointers {
            let NodePointer::Internal(node) = &pointer.pointer else {
                continue;
            };
            if dialogue.contains_node(node) {
                continue;
            }
            let error = pointer
                .token
                .error(format!("回复指向不存在的节点：{node}"))
                .in_node(pointer.node_title.as_deref());
            errors.push(error);
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        info!(
            dialogue = %dialogue_name,
            nodes = dialogue.node_count(),
            "对话解析完成"
        );
        Ok(dialogue)
    }

    /// 读取下一个节点
    ///
    /// 文件在头部之前结束（只剩空行或注释）时返回 `None`。
    /// `read_end` 表示是否已经读过节点的 `===`，出错时调用方据此决定是否需要跳过。
    fn read_node(
        &self,
        reader: &mut LineReader<'_>,
        dialogue: &Dialogue,
        state: &mut NodeState,
        read_end: &mut bool,
    ) -> Result<Option<Node>, ParseError> {
        let mut header = HeaderFields::default();
        let mut separator_line = None;
        while let Some((line_num, line)) = reader.next_line() {
            match line_content(line) {
                NODE_END => {
                    *read_end = true;
                    return Err(ParseError::syntax(line_num, 1, "未找到头部结束标记"));
                }
                HEADER_END => {
                    separator_line = Some(line_num);
                    break;
                }
                _ => parse_header_line(line, line_num, dialogue, state, &mut header)?,
            }
        }
        let Some(separator_line) = separator_line else {
            if header.is_empty() {
                return Ok(None);
            }
            let (line, column) = reader.end_position();
            return Err(ParseError::syntax(line, column, "文件末尾存在不完整的节点"));
        };
        let node_header = create_header(header, separator_line, state)?;

        let mut tokenizer = BodyTokenizer::new();
        let mut tokens = Vec::new();
        while let Some((line_num, line)) = reader.next_line() {
            if line_content(line) == NODE_END {
                *read_end = true;
                break;
            }
            tokens.extend(tokenizer.tokenize_line(line, line_num)?);
        }
        let first_token = tokens.first().cloned();
        let body = BodyParser::new(state).parse(tokens, BODY_COMMANDS)?;
        let node = Node::new(node_header, body);
        if node.is_end() && !node.body.is_empty() {
            if let Some(token) = first_token {
                return Err(token.error(format!("节点 \"{}\" 的内容必须为空", node.title())));
            }
        }
        Ok(Some(node))
    }
}

/// 解析一行头部 `key: value`
fn parse_header_line(
    line: &str,
    line_num: usize,
    dialogue: &Dialogue,
    state: &mut NodeState,
    header: &mut HeaderFields,
) -> Result<(), ParseError> {
    let line = line.split_once("//").map_or(line, |(content, _)| content);
    if line.trim().is_empty() {
        return Ok(());
    }
    let Some((key_untrimmed, value_untrimmed)) = line.split_once(':') else {
        return Err(ParseError::syntax(line_num, 1, "头部行中缺少字符 :"));
    };
    let key = key_untrimmed.trim();
    if key.is_empty() {
        return Err(ParseError::syntax(line_num, 1, "头部名称为空"));
    }
    let key_column = 1 + leading_whitespace(key_untrimmed);
    let value = value_untrimmed.trim();
    let value_column = key_untrimmed.chars().count() + 2 + leading_whitespace(value_untrimmed);
    if header.keys.iter().any(|k| k == key) {
        return Err(ParseError::syntax(
            line_num,
            key_column,
            format!("重复的头部：{key}"),
        ));
    }
    match key {
        "title" => {
            if !is_node_name(value) {
                return Err(ParseError::syntax(
                    line_num,
                    value_column,
                    format!("无效的节点标题：{value}"),
                ));
            }
            if dialogue.contains_node(value) {
                return Err(ParseError::syntax(
                    line_num,
                    value_column,
                    format!("重复的节点标题：{value}"),
                ));
            }
            state.set_title(value);
        }
        "speaker" => header.speaker = Some((value.to_string(), line_num, value_column)),
        _ => header.tags.push((key.to_string(), value.to_string())),
    }
    header.keys.push(key.to_string());
    Ok(())
}

fn leading_whitespace(s: &str) -> usize {
    s.chars().take_while(|c| c.is_whitespace()).count()
}

/// 检查必需的头部并创建 `NodeHeader`
///
/// `separator_line` 为 `---` 所在行，缺少头部时报告在这一行。
fn create_header(
    header: HeaderFields,
    separator_line: usize,
    state: &NodeState,
) -> Result<NodeHeader, ParseError> {
    let Some(title) = state.title() else {
        return Err(ParseError::syntax(separator_line, 1, "缺少必需的头部 \"title\""));
    };
    let speaker = if title.eq_ignore_ascii_case(END_NODE) {
        None
    } else {
        let Some((speaker, line, column)) = header.speaker else {
            return Err(ParseError::syntax(separator_line, 1, "缺少必需的头部 \"speaker\""));
        };
        if speaker.is_empty() {
            return Err(ParseError::syntax(line, column, "speaker 为空"));
        }
        Some(speaker)
    };
    let mut node_header = NodeHeader::new(title, speaker);
    node_header.tags = header.tags;
    Ok(node_header)
}

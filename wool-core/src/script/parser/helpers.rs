//! # 辅助解析函数
//!
//! 记号游标与手写的名称匹配函数，无正则依赖。

use super::tokenizer::{Token, TokenValue};

/// 节点标题字符：`[A-Za-z0-9_-]`
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// 匹配 `[A-Za-z0-9_-]+`
pub fn is_node_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_name_char)
}

/// 匹配 `[a-zA-Z_][a-zA-Z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// 匹配对话名 `([A-Za-z0-9_-]+/)*[A-Za-z0-9_-]+`
pub fn is_dialogue_name(s: &str) -> bool {
    s.split('/').all(is_node_name)
}

/// 匹配外部节点指针 `/?((..|NAME)/)*NAME.NAME`
///
/// # 返回
///
/// 匹配时返回 (对话路径, 节点标题)，路径保留开头的 `/`
pub fn split_external_pointer(s: &str) -> Option<(&str, &str)> {
    let (path, node) = s.rsplit_once('.')?;
    if !is_node_name(node) {
        return None;
    }
    let relative = path.strip_prefix('/').unwrap_or(path);
    let mut elements: Vec<&str> = relative.split('/').collect();
    let last = elements.pop()?;
    let valid = is_node_name(last)
        && elements
            .iter()
            .all(|element| *element == ".." || is_node_name(element));
    valid.then_some((path, node))
}

/// 把外部指针中的对话路径解析为绝对对话 ID
///
/// 以 `/` 开头为绝对路径；否则相对于当前对话所在的目录，`..` 表示上一级目录。
///
/// # 参数
///
/// - `current`: 当前对话名
/// - `path`: 指针中的对话路径
///
/// # 返回
///
/// 绝对对话 ID；路径超出根目录时返回错误描述
pub fn resolve_dialogue_id(current: &str, path: &str) -> Result<String, String> {
    if let Some(absolute) = path.strip_prefix('/') {
        return Ok(absolute.to_string());
    }
    let mut resolved: Vec<&str> = current.split('/').collect();
    resolved.pop();
    let folder = resolved.join("/");
    for element in path.split('/') {
        if element == ".." {
            if resolved.pop().is_none() {
                return Err(format!("相对路径 \"{path}\" 从 \"{folder}\" 超出了根目录"));
            }
        } else {
            resolved.push(element);
        }
    }
    Ok(resolved.join("/"))
}

/// 记号游标
#[derive(Debug, Clone, Default)]
pub struct TokenCursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenCursor {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// 当前记号
    pub fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// 当前记号的副本
    pub fn current_cloned(&self) -> Option<Token> {
        self.current().cloned()
    }

    pub fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// 跳过只含空白的文本记号
    pub fn skip_whitespace(&mut self) {
        while self.current().is_some_and(Token::is_whitespace) {
            self.advance();
        }
    }

    /// 当前记号是否为指定类型
    pub fn at(&self, value: &TokenValue) -> bool {
        self.current().is_some_and(|token| &token.value == value)
    }
}

/// 去除开头与末尾的空白
///
/// 只含空白的文本记号被删除，首尾文本记号的内容被裁剪。
pub fn trim_whitespace_tokens(tokens: &mut Vec<Token>) {
    while let Some(token) = tokens.first_mut() {
        let TokenValue::Text(text) = &mut token.value else {
            break;
        };
        *text = text.trim_start().to_string();
        if !text.is_empty() {
            break;
        }
        tokens.remove(0);
    }
    while let Some(token) = tokens.last_mut() {
        let TokenValue::Text(text) = &mut token.value else {
            break;
        };
        text.truncate(text.trim_end().len());
        if !text.is_empty() {
            break;
        }
        tokens.pop();
    }
}

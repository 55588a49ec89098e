//! # 插值字符串
//!
//! 由字面文本和 `$变量` 引用交替组成的字符串。正文文本、命令属性值都用它表示。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::script::expr::EvalContext;

/// 正文中需要额外转义的字符
pub(crate) const BODY_ESCAPES: &[char] = &['<', '>', '[', ']', '|', '/'];

/// 引号属性值中需要额外转义的字符
pub(crate) const QUOTED_ESCAPES: &[char] = &['"'];

/// 插值字符串片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StringSegment {
    /// 字面文本（已去除转义）
    Text(String),
    /// 变量引用，不含 `$`
    Variable(String),
}

/// 插值字符串
///
/// 相邻的文本片段在插入时自动合并，空文本不会被保存。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariableString {
    segments: Vec<StringSegment>,
}

impl VariableString {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由纯文本创建
    pub fn from_text(text: impl AsRef<str>) -> Self {
        let mut result = Self::new();
        result.push_text(text.as_ref());
        result
    }

    pub fn segments(&self) -> &[StringSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// 追加文本，与末尾文本合并
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.segments.last_mut() {
            Some(StringSegment::Text(last)) => last.push_str(text),
            _ => self.segments.push(StringSegment::Text(text.to_string())),
        }
    }

    /// 追加变量引用
    pub fn push_variable(&mut self, name: impl Into<String>) {
        self.segments.push(StringSegment::Variable(name.into()));
    }

    /// 追加一个片段
    pub fn push(&mut self, segment: StringSegment) {
        match segment {
            StringSegment::Text(text) => self.push_text(&text),
            StringSegment::Variable(name) => self.push_variable(name),
        }
    }

    /// 追加另一个插值字符串的全部片段
    pub fn append(&mut self, other: &VariableString) {
        for segment in &other.segments {
            self.push(segment.clone());
        }
    }

    /// 是否只由空白文本组成（变量引用不算空白）
    pub fn is_whitespace(&self) -> bool {
        self.segments.iter().all(|segment| match segment {
            StringSegment::Text(text) => text.trim().is_empty(),
            StringSegment::Variable(_) => false,
        })
    }

    /// 是否不含变量引用
    pub fn is_plain_text(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, StringSegment::Text(_)))
    }

    /// 若恰好由一个变量引用组成，返回变量名
    pub fn as_single_variable(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [StringSegment::Variable(name)] => Some(name),
            _ => None,
        }
    }

    /// 原样拼接：文本直接输出，变量输出为 `$name`，不做转义
    pub fn to_raw_string(&self) -> String {
        let mut result = String::new();
        for segment in &self.segments {
            match segment {
                StringSegment::Text(text) => result.push_str(text),
                StringSegment::Variable(name) => {
                    result.push('$');
                    result.push_str(name);
                }
            }
        }
        result
    }

    /// 去除开头空白，空掉的文本片段会被移除
    pub fn remove_leading_whitespace(&mut self) {
        while let Some(StringSegment::Text(text)) = self.segments.first_mut() {
            let trimmed = text.trim_start();
            if !trimmed.is_empty() {
                *text = trimmed.to_string();
                return;
            }
            self.segments.remove(0);
        }
    }

    /// 去除末尾空白，空掉的文本片段会被移除
    pub fn remove_trailing_whitespace(&mut self) {
        while let Some(StringSegment::Text(text)) = self.segments.last_mut() {
            let trimmed = text.trim_end();
            if !trimmed.is_empty() {
                text.truncate(trimmed.len());
                return;
            }
            self.segments.pop();
        }
    }

    pub fn trim_whitespace(&mut self) {
        self.remove_leading_whitespace();
        self.remove_trailing_whitespace();
    }

    /// 收集引用的变量名
    pub fn collect_variables(&self, names: &mut BTreeSet<String>) {
        for segment in &self.segments {
            if let StringSegment::Variable(name) = segment {
                names.insert(name.clone());
            }
        }
    }

    /// 用变量值替换全部变量引用
    ///
    /// 未设置的变量按 `null` 输出。
    pub fn resolve<C: EvalContext + ?Sized>(&self, ctx: &C) -> String {
        let mut result = String::new();
        for segment in &self.segments {
            match segment {
                StringSegment::Text(text) => result.push_str(text),
                StringSegment::Variable(name) => match ctx.get_var(name) {
                    Some(value) => result.push_str(&value.to_string()),
                    None => result.push_str("null"),
                },
            }
        }
        result
    }

    /// 生成源码形式
    ///
    /// 总是转义 `\` 与 `$`，`escapes` 指定额外需要转义的字符。
    /// 紧跟在变量引用之后的标识符字符也会被转义，避免与变量名粘连。
    pub fn to_code(&self, escapes: &[char]) -> String {
        let mut result = String::new();
        let mut after_variable = false;
        for segment in &self.segments {
            match segment {
                StringSegment::Text(text) => {
                    for (i, c) in text.chars().enumerate() {
                        let glued = i == 0
                            && after_variable
                            && (c.is_ascii_alphanumeric() || c == '_');
                        if c == '\\' || c == '$' || escapes.contains(&c) || glued {
                            result.push('\\');
                        }
                        result.push(c);
                    }
                    after_variable = false;
                }
                StringSegment::Variable(name) => {
                    result.push('$');
                    result.push_str(name);
                    after_variable = true;
                }
            }
        }
        result
    }

    /// 引号属性值的源码形式（不含两侧引号）
    pub fn to_quoted_code(&self) -> String {
        self.to_code(QUOTED_ESCAPES)
    }
}

impl fmt::Display for VariableString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_code(BODY_ESCAPES))
    }
}

impl From<&str> for VariableString {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}

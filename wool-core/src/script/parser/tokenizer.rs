//! # 正文分词器
//!
//! 把节点正文的一行源码切分为记号。
//!
//! ## 设计原则
//!
//! - 逐字符扫描，手写状态机，无正则依赖
//! - 是否处于 `<<...>>` 或 `[[...]]` 内的状态跨行保留，每个节点新建一个分词器
//! - 每个记号记录行号、列号（均从 1 开始）和覆盖的原始源码

use std::fmt;

use crate::error::ParseError;
use crate::script::ast::VariableString;

/// 记号取值
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    /// 字面文本（已去除转义）
    Text(String),
    /// 变量引用，不含 `$`
    Variable(String),
    /// `<<`
    CommandStart,
    /// `>>`
    CommandEnd,
    /// `[[`
    ReplyStart,
    /// `]]`
    ReplyEnd,
    /// 回复内的 `|`
    ReplySeparator,
    /// 命令内的引号字符串，可含变量引用
    QuotedString(VariableString),
}

impl TokenValue {
    /// 记号类型名，用于错误信息
    pub fn kind(&self) -> &'static str {
        match self {
            TokenValue::Text(_) => "文本",
            TokenValue::Variable(_) => "变量",
            TokenValue::CommandStart => "<<",
            TokenValue::CommandEnd => ">>",
            TokenValue::ReplyStart => "[[",
            TokenValue::ReplyEnd => "]]",
            TokenValue::ReplySeparator => "|",
            TokenValue::QuotedString(_) => "引号字符串",
        }
    }
}

/// 正文记号
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub value: TokenValue,
    /// 覆盖的原始源码
    pub raw: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    /// 在记号位置创建语法错误
    pub fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::syntax(self.line, self.column, message)
    }

    /// 是否为只含空白的文本
    pub fn is_whitespace(&self) -> bool {
        matches!(&self.value, TokenValue::Text(text) if text.trim().is_empty())
    }

    /// 文本记号的内容
    pub fn text(&self) -> Option<&str> {
        match &self.value {
            TokenValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// 正文分词器
#[derive(Debug, Default)]
pub struct BodyTokenizer {
    in_command: bool,
    in_reply: bool,
}

/// 单行扫描时的临时状态
struct LineScanner<'a> {
    chars: &'a [char],
    line: usize,
    tokens: Vec<Token>,
    /// 当前文本缓冲（已去除转义）
    text: String,
    /// 当前文本在行内的起始下标（从 0 开始）
    text_start: usize,
}

impl LineScanner<'_> {
    fn raw(&self, start: usize, end: usize) -> String {
        self.chars[start..end.min(self.chars.len())].iter().collect()
    }

    /// 结束当前文本记号，`end` 为原始源码的结束下标（不含）
    fn finish_text(&mut self, end: usize) {
        if self.text.is_empty() {
            return;
        }
        let token = Token {
            value: TokenValue::Text(std::mem::take(&mut self.text)),
            raw: self.raw(self.text_start, end),
            line: self.line,
            column: self.text_start + 1,
        };
        self.tokens.push(token);
    }

    fn push(&mut self, value: TokenValue, start: usize, end: usize) {
        let token = Token {
            value,
            raw: self.raw(start, end),
            line: self.line,
            column: start + 1,
        };
        self.tokens.push(token);
    }

    /// 从 `start` 读取标识符，返回结束下标
    fn read_identifier(&self, start: usize) -> usize {
        let mut end = start;
        while let Some(&c) = self.chars.get(end) {
            let valid = if end == start {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if !valid {
                break;
            }
            end += 1;
        }
        end
    }

    /// 读取 `start` 处开始的引号字符串，返回结束下标（不含）
    fn read_quoted_string(&mut self, start: usize) -> Result<usize, ParseError> {
        let mut value = VariableString::new();
        let mut slice = String::new();
        let mut i = start + 1;
        loop {
            let Some(&c) = self.chars.get(i) else {
                return Err(ParseError::syntax(self.line, start + 1, "引号字符串未结束"));
            };
            match c {
                '\\' => {
                    if let Some(&next) = self.chars.get(i + 1) {
                        slice.push(next);
                    }
                    i += 2;
                }
                '$' => {
                    let end = self.read_identifier(i + 1);
                    if end == i + 1 {
                        slice.push('$');
                        i += 1;
                    } else {
                        value.push_text(&std::mem::take(&mut slice));
                        value.push_variable(self.raw(i + 1, end));
                        i = end;
                    }
                }
                '"' => {
                    value.push_text(&slice);
                    i += 1;
                    break;
                }
                other => {
                    slice.push(other);
                    i += 1;
                }
            }
        }
        self.push(TokenValue::QuotedString(value), start, i);
        Ok(i)
    }
}

impl BodyTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 切分一行源码
    ///
    /// # 参数
    ///
    /// - `line`: 不含换行符的源码行，末尾会自动补上 `\n`
    /// - `line_num`: 行号（从 1 开始）
    pub fn tokenize_line(&mut self, line: &str, line_num: usize) -> Result<Vec<Token>, ParseError> {
        let chars: Vec<char> = line.chars().chain(std::iter::once('\n')).collect();
        let mut scanner = LineScanner {
            chars: &chars,
            line: line_num,
            tokens: Vec::new(),
            text: String::new(),
            text_start: 0,
        };
        let mut pending: Option<char> = None;
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if let Some(special) = pending.take() {
                match special {
                    '\\' => {
                        scanner.text.push(c);
                        i += 1;
                        continue;
                    }
                    '/' if c == '/' => {
                        scanner.finish_text(i - 1);
                        return Ok(scanner.tokens);
                    }
                    '<' | '>' | '[' | ']' if c == special => {
                        scanner.finish_text(i - 1);
                        let value = self.delimiter(special, line_num, i)?;
                        scanner.push(value, i - 1, i + 1);
                        i += 1;
                        scanner.text_start = i;
                        continue;
                    }
                    // 单个特殊字符按普通文本处理，当前字符重新扫描
                    other => scanner.text.push(other),
                }
            }
            match c {
                '$' => {
                    let end = scanner.read_identifier(i + 1);
                    if end == i + 1 {
                        scanner.text.push('$');
                        i += 1;
                    } else {
                        scanner.finish_text(i);
                        let name = scanner.raw(i + 1, end);
                        scanner.push(TokenValue::Variable(name), i, end);
                        i = end;
                        scanner.text_start = i;
                    }
                }
                '\\' | '<' | '>' | '/' => {
                    pending = Some(c);
                    i += 1;
                }
                '[' | ']' if !self.in_command => {
                    pending = Some(c);
                    i += 1;
                }
                '"' if self.in_command => {
                    scanner.finish_text(i);
                    i = scanner.read_quoted_string(i)?;
                    scanner.text_start = i;
                }
                '|' if self.in_reply && !self.in_command => {
                    scanner.finish_text(i);
                    scanner.push(TokenValue::ReplySeparator, i, i + 1);
                    i += 1;
                    scanner.text_start = i;
                }
                other => {
                    scanner.text.push(other);
                    i += 1;
                }
            }
        }
        // 行尾遗留的单个特殊字符按文本处理
        if let Some(special) = pending.filter(|&c| c != '\\') {
            scanner.text.push(special);
        }
        scanner.finish_text(chars.len());
        Ok(scanner.tokens)
    }

    /// 处理成对的分隔符并更新嵌套状态
    ///
    /// `second` 为第二个字符的下标（从 0 开始），即第一个字符的列号
    fn delimiter(&mut self, c: char, line: usize, second: usize) -> Result<TokenValue, ParseError> {
        let error = |message: &str| ParseError::syntax(line, second, message);
        match c {
            '<' => {
                if self.in_command {
                    return Err(error("在 <<...>> 内发现 <<"));
                }
                self.in_command = true;
                Ok(TokenValue::CommandStart)
            }
            '>' => {
                if !self.in_command {
                    return Err(error("发现 >> 但前面没有 <<"));
                }
                self.in_command = false;
                Ok(TokenValue::CommandEnd)
            }
            '[' => {
                if self.in_reply {
                    return Err(error("在 [[...]] 内发现 [["));
                }
                self.in_reply = true;
                Ok(TokenValue::ReplyStart)
            }
            _ => {
                if !self.in_reply {
                    return Err(error("发现 ]] 但前面没有 [["));
                }
                self.in_reply = false;
                Ok(TokenValue::ReplyEnd)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(line: &str) -> Vec<TokenValue> {
        BodyTokenizer::new()
            .tokenize_line(line, 1)
            .unwrap()
            .into_iter()
            .map(|t| t.value)
            .collect()
    }

    fn text(s: &str) -> TokenValue {
        TokenValue::Text(s.to_string())
    }

    #[test]
    fn test_text_and_variables() {
        assert_eq!(
            values("Hello $name!"),
            vec![
                text("Hello "),
                TokenValue::Variable("name".to_string()),
                text("!\n"),
            ]
        );
        assert_eq!(values("costs $5"), vec![text("costs $5\n")]);
    }

    #[test]
    fn test_positions_and_raw_text() {
        let tokens = BodyTokenizer::new()
            .tokenize_line("Hi $x <<set $x = 1>>", 4)
            .unwrap();
        let summary: Vec<_> = tokens
            .iter()
            .map(|t| (t.raw.as_str(), t.line, t.column))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Hi ", 4, 1),
                ("$x", 4, 4),
                (" ", 4, 6),
                ("<<", 4, 7),
                ("set ", 4, 9),
                ("$x", 4, 13),
                (" = 1", 4, 15),
                (">>", 4, 19),
                ("\n", 4, 21),
            ]
        );
    }

    #[test]
    fn test_escapes_and_lone_specials() {
        assert_eq!(values(r"a \<\< b < c \$d"), vec![text("a << b < c $d\n")]);
        assert_eq!(values("a/b [x] >"), vec![text("a/b [x] >\n")]);
        assert_eq!(values(r"trailing \"), vec![text("trailing \n")]);
    }

    #[test]
    fn test_comment_discards_rest_of_line() {
        assert_eq!(values("Hello // comment"), vec![text("Hello ")]);
        assert_eq!(values("// only"), Vec::<TokenValue>::new());
    }

    #[test]
    fn test_reply_tokens() {
        assert_eq!(
            values("[[Yes|Next]]"),
            vec![
                TokenValue::ReplyStart,
                text("Yes"),
                TokenValue::ReplySeparator,
                text("Next"),
                TokenValue::ReplyEnd,
                text("\n"),
            ]
        );
        // 回复外的 | 是普通文本
        assert_eq!(values("a|b"), vec![text("a|b\n")]);
    }

    #[test]
    fn test_quoted_string_in_command() {
        let tokens = BodyTokenizer::new()
            .tokenize_line(r#"<<action type="image" value="a \"b\" $img.png">>"#, 1)
            .unwrap();
        let quoted: Vec<_> = tokens
            .iter()
            .filter_map(|t| match &t.value {
                TokenValue::QuotedString(s) => Some((s.to_raw_string(), t.raw.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(quoted[0].0, "image");
        assert_eq!(quoted[1].0, "a \"b\" $img.png");
        assert_eq!(quoted[1].1, r#""a \"b\" $img.png""#);
        // 命令外的引号是普通文本
        assert_eq!(values(r#"say "hi""#), vec![text("say \"hi\"\n")]);
    }

    #[test]
    fn test_brackets_are_text_inside_command() {
        let v = values("<<set $a = [[1]]>>");
        assert!(v.contains(&text("set ")));
        assert!(!v.contains(&TokenValue::ReplyStart));
    }

    #[test]
    fn test_state_persists_across_lines() {
        let mut tokenizer = BodyTokenizer::new();
        let first = tokenizer.tokenize_line("[[Yes <<set $a", 1).unwrap();
        assert_eq!(first[0].value, TokenValue::ReplyStart);
        let second = tokenizer.tokenize_line(r#"= "x">>|Next]]"#, 2).unwrap();
        assert!(second.iter().any(|t| t.value == TokenValue::ReplySeparator));
        assert_eq!(
            second.iter().find(|t| t.value == TokenValue::ReplyEnd).map(|t| t.line),
            Some(2)
        );
    }

    #[test]
    fn test_nesting_errors() {
        let err = BodyTokenizer::new().tokenize_line("<<a <<b>>", 3).unwrap_err();
        assert_eq!((err.line(), err.column()), (Some(3), Some(5)));
        assert!(err.message().contains("<<"));

        let err = BodyTokenizer::new().tokenize_line("a >>", 1).unwrap_err();
        assert_eq!(err.message(), "发现 >> 但前面没有 <<");

        let err = BodyTokenizer::new().tokenize_line("[[a [[b", 1).unwrap_err();
        assert_eq!(err.message(), "在 [[...]] 内发现 [[");

        let err = BodyTokenizer::new().tokenize_line("a ]]", 1).unwrap_err();
        assert_eq!(err.message(), "发现 ]] 但前面没有 [[");
    }

    #[test]
    fn test_unterminated_quoted_string() {
        let err = BodyTokenizer::new()
            .tokenize_line(r#"<<input value="abc"#, 2)
            .unwrap_err();
        assert_eq!(err.message(), "引号字符串未结束");
        assert_eq!(err.column(), Some(15));
    }
}

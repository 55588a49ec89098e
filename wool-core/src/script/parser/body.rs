//! # 正文解析
//!
//! 把一个节点正文（或回复陈述、命令子句）的记号序列解析为 [`NodeBody`]。
//!
//! 子句命令（`elseif`、`else`、`endif`、`or`、`endrandom`）由调用方给出，
//! 遇到时停止并把子句交还给 `if` / `random` 的解析函数。

use super::helpers::TokenCursor;
use super::state::NodeState;
use super::tokenizer::{Token, TokenValue};
use crate::error::ParseError;
use crate::script::ast::{NodeBody, VariableString};

/// 节点正文中允许的命令
pub const BODY_COMMANDS: &[&str] = &["action", "if", "random", "set"];

/// 回复陈述中允许的命令
pub const STATEMENT_COMMANDS: &[&str] = &["input"];

/// 回复命令段中允许的命令
pub const REPLY_COMMANDS: &[&str] = &["action", "set"];

/// 遇到的子句命令
#[derive(Debug, Clone)]
pub struct ClauseStart {
    pub name: String,
    /// 子句的 `<<` 记号
    pub token: Token,
}

/// 解析到子句命令为止的结果
#[derive(Debug)]
pub struct BodyUntilClause {
    pub body: NodeBody,
    /// `None` 表示记号已耗尽
    pub clause: Option<ClauseStart>,
}

/// 正文解析器
pub struct BodyParser<'a> {
    pub(super) state: &'a mut NodeState,
}

impl<'a> BodyParser<'a> {
    pub fn new(state: &'a mut NodeState) -> Self {
        Self { state }
    }

    /// 解析完整的记号序列
    ///
    /// # 参数
    ///
    /// - `tokens`: 正文记号
    /// - `valid_commands`: 允许出现的命令名
    pub fn parse(
        &mut self,
        tokens: Vec<Token>,
        valid_commands: &[&str],
    ) -> Result<NodeBody, ParseError> {
        let mut cursor = TokenCursor::new(tokens);
        let result = self.parse_until_clause(&mut cursor, valid_commands, &[])?;
        Ok(result.body)
    }

    /// 解析到子句命令或记号耗尽为止
    ///
    /// 遇到子句命令时游标停在子句的命令名记号上。
    pub fn parse_until_clause(
        &mut self,
        cursor: &mut TokenCursor,
        valid_commands: &[&str],
        valid_clauses: &[&str],
    ) -> Result<BodyUntilClause, ParseError> {
        let mut body = NodeBody::new();
        while let Some(token) = cursor.current_cloned() {
            match &token.value {
                TokenValue::Text(_) | TokenValue::Variable(_) => {
                    let text = parse_text_segment(cursor);
                    if body.replies().is_empty() {
                        body.add_text(text);
                    } else if !text.is_whitespace() {
                        return Err(token.error("回复之后出现了内容"));
                    }
                }
                TokenValue::CommandStart => {
                    let name = self.read_command_name(&token, cursor)?;
                    if valid_clauses.contains(&name.as_str()) {
                        body.trim_whitespace();
                        return Ok(BodyUntilClause {
                            body,
                            clause: Some(ClauseStart { name, token }),
                        });
                    }
                    if !body.replies().is_empty() && name != "if" && name != "random" {
                        return Err(token.error("回复之后出现了 <<"));
                    }
                    let command =
                        self.parse_command_from_name(&token, &name, cursor, valid_commands)?;
                    body.add_command(command);
                }
                TokenValue::ReplyStart => {
                    let reply = self.parse_reply(cursor)?;
                    if reply.is_auto_forward() && body.has_auto_forward_reply() {
                        return Err(token.error("存在多个自动前进回复"));
                    }
                    body.add_reply(reply);
                }
                other => {
                    return Err(token.error(format!("意外的记号：{}", other.kind())));
                }
            }
        }
        body.trim_whitespace();
        Ok(BodyUntilClause { body, clause: None })
    }
}

/// 读取连续的文本与变量记号
fn parse_text_segment(cursor: &mut TokenCursor) -> VariableString {
    let mut text = VariableString::new();
    while let Some(token) = cursor.current() {
        match &token.value {
            TokenValue::Text(value) => text.push_text(value),
            TokenValue::Variable(name) => text.push_variable(name.clone()),
            _ => break,
        }
        cursor.advance();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::{Command, Segment};
    use crate::script::parser::tokenizer::BodyTokenizer;

    fn tokenize(source: &str) -> Vec<Token> {
        let mut tokenizer = BodyTokenizer::new();
        source
            .lines()
            .enumerate()
            .flat_map(|(i, line)| tokenizer.tokenize_line(line, i + 1).unwrap())
            .collect()
    }

    fn parse(source: &str) -> Result<NodeBody, ParseError> {
        let mut state = NodeState::new("test");
        state.set_title("Start");
        BodyParser::new(&mut state).parse(tokenize(source), BODY_COMMANDS)
    }

    #[test]
    fn test_text_is_trimmed_and_merged() {
        let body = parse("\n  Hello $name,\nwelcome.  \n").unwrap();
        assert_eq!(body.segments().len(), 1);
        let Segment::Text(text) = &body.segments()[0] else {
            panic!("应为文本片段");
        };
        assert_eq!(text.to_raw_string(), "Hello $name,\nwelcome.");
    }

    #[test]
    fn test_commands_and_replies() {
        let body = parse("Hi <<set $a = 1>>\n[[Yes|Next]]\n[[No|End]]").unwrap();
        assert!(matches!(body.segments()[1], Segment::Command(Command::Set(_))));
        let ids: Vec<u32> = body.replies().iter().map(|r| r.id).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn test_content_after_reply() {
        let err = parse("[[Yes|Next]]\nmore").unwrap_err();
        assert_eq!(err.message(), "回复之后出现了内容");
        // 报告在整段文本的第一个记号上
        assert_eq!((err.line(), err.column()), (Some(1), Some(13)));

        let err = parse("[[Yes|Next]] <<set $a = 1>>").unwrap_err();
        assert_eq!(err.message(), "回复之后出现了 <<");
    }

    #[test]
    fn test_if_after_reply_is_allowed() {
        let body = parse("[[Yes|Next]]\n<<if $a>>[[No|End]]<<endif>>").unwrap();
        assert_eq!(body.replies().len(), 1);
        assert_eq!(body.segments().len(), 1);
    }

    #[test]
    fn test_single_auto_forward_reply() {
        let err = parse("[[Next]]\n[[End]]").unwrap_err();
        assert_eq!(err.message(), "存在多个自动前进回复");
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_command_not_allowed() {
        let err = parse("<<input type=\"text\" value=\"$a\">>").unwrap_err();
        assert_eq!(err.message(), "意外的命令：input");
    }

    #[test]
    fn test_until_clause_stops_at_name() {
        let mut state = NodeState::new("test");
        let mut cursor = TokenCursor::new(tokenize("a <<or>> b"));
        let result = BodyParser::new(&mut state)
            .parse_until_clause(&mut cursor, BODY_COMMANDS, &["or"])
            .unwrap();
        let clause = result.clause.unwrap();
        assert_eq!(clause.name, "or");
        assert_eq!(clause.token.column, 3);
        assert_eq!(cursor.current().and_then(Token::text), Some("or"));
        assert_eq!(result.body.plain_text(), "a");
    }
}

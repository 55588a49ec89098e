//! # 回复解析
//!
//! `[[陈述|节点指针|命令]]`，用 `|` 分为最多三段：
//!
//! - 一段：只有节点指针，即自动前进回复
//! - 两段：陈述与节点指针
//! - 三段：陈述、节点指针与选择回复时执行的命令

use super::body::{BodyParser, REPLY_COMMANDS, STATEMENT_COMMANDS};
use super::helpers::{
    TokenCursor, is_node_name, resolve_dialogue_id, split_external_pointer,
    trim_whitespace_tokens,
};
use super::tokenizer::{Token, TokenValue};
use crate::error::ParseError;
use crate::script::ast::{Command, NodeBody, NodePointer, Reply};

/// 回复中的一段
struct Section {
    tokens: Vec<Token>,
    /// 结束本段的 `|` 或 `]]`
    end: Token,
}

impl BodyParser<'_> {
    /// 解析回复，调用时游标位于 `[[`，返回后游标位于 `]]` 之后
    pub(super) fn parse_reply(&mut self, cursor: &mut TokenCursor) -> Result<Reply, ParseError> {
        let Some(start) = cursor.current_cloned() else {
            return Err(ParseError::syntax(0, 0, "回复未结束"));
        };
        cursor.advance();
        let mut sections = Vec::new();
        let mut tokens = Vec::new();
        loop {
            let Some(token) = cursor.current_cloned() else {
                return Err(start.error("回复未结束"));
            };
            cursor.advance();
            match token.value {
                TokenValue::ReplySeparator => {
                    if sections.len() == 2 {
                        return Err(token.error("回复超过最多 3 段"));
                    }
                    sections.push(Section {
                        tokens: std::mem::take(&mut tokens),
                        end: token,
                    });
                }
                TokenValue::ReplyEnd => {
                    sections.push(Section { tokens, end: token });
                    break;
                }
                _ => tokens.push(token),
            }
        }

        let commands = if sections.len() == 3 { sections.pop() } else { None };
        let Some(pointer) = sections.pop() else {
            return Err(start.error("回复未结束"));
        };
        let statement = match sections.pop() {
            Some(section) => self.parse_statement(section)?,
            None => None,
        };
        let pointer = self.parse_pointer(pointer)?;
        let commands = match commands {
            Some(section) => self.parse_reply_commands(section)?,
            None => Vec::new(),
        };
        Ok(Reply {
            id: self.state.next_reply_id(),
            statement,
            pointer,
            commands,
        })
    }

    /// 陈述为空时返回 `None`
    fn parse_statement(&mut self, section: Section) -> Result<Option<NodeBody>, ParseError> {
        let body = self.parse(section.tokens, STATEMENT_COMMANDS)?;
        Ok((!body.segments().is_empty()).then_some(body))
    }

    fn parse_pointer(&mut self, section: Section) -> Result<NodePointer, ParseError> {
        let mut tokens = section.tokens;
        trim_whitespace_tokens(&mut tokens);
        let token = match tokens.as_slice() {
            [] => return Err(section.end.error("回复中的节点指针为空")),
            [token] if token.text().is_some() => token,
            [first, ..] => return Err(first.error("回复中的节点指针无效")),
        };
        let value = token.text().unwrap_or_default();
        let pointer = if is_node_name(value) {
            NodePointer::internal(value)
        } else if let Some((path, node)) = split_external_pointer(value) {
            let dialogue = resolve_dialogue_id(self.state.dialogue_name(), path)
                .map_err(|message| token.error(format!("回复中的节点指针无效：{message}")))?;
            NodePointer::external(dialogue, node)
        } else {
            return Err(token.error(format!("回复中的节点指针无效：{value}")));
        };
        self.state.add_pointer(pointer.clone(), token.clone());
        Ok(pointer)
    }

    fn parse_reply_commands(&mut self, section: Section) -> Result<Vec<Command>, ParseError> {
        let mut cursor = TokenCursor::new(section.tokens);
        let mut commands = Vec::new();
        cursor.skip_whitespace();
        while let Some(token) = cursor.current_cloned() {
            if token.value != TokenValue::CommandStart {
                return Err(token.error(format!("应为 <<，实际为 {}", token.value.kind())));
            }
            commands.push(self.parse_command_from_start(&token, &mut cursor, REPLY_COMMANDS)?);
            cursor.skip_whitespace();
        }
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::body::BODY_COMMANDS;
    use crate::script::parser::state::NodeState;
    use crate::script::parser::tokenizer::BodyTokenizer;

    fn parse_in(dialogue: &str, source: &str) -> Result<(NodeBody, NodeState), ParseError> {
        let mut tokenizer = BodyTokenizer::new();
        let mut tokens = Vec::new();
        for (i, line) in source.lines().enumerate() {
            tokens.extend(tokenizer.tokenize_line(line, i + 1)?);
        }
        let mut state = NodeState::new(dialogue);
        state.set_title("Start");
        let body = BodyParser::new(&mut state).parse(tokens, BODY_COMMANDS)?;
        Ok((body, state))
    }

    fn parse(source: &str) -> Result<NodeBody, ParseError> {
        parse_in("chapters/one", source).map(|(body, _)| body)
    }

    fn reply(source: &str) -> Reply {
        parse(source).unwrap().replies()[0].clone()
    }

    #[test]
    fn test_auto_forward_reply() {
        let reply = reply("[[ Next ]]");
        assert!(reply.is_auto_forward());
        assert_eq!(reply.pointer, NodePointer::internal("Next"));
        assert_eq!(reply.id, 1);
    }

    #[test]
    fn test_statement_pointer_and_commands() {
        let reply = reply(r#"[[Hello $name|Next|<<set $greeted = true>> <<action type="image" value="a.png">>]]"#);
        let statement = reply.statement.unwrap();
        assert_eq!(statement.plain_text(), "Hello $name");
        assert_eq!(reply.commands.len(), 2);
        assert_eq!(reply.commands[0].name(), "set");
    }

    #[test]
    fn test_whitespace_statement_is_auto_forward() {
        assert!(reply("[[  |Next]]").is_auto_forward());
    }

    #[test]
    fn test_end_pointer() {
        assert!(reply("[[Bye|end]]").pointer.is_end());
    }

    #[test]
    fn test_external_pointers() {
        assert_eq!(
            reply("[[Go|other.Start]]").pointer,
            NodePointer::external("chapters/other", "Start")
        );
        assert_eq!(
            reply("[[Go|../shared.Intro]]").pointer,
            NodePointer::external("shared", "Intro")
        );
        assert_eq!(
            reply("[[Go|/top.Intro]]").pointer,
            NodePointer::external("top", "Intro")
        );
        let err = parse("[[Go|../../x.Start]]").unwrap_err();
        assert!(err.message().starts_with("回复中的节点指针无效：相对路径"));
    }

    #[test]
    fn test_pointers_are_registered() {
        let (_, state) = parse_in("intro", "[[A|One]]\n[[B|Two]]").unwrap();
        let pointers = state.into_pointers();
        let nodes: Vec<_> = pointers.iter().map(|p| p.pointer.node_id().to_string()).collect();
        assert_eq!(nodes, ["One", "Two"]);
        assert_eq!(pointers[1].token.line, 2);
        assert_eq!(pointers[1].node_title.as_deref(), Some("Start"));
    }

    #[test]
    fn test_input_in_statement() {
        let reply = reply(r#"[[My name is <<input type="text" value="$name">>|Next]]"#);
        let statement = reply.statement.unwrap();
        assert_eq!(statement.segments().len(), 2);
    }

    #[test]
    fn test_reply_errors() {
        let err = parse("[[a|b|c|d]]").unwrap_err();
        assert_eq!(err.message(), "回复超过最多 3 段");
        assert_eq!(err.column(), Some(8));

        let err = parse("[[Yes|  ]]").unwrap_err();
        assert_eq!(err.message(), "回复中的节点指针为空");
        assert_eq!(err.column(), Some(9));

        assert_eq!(parse("[[Yes|a b]]").unwrap_err().message(), "回复中的节点指针无效：a b");
        assert_eq!(parse("[[Yes|$x]]").unwrap_err().message(), "回复中的节点指针无效");
        assert_eq!(
            parse("[[Yes|Next|text]]").unwrap_err().message(),
            "应为 <<，实际为 文本"
        );
        assert_eq!(
            parse("[[Yes|Next|<<if $a>>x<<endif>>]]").unwrap_err().message(),
            "意外的命令：if"
        );
        assert_eq!(
            parse(r#"[[<<input type="text" value="$a">>|Next|<<input type="text" value="$b">>]]"#)
                .unwrap_err()
                .message(),
            "意外的命令：input"
        );
    }

    #[test]
    fn test_unterminated_reply() {
        let err = parse("[[Yes|Next").unwrap_err();
        assert_eq!(err.message(), "回复未结束");
        assert_eq!((err.line(), err.column()), (Some(1), Some(1)));
    }
}

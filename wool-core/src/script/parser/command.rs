//! # 命令解析
//!
//! 解析 `<<...>>` 命令。命令分两类：
//!
//! - 属性命令（`action`、`input`、`random`）：`name attr="value" ...`
//! - 表达式命令（`if`、`elseif`、`set`）：命令名之后是一个表达式
//!
//! `if` 与 `random` 带有子句和子正文，通过 [`BodyParser::parse_until_clause`] 递归解析。

use super::body::{BODY_COMMANDS, BodyParser};
use super::expr_parser::parse_expression;
use super::helpers::{TokenCursor, is_identifier};
use super::tokenizer::{Token, TokenValue};
use crate::error::ParseError;
use crate::script::ast::{
    ActionCommand, ActionType, Command, EmailInput, IfClause, IfCommand, InputCommand,
    NumericInput, RandomClause, RandomCommand, SetCommand, SetInput, SetOption, TextInput,
    TimeInput, VariableString, evaluate_time,
};
use crate::script::expr::Expr;

/// `if` 子句
const IF_CLAUSES: &[&str] = &["elseif", "else", "endif"];

/// `random` 子句
const RANDOM_CLAUSES: &[&str] = &["or", "endrandom"];

/// 命令从命令名到 `>>` 之间的原始源码
struct CommandContent {
    text: String,
    line: usize,
    column: usize,
}

/// 属性命令的属性表
struct Attributes {
    /// 命令的 `<<` 记号
    start: Token,
    /// 按出现顺序保存，值为引号字符串记号
    attrs: Vec<(String, Token)>,
}

impl Attributes {
    fn insert(&mut self, name: String, token: Token) {
        match self.attrs.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = token,
            None => self.attrs.push((name, token)),
        }
    }

    fn token(&self, name: &str) -> Option<&Token> {
        self.attrs.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    fn remove(&mut self, name: &str) {
        self.attrs.retain(|(n, _)| n != name);
    }

    /// 缺少必需属性，报告在命令开始处
    fn missing(&self, name: &str) -> ParseError {
        self.start.error(format!("缺少必需属性 \"{name}\""))
    }

    fn value(
        &self,
        name: &str,
        required: bool,
    ) -> Result<Option<(&VariableString, &Token)>, ParseError> {
        match self.token(name) {
            Some(token) => match &token.value {
                TokenValue::QuotedString(value) => Ok(Some((value, token))),
                other => Err(token.error(format!("应为引号字符串，实际为 {}", other.kind()))),
            },
            None if required => Err(self.missing(name)),
            None => Ok(None),
        }
    }

    fn required(&self, name: &str) -> Result<VariableString, ParseError> {
        self.value(name, true)?
            .map(|(value, _)| value.clone())
            .ok_or_else(|| self.missing(name))
    }

    /// 读取不含变量引用的属性值
    fn plain_text(
        &self,
        name: &str,
        required: bool,
    ) -> Result<Option<(String, &Token)>, ParseError> {
        let Some((value, token)) = self.value(name, required)? else {
            return Ok(None);
        };
        if !value.is_plain_text() {
            return Err(token.error(format!("属性 \"{name}\" 的值不是纯文本")));
        }
        Ok(Some((value.to_raw_string(), token)))
    }

    /// 读取只含一个变量引用的属性值，返回变量名
    fn variable(&self, name: &str) -> Result<String, ParseError> {
        let Some((value, token)) = self.value(name, true)? else {
            return Err(self.missing(name));
        };
        value
            .as_single_variable()
            .map(str::to_string)
            .ok_or_else(|| token.error(format!("属性 \"{name}\" 的值不是变量")))
    }

    fn int(&self, name: &str, min: Option<i64>) -> Result<Option<i64>, ParseError> {
        let Some((text, token)) = self.plain_text(name, false)? else {
            return Ok(None);
        };
        let value: i64 = text
            .parse()
            .map_err(|_| token.error(format!("属性 \"{name}\" 的值无效：{text}")))?;
        if let Some(min) = min.filter(|&min| value < min) {
            return Err(token.error(format!("属性 \"{name}\" 的值小于 {min}")));
        }
        Ok(Some(value))
    }

    fn float(&self, name: &str, min: f64) -> Result<Option<f64>, ParseError> {
        let Some((text, token)) = self.plain_text(name, false)? else {
            return Ok(None);
        };
        let value = text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| token.error(format!("属性 \"{name}\" 的值无效：{text}")))?;
        if value < min {
            return Err(token.error(format!("属性 \"{name}\" 的值小于 {min}")));
        }
        Ok(Some(value))
    }

    fn bool(&self, name: &str) -> Result<Option<bool>, ParseError> {
        let Some((text, token)) = self.plain_text(name, false)? else {
            return Ok(None);
        };
        if text.eq_ignore_ascii_case("true") {
            Ok(Some(true))
        } else if text.eq_ignore_ascii_case("false") {
            Ok(Some(false))
        } else {
            Err(token.error(format!("属性 \"{name}\" 的值无效：{text}")))
        }
    }

    /// 读取时间属性，纯文本取值在解析时规范化为 `HH:MM` 或 `now`
    fn time(&self, name: &str) -> Result<Option<VariableString>, ParseError> {
        let Some((value, token)) = self.value(name, false)? else {
            return Ok(None);
        };
        if !value.is_plain_text() {
            return Ok(Some(value.clone()));
        }
        let text = value.to_raw_string();
        evaluate_time(&text)
            .map(|time| Some(VariableString::from_text(time)))
            .ok_or_else(|| token.error(format!("属性 \"{name}\" 的值无效：{text}")))
    }
}

impl BodyParser<'_> {
    /// 读取命令名
    ///
    /// 调用时游标位于 `<<`，返回后游标停在命令名记号上。
    pub(super) fn read_command_name(
        &self,
        start: &Token,
        cursor: &mut TokenCursor,
    ) -> Result<String, ParseError> {
        cursor.advance();
        cursor.skip_whitespace();
        let Some(token) = cursor.current() else {
            return Err(start.error("命令未结束"));
        };
        let Some(text) = token.text() else {
            return Err(token.error(format!("应为命令名，实际为 {}", token.value.kind())));
        };
        Ok(text.split_whitespace().next().unwrap_or_default().to_string())
    }

    /// 从 `<<` 开始解析命令，调用时游标位于 `start`
    pub(super) fn parse_command_from_start(
        &mut self,
        start: &Token,
        cursor: &mut TokenCursor,
        valid_commands: &[&str],
    ) -> Result<Command, ParseError> {
        let name = self.read_command_name(start, cursor)?;
        self.parse_command_from_name(start, &name, cursor, valid_commands)
    }

    /// 游标停在命令名记号上时解析命令
    pub(super) fn parse_command_from_name(
        &mut self,
        start: &Token,
        name: &str,
        cursor: &mut TokenCursor,
        valid_commands: &[&str],
    ) -> Result<Command, ParseError> {
        if !valid_commands.contains(&name) {
            return Err(unexpected_command(start, name, cursor));
        }
        match name {
            "action" => self.parse_action(start, cursor).map(Command::Action),
            "if" => self.parse_if(start, cursor).map(Command::If),
            "random" => self.parse_random(start, cursor).map(Command::Random),
            "set" => self.parse_set(start, cursor).map(Command::Set),
            "input" => self.parse_input(start, cursor).map(Command::Input),
            _ => Err(unexpected_command(start, name, cursor)),
        }
    }

    fn parse_action(
        &mut self,
        start: &Token,
        cursor: &mut TokenCursor,
    ) -> Result<ActionCommand, ParseError> {
        let mut attrs = parse_attributes(start, cursor)?;
        let (type_name, type_token) = attrs
            .plain_text("type", true)?
            .ok_or_else(|| start.error("缺少必需属性 \"type\""))?;
        let action_type = ActionType::from_name(&type_name)
            .ok_or_else(|| type_token.error(format!("属性 \"type\" 的值无效：{type_name}")))?;
        attrs.remove("type");
        let value = attrs.required("value")?;
        attrs.remove("value");
        let parameters = attrs
            .attrs
            .into_iter()
            .filter_map(|(name, token)| match token.value {
                TokenValue::QuotedString(value) => Some((name, value)),
                _ => None,
            })
            .collect();
        Ok(ActionCommand {
            action_type,
            value,
            parameters,
        })
    }

    fn parse_if(
        &mut self,
        start: &Token,
        cursor: &mut TokenCursor,
    ) -> Result<IfCommand, ParseError> {
        let content = read_command_content(start, cursor)?;
        let mut condition = Some(parse_condition(start, &content, "if")?);
        let mut command = IfCommand {
            clauses: Vec::new(),
            else_body: None,
        };
        loop {
            let result = self.parse_until_clause(cursor, BODY_COMMANDS, IF_CLAUSES)?;
            let Some(clause) = result.clause else {
                return Err(start.error("命令 \"if\" 未结束"));
            };
            match condition.take() {
                Some(condition) => command.clauses.push(IfClause {
                    condition,
                    body: result.body,
                }),
                None => command.else_body = Some(result.body),
            }
            let content = read_command_content(&clause.token, cursor)?;
            match clause.name.as_str() {
                "elseif" => {
                    if command.else_body.is_some() {
                        return Err(clause.token.error("\"else\" 之后出现了 \"elseif\""));
                    }
                    condition = Some(parse_condition(&clause.token, &content, "elseif")?);
                }
                "else" => {
                    if command.else_body.is_some() {
                        return Err(clause.token.error("存在多个 \"else\""));
                    }
                    expect_name_only(&clause.token, &content, "else")?;
                }
                _ => {
                    expect_name_only(&clause.token, &content, "endif")?;
                    return Ok(command);
                }
            }
        }
    }

    fn parse_random(
        &mut self,
        start: &Token,
        cursor: &mut TokenCursor,
    ) -> Result<RandomCommand, ParseError> {
        let attrs = parse_attributes(start, cursor)?;
        let mut weight = attrs.float("weight", 0.0)?.unwrap_or(1.0);
        let mut command = RandomCommand {
            clauses: Vec::new(),
        };
        loop {
            let result = self.parse_until_clause(cursor, BODY_COMMANDS, RANDOM_CLAUSES)?;
            let Some(clause) = result.clause else {
                return Err(start.error("命令 \"random\" 未结束"));
            };
            command.clauses.push(RandomClause {
                weight,
                body: result.body,
            });
            let attrs = parse_attributes(&clause.token, cursor)?;
            if clause.name == "endrandom" {
                return Ok(command);
            }
            weight = attrs.float("weight", 0.0)?.unwrap_or(1.0);
        }
    }

    fn parse_set(
        &mut self,
        start: &Token,
        cursor: &mut TokenCursor,
    ) -> Result<SetCommand, ParseError> {
        let content = read_command_content(start, cursor)?;
        let expression = parse_command_expression(start, &content, "set")?;
        let Some((_, value)) = expression.as_assignment() else {
            return Err(start.error("\"set\" 命令中的表达式不是赋值"));
        };
        if value.contains_assignment() {
            return Err(start.error("\"set\" 命令的值操作数中出现了赋值表达式"));
        }
        Ok(SetCommand { expression })
    }

    fn parse_input(
        &mut self,
        start: &Token,
        cursor: &mut TokenCursor,
    ) -> Result<InputCommand, ParseError> {
        let attrs = parse_attributes(start, cursor)?;
        let (input_type, type_token) = attrs
            .plain_text("type", true)?
            .ok_or_else(|| start.error("缺少必需属性 \"type\""))?;
        match input_type.as_str() {
            "text" => parse_text_input(&attrs).map(InputCommand::Text),
            "longtext" => parse_text_input(&attrs).map(InputCommand::Longtext),
            "email" => Ok(InputCommand::Email(EmailInput {
                variable: attrs.variable("value")?,
            })),
            "numeric" => Ok(InputCommand::Numeric(NumericInput {
                variable: attrs.variable("value")?,
                min: attrs.int("min", None)?,
                max: attrs.int("max", None)?,
            })),
            "set" => parse_set_input(&attrs).map(InputCommand::Set),
            "time" => {
                let mut input = TimeInput::new(attrs.variable("value")?);
                if let Some(granularity) = attrs.int("granularityMinutes", Some(1))? {
                    input.granularity_minutes = granularity;
                }
                input.start_time = attrs.time("startTime")?;
                input.min_time = attrs.time("minTime")?;
                input.max_time = attrs.time("maxTime")?;
                Ok(InputCommand::Time(input))
            }
            _ => Err(type_token.error(format!("属性 \"type\" 的值无效：{input_type}"))),
        }
    }
}

/// 报告在命令名记号上
fn unexpected_command(start: &Token, name: &str, cursor: &TokenCursor) -> ParseError {
    cursor
        .current()
        .unwrap_or(start)
        .error(format!("意外的命令：{name}"))
}

fn parse_text_input(attrs: &Attributes) -> Result<TextInput, ParseError> {
    let mut input = TextInput::new(attrs.variable("value")?);
    input.min = attrs.int("min", None)?;
    input.max = attrs.int("max", None)?;
    let flags: [(&str, &mut bool); 9] = [
        ("allowNumbers", &mut input.allow_numbers),
        ("allowSpecialCharacters", &mut input.allow_special_characters),
        ("allowSpaces", &mut input.allow_spaces),
        ("capCharacters", &mut input.cap_characters),
        ("capWords", &mut input.cap_words),
        ("capSentences", &mut input.cap_sentences),
        ("forceCapCharacters", &mut input.force_cap_characters),
        ("forceCapWords", &mut input.force_cap_words),
        ("forceCapSentences", &mut input.force_cap_sentences),
    ];
    for (name, flag) in flags {
        if let Some(value) = attrs.bool(name)? {
            *flag = value;
        }
    }
    Ok(input)
}

/// 选项成对出现：`value1`/`option1`、`value2`/`option2`……
fn parse_set_input(attrs: &Attributes) -> Result<SetInput, ParseError> {
    let mut options = Vec::new();
    for index in 1.. {
        let value_name = format!("value{index}");
        let option_name = format!("option{index}");
        match (attrs.token(&value_name), attrs.token(&option_name)) {
            (None, None) => break,
            (Some(_), None) => {
                return Err(attrs.start.error(format!(
                    "发现属性 \"{value_name}\" 但缺少属性 \"{option_name}\""
                )));
            }
            (None, Some(_)) => {
                return Err(attrs.start.error(format!(
                    "发现属性 \"{option_name}\" 但缺少属性 \"{value_name}\""
                )));
            }
            (Some(_), Some(_)) => options.push(SetOption {
                variable: attrs.variable(&value_name)?,
                text: attrs.required(&option_name)?,
            }),
        }
    }
    Ok(SetInput { options })
}

/// 解析属性命令，调用时游标停在命令名记号上，返回后游标位于 `>>` 之后
///
/// 命令名记号中命令名之后的部分按属性文本处理。
fn parse_attributes(start: &Token, cursor: &mut TokenCursor) -> Result<Attributes, ParseError> {
    let mut attrs = Attributes {
        start: start.clone(),
        attrs: Vec::new(),
    };
    let Some(name_token) = cursor.current_cloned() else {
        return Err(start.error("命令未结束"));
    };
    let name_text = name_token.text().unwrap_or_default().trim_start();
    let rest = name_text
        .find(char::is_whitespace)
        .map(|i| name_text[i..].trim())
        .unwrap_or_default();
    let mut pending = (!rest.is_empty()).then(|| (rest.to_string(), name_token.clone()));
    if pending.is_none() {
        cursor.advance();
        cursor.skip_whitespace();
    }
    loop {
        let (text, token) = match pending.take() {
            Some(pending) => pending,
            None => {
                let Some(token) = cursor.current_cloned() else {
                    return Err(start.error("命令未结束"));
                };
                match &token.value {
                    TokenValue::CommandEnd => {
                        cursor.advance();
                        return Ok(attrs);
                    }
                    TokenValue::Text(text) => (text.trim().to_string(), token.clone()),
                    other => {
                        return Err(token.error(format!("应为属性名，实际为 {}", other.kind())));
                    }
                }
            }
        };
        let (name, after) = match text.split_once('=') {
            Some((name, after)) => (name.trim(), Some(after)),
            None => (text.as_str(), None),
        };
        if !is_identifier(name) {
            return Err(token.error(format!("无效的属性名：{name}")));
        }
        let Some(after) = after else {
            return Err(token.error(format!("属性名 {name} 后缺少字符 =")));
        };
        if !after.trim().is_empty() {
            return Err(token.error("= 之后出现了意外的文本"));
        }
        cursor.advance();
        cursor.skip_whitespace();
        let Some(value_token) = cursor.current_cloned() else {
            return Err(start.error("命令未结束"));
        };
        if !matches!(value_token.value, TokenValue::QuotedString(_)) {
            return Err(value_token.error(format!(
                "应为引号字符串，实际为 {}",
                value_token.value.kind()
            )));
        }
        attrs.insert(name.to_string(), value_token);
        cursor.advance();
        cursor.skip_whitespace();
    }
}

/// 读取命令名到 `>>` 之间的原始源码，返回后游标位于 `>>` 之后
fn read_command_content(
    start: &Token,
    cursor: &mut TokenCursor,
) -> Result<CommandContent, ParseError> {
    let (line, column) = cursor
        .current()
        .map_or((start.line, start.column), |t| (t.line, t.column));
    let mut text = String::new();
    while let Some(token) = cursor.current() {
        if token.value == TokenValue::CommandEnd {
            cursor.advance();
            return Ok(CommandContent { text, line, column });
        }
        text.push_str(&token.raw);
        cursor.advance();
    }
    Err(start.error("命令未结束"))
}

/// 解析命令名之后的表达式
fn parse_command_expression(
    start: &Token,
    content: &CommandContent,
    name: &str,
) -> Result<Expr, ParseError> {
    let text = content.text.trim_start();
    let offset = content.text.len() - text.len();
    let rest = text.strip_prefix(name).unwrap_or(text);
    if rest.trim().is_empty() {
        return Err(start.error(format!("命令 \"{name}\" 缺少表达式")));
    }
    let column = content.column + content.text[..offset].chars().count() + name.chars().count();
    parse_expression(rest, content.line, column)
}

/// 解析 `if` / `elseif` 的条件，条件中不允许赋值
fn parse_condition(
    start: &Token,
    content: &CommandContent,
    name: &str,
) -> Result<Expr, ParseError> {
    let condition = parse_command_expression(start, content, name)?;
    if condition.contains_assignment() {
        return Err(start.error(format!("\"{name}\" 命令中出现了赋值表达式")));
    }
    Ok(condition)
}

/// `else` / `endif` 之后不能有其他内容
fn expect_name_only(
    start: &Token,
    content: &CommandContent,
    name: &str,
) -> Result<(), ParseError> {
    if content.text.trim() != name {
        return Err(start.error(format!("命令名 {name} 之后出现了意外的内容")));
    }
    Ok(())
}

//! # 表达式解析器
//!
//! 递归下降表达式解析器，支持变量、字面量、算术、比较、逻辑运算和赋值。

use crate::error::ParseError;
use crate::script::expr::{BinaryOp, Expr};
use crate::value::Value;

/// 解析表达式字符串
///
/// 支持的语法:
/// - 字面量: `"string"`, `'string'`, `12`, `1.5`, `true`, `false`, `null`
/// - 变量: `$var_name`
/// - 算术: `+ - * /`，取负 `-expr`
/// - 比较: `== != < <= > >=`
/// - 逻辑: `&&`/`and`, `||`/`or`, `!`/`not`
/// - 赋值: `$var = expr`（右结合，优先级最低）
/// - 括号: `(expr)`
///
/// `line` / `column` 为表达式在源码中的起始位置，用于错误报告。
pub fn parse_expression(input: &str, line: usize, column: usize) -> Result<Expr, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::syntax(line, column, "空表达式"));
    }

    let mut parser = ExprParser::new(input, line, column);
    let expr = parser.parse_assignment()?;
    parser.skip_whitespace();
    if !parser.remaining().is_empty() {
        return Err(parser.error(format!(
            "表达式末尾存在无法解析的内容: '{}'",
            parser.remaining()
        )));
    }
    Ok(expr)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// 表达式解析器
struct ExprParser<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> ExprParser<'a> {
    fn new(input: &'a str, line: usize, column: usize) -> Self {
        Self {
            input,
            pos: 0,
            line,
            column,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::syntax(
            self.line,
            self.column,
            format!("无效的表达式：{}", message.into()),
        )
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// 当前位置是否为完整的关键字（大小写不敏感，后面不能紧跟标识符字符）
    fn starts_with_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        match remaining.get(..keyword.len()) {
            Some(head) if head.eq_ignore_ascii_case(keyword) => !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(is_ident_char),
            _ => false,
        }
    }

    fn consume_keyword(&mut self, keyword: &str) {
        self.pos += keyword.len();
        self.skip_whitespace();
    }

    /// 尝试消费关键字
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.starts_with_keyword(keyword) {
            self.consume_keyword(keyword);
            true
        } else {
            false
        }
    }

    /// 尝试消费运算符符号
    fn eat(&mut self, symbol: &str) -> bool {
        if self.remaining().starts_with(symbol) {
            self.pos += symbol.len();
            self.skip_whitespace();
            true
        } else {
            false
        }
    }

    /// 解析赋值表达式（最低优先级，右结合）
    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        if self.peek_char() == Some('$') {
            self.consume_char();
            let name = self.parse_identifier()?;
            self.skip_whitespace();
            if self.remaining().starts_with('=') && !self.remaining().starts_with("==") {
                self.consume_char();
                self.skip_whitespace();
                let value = self.parse_assignment()?;
                return Ok(Expr::assign(name, value));
            }
            // 不是赋值，回退后按普通表达式解析
            self.pos = start;
        }
        self.parse_or()
    }

    /// 解析 or 表达式
    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;

        loop {
            self.skip_whitespace();
            if !(self.eat("||") || self.eat_keyword("or")) {
                break;
            }
            let right = self.parse_and()?;
            left = Expr::or(left, right);
        }

        Ok(left)
    }

    /// 解析 and 表达式
    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;

        loop {
            self.skip_whitespace();
            if !(self.eat("&&") || self.eat_keyword("and")) {
                break;
            }
            let right = self.parse_equality()?;
            left = Expr::and(left, right);
        }

        Ok(left)
    }

    /// 解析相等比较
    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;

        loop {
            self.skip_whitespace();
            let op = if self.eat("==") {
                BinaryOp::Eq
            } else if self.eat("!=") {
                BinaryOp::NotEq
            } else {
                break;
            };
            let right = self.parse_comparison()?;
            left = Expr::binary(op, left, right);
        }

        Ok(left)
    }

    /// 解析大小比较
    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;

        loop {
            self.skip_whitespace();
            let op = if self.eat("<=") {
                BinaryOp::Le
            } else if self.eat(">=") {
                BinaryOp::Ge
            } else if self.eat("<") {
                BinaryOp::Lt
            } else if self.eat(">") {
                BinaryOp::Gt
            } else {
                break;
            };
            let right = self.parse_additive()?;
            left = Expr::binary(op, left, right);
        }

        Ok(left)
    }

    /// 解析加减
    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;

        loop {
            self.skip_whitespace();
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }

        Ok(left)
    }

    /// 解析乘除
    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;

        loop {
            self.skip_whitespace();
            let op = if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("/") {
                BinaryOp::Div
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }

        Ok(left)
    }

    /// 解析一元运算
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        if self.remaining().starts_with('!') && !self.remaining().starts_with("!=") {
            self.consume_char();
            let expr = self.parse_unary()?;
            Ok(Expr::not(expr))
        } else if self.starts_with_keyword("not") {
            self.consume_keyword("not");
            let expr = self.parse_unary()?;
            Ok(Expr::not(expr))
        } else if self.peek_char() == Some('-') {
            self.consume_char();
            let expr = self.parse_unary()?;
            Ok(Expr::Neg(Box::new(expr)))
        } else {
            self.parse_primary()
        }
    }

    /// 解析基本表达式
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();

        let c = self
            .peek_char()
            .ok_or_else(|| self.error("表达式意外结束"))?;

        match c {
            // 括号
            '(' => {
                self.consume_char();
                let expr = self.parse_assignment()?;
                self.skip_whitespace();
                if self.peek_char() != Some(')') {
                    return Err(self.error("缺少右括号 ')'"));
                }
                self.consume_char();
                Ok(expr)
            }

            // 变量
            '$' => {
                self.consume_char();
                let name = self.parse_identifier()?;
                Ok(Expr::var(name))
            }

            // 字符串字面量
            '"' | '\'' => {
                let s = self.parse_string_literal(c)?;
                Ok(Expr::string(s))
            }

            c if c.is_ascii_digit() => self.parse_number(),

            _ => {
                if self.starts_with_keyword("true") {
                    self.consume_keyword("true");
                    Ok(Expr::bool(true))
                } else if self.starts_with_keyword("false") {
                    self.consume_keyword("false");
                    Ok(Expr::bool(false))
                } else if self.starts_with_keyword("null") {
                    self.consume_keyword("null");
                    Ok(Expr::Literal(Value::Null))
                } else {
                    Err(self.error(format!("意外字符: '{}'", c)))
                }
            }
        }
    }

    /// 解析标识符
    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        let start = self.pos;

        match self.peek_char() {
            Some(c) if is_ident_start(c) => {
                self.consume_char();
            }
            _ => return Err(self.error("期望变量名")),
        }
        while let Some(c) = self.peek_char() {
            if is_ident_char(c) {
                self.consume_char();
            } else {
                break;
            }
        }

        Ok(self.input[start..self.pos].to_string())
    }

    /// 解析字符串字面量，`\` 转义下一个字符
    fn parse_string_literal(&mut self, quote: char) -> Result<String, ParseError> {
        self.consume_char(); // 消费开始引号
        let mut result = String::new();

        while let Some(c) = self.consume_char() {
            if c == quote {
                return Ok(result);
            }
            if c == '\\' {
                match self.consume_char() {
                    Some(escaped) => result.push(escaped),
                    None => break,
                }
            } else {
                result.push(c);
            }
        }

        Err(self.error(format!("字符串字面量未闭合，缺少 '{}'", quote)))
    }

    /// 解析数字（整数或小数）
    fn parse_number(&mut self) -> Result<Expr, ParseError> {
        let start = self.pos;
        let mut is_float = false;

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.consume_char();
            } else if c == '.' && !is_float {
                is_float = true;
                self.consume_char();
            } else {
                break;
            }
        }

        let num_str = &self.input[start..self.pos];
        let parsed = if is_float {
            num_str.parse::<f64>().ok().map(Value::Float)
        } else {
            num_str.parse::<i64>().ok().map(Value::Int)
        };
        parsed
            .map(Expr::Literal)
            .ok_or_else(|| self.error(format!("无法解析数字: '{}'", num_str)))
    }
}

//! # 表达式模块
//!
//! 定义 `if` / `set` 命令使用的表达式类型和求值器。
//!
//! ## 设计原则
//!
//! - 求值是**确定性**的，不依赖 IO 或真实时间
//! - 变量读写通过 [`EvalContext`] 完成，求值器不关心变量的存储方式
//! - 未设置的变量求值为 `null`，不视为错误
//!
//! ## 支持的操作
//!
//! - 算术: `+`, `-`, `*`, `/`（`+` 任一侧为字符串时做拼接）
//! - 比较: `==`, `!=`, `<`, `<=`, `>`, `>=`
//! - 逻辑: `&&`/`and`, `||`/`or`, `!`/`not`
//! - 赋值: `$var = expr`（只允许出现在 `set` 命令中）

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Value;

/// 二元运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// 源码中的运算符写法
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    /// 优先级，数值越大结合越紧
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 2,
            BinaryOp::And => 3,
            BinaryOp::Eq | BinaryOp::NotEq => 4,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div => 7,
        }
    }
}

const PREC_ASSIGN: u8 = 1;
const PREC_UNARY: u8 = 8;
const PREC_ATOM: u8 = 9;

/// 表达式 AST 节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// 字面量值
    Literal(Value),

    /// 变量引用
    ///
    /// 变量名不包含 `$` 前缀
    Variable(String),

    /// 逻辑非
    Not(Box<Expr>),

    /// 取负
    Neg(Box<Expr>),

    /// 二元运算
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// 赋值
    Assign { target: String, value: Box<Expr> },
}

impl Expr {
    /// 创建字符串字面量
    pub fn string(s: impl Into<String>) -> Self {
        Self::Literal(Value::String(s.into()))
    }

    /// 创建布尔字面量
    pub fn bool(b: bool) -> Self {
        Self::Literal(Value::Bool(b))
    }

    /// 创建整数字面量
    pub fn int(n: i64) -> Self {
        Self::Literal(Value::Int(n))
    }

    /// 创建变量引用
    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// 创建二元运算
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// 创建相等比较
    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    /// 创建逻辑与
    pub fn and(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    /// 创建逻辑或
    pub fn or(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Or, left, right)
    }

    /// 创建逻辑非
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Self::Not(Box::new(expr))
    }

    /// 创建赋值
    pub fn assign(target: impl Into<String>, value: Expr) -> Self {
        Self::Assign {
            target: target.into(),
            value: Box::new(value),
        }
    }

    /// 若本身是赋值表达式，返回 (目标变量名, 值操作数)
    pub fn as_assignment(&self) -> Option<(&str, &Expr)> {
        match self {
            Expr::Assign { target, value } => Some((target, value)),
            _ => None,
        }
    }

    /// 直接子表达式
    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Variable(_) => Vec::new(),
            Expr::Not(inner) | Expr::Neg(inner) => vec![&**inner],
            Expr::Binary { left, right, .. } => vec![&**left, &**right],
            Expr::Assign { value, .. } => vec![&**value],
        }
    }

    /// 全部后代表达式（不含自身），先序
    pub fn descendants(&self) -> Vec<&Expr> {
        let mut result = Vec::new();
        let mut stack: Vec<&Expr> = self.children().into_iter().rev().collect();
        while let Some(expr) = stack.pop() {
            result.push(expr);
            stack.extend(expr.children().into_iter().rev());
        }
        result
    }

    /// 自身或任一后代是否为赋值
    pub fn contains_assignment(&self) -> bool {
        self.as_assignment().is_some()
            || self
                .descendants()
                .iter()
                .any(|e| e.as_assignment().is_some())
    }

    /// 收集表达式中出现的全部变量名（含赋值目标）
    pub fn collect_variables(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Variable(name) => {
                names.insert(name.clone());
            }
            Expr::Assign { target, value } => {
                names.insert(target.clone());
                value.collect_variables(names);
            }
            other => {
                for child in other.children() {
                    child.collect_variables(names);
                }
            }
        }
    }

    /// 表达式中出现的全部变量名
    pub fn variable_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_variables(&mut names);
        names
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Literal(_) | Expr::Variable(_) => PREC_ATOM,
            Expr::Not(_) | Expr::Neg(_) => PREC_UNARY,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Assign { .. } => PREC_ASSIGN,
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, min_prec: u8) -> fmt::Result {
        let paren = self.precedence() < min_prec;
        if paren {
            f.write_str("(")?;
        }
        match self {
            Expr::Literal(value) => fmt_literal(value, f)?,
            Expr::Variable(name) => write!(f, "${name}")?,
            Expr::Not(inner) => {
                f.write_str("!")?;
                inner.fmt_prec(f, PREC_UNARY)?;
            }
            Expr::Neg(inner) => {
                f.write_str("-")?;
                inner.fmt_prec(f, PREC_UNARY)?;
            }
            Expr::Binary { op, left, right } => {
                let prec = op.precedence();
                left.fmt_prec(f, prec)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_prec(f, prec + 1)?;
            }
            Expr::Assign { target, value } => {
                write!(f, "${target} = ")?;
                value.fmt_prec(f, PREC_ASSIGN)?;
            }
        }
        if paren {
            f.write_str(")")?;
        }
        Ok(())
    }
}

fn fmt_literal(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::String(s) => {
            f.write_str("\"")?;
            for c in s.chars() {
                if c == '"' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{c}")?;
            }
            f.write_str("\"")
        }
        Value::Float(x) => write!(f, "{x:?}"),
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

/// 表达式求值错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// 类型不匹配
    #[error("类型不匹配: 期望 {expected}，实际 {actual} ({context})")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
        context: String,
    },

    /// 除数为零
    #[error("除数为零")]
    DivisionByZero,

    /// 无效的时间值（time 输入的边界在执行时才确定）
    #[error("无效的时间值: {value}")]
    InvalidTime { value: String },
}

/// 表达式求值上下文
///
/// 提供变量读写能力
pub trait EvalContext {
    /// 获取变量值
    fn get_var(&self, name: &str) -> Option<Value>;

    /// 设置变量值
    fn set_var(&mut self, name: &str, value: Value);
}

impl EvalContext for HashMap<String, Value> {
    fn get_var(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn set_var(&mut self, name: &str, value: Value) {
        self.insert(name.to_string(), value);
    }
}

/// 对表达式求值
///
/// # 参数
///
/// - `expr`: 要求值的表达式
/// - `ctx`: 求值上下文（赋值表达式会写入其中）
///
/// # 返回
///
/// 求值结果或错误
pub fn evaluate<C: EvalContext + ?Sized>(expr: &Expr, ctx: &mut C) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::Variable(name) => Ok(ctx.get_var(name).unwrap_or(Value::Null)),

        Expr::Not(inner) => {
            let value = evaluate(inner, ctx)?;
            Ok(Value::Bool(!value.is_truthy()))
        }

        Expr::Neg(inner) => match evaluate(inner, ctx)? {
            Value::Int(n) => Ok(n
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Float(-(n as f64)))),
            Value::Float(x) => Ok(Value::Float(-x)),
            other => Err(mismatch("number", &other, "取负操作数")),
        },

        Expr::Binary { op, left, right } => match op {
            // 短路求值
            BinaryOp::And => {
                if !evaluate(left, ctx)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(evaluate(right, ctx)?.is_truthy()))
            }
            BinaryOp::Or => {
                if evaluate(left, ctx)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(evaluate(right, ctx)?.is_truthy()))
            }
            _ => {
                let left_val = evaluate(left, ctx)?;
                let right_val = evaluate(right, ctx)?;
                apply_binary(*op, left_val, right_val)
            }
        },

        Expr::Assign { target, value } => {
            let result = evaluate(value, ctx)?;
            ctx.set_var(target, result.clone());
            Ok(result)
        }
    }
}

/// 将表达式求值为布尔值
///
/// 便捷函数，用于条件分支
pub fn evaluate_to_bool<C: EvalContext + ?Sized>(expr: &Expr, ctx: &mut C) -> Result<bool, EvalError> {
    Ok(evaluate(expr, ctx)?.is_truthy())
}

fn mismatch(expected: &'static str, actual: &Value, context: &str) -> EvalError {
    EvalError::TypeMismatch {
        expected,
        actual: actual.type_name().to_string(),
        context: context.to_string(),
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left.loose_eq(&right))),
        BinaryOp::NotEq => Ok(Value::Bool(!left.loose_eq(&right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &left, &right),
        BinaryOp::Add if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) => {
            Ok(Value::String(format!("{left}{right}")))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(op, &left, &right),
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
            let a = left
                .as_f64()
                .ok_or_else(|| mismatch("number", left, op.symbol()))?;
            let b = right
                .as_f64()
                .ok_or_else(|| mismatch("number", right, op.symbol()))?;
            match a.partial_cmp(&b) {
                Some(ordering) => ordering,
                // NaN 参与的比较恒为假
                None => return Ok(Value::Bool(false)),
            }
        }
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            _ => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                // i64::MIN / -1 溢出时按浮点数计算
                match a.checked_rem(b) {
                    Some(0) => a.checked_div(b),
                    _ => None,
                }
            }
        };
        if let Some(n) = exact {
            return Ok(Value::Int(n));
        }
    }
    let a = left
        .as_f64()
        .ok_or_else(|| mismatch("number", left, op.symbol()))?;
    let b = right
        .as_f64()
        .ok_or_else(|| mismatch("number", right, op.symbol()))?;
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        _ => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            a / b
        }
    };
    Ok(Value::Float(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> HashMap<String, Value> {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), Value::from("Ava"));
        vars.insert("age".to_string(), Value::Int(20));
        vars
    }

    #[test]
    fn test_literal_and_variable() {
        let mut vars = ctx();
        assert_eq!(evaluate(&Expr::int(3), &mut vars).unwrap(), Value::Int(3));
        assert_eq!(evaluate(&Expr::var("name"), &mut vars).unwrap(), Value::from("Ava"));
        assert_eq!(evaluate(&Expr::var("missing"), &mut vars).unwrap(), Value::Null);
    }

    #[test]
    fn test_comparison() {
        let mut vars = ctx();
        let expr = Expr::binary(BinaryOp::Ge, Expr::var("age"), Expr::int(18));
        assert!(evaluate_to_bool(&expr, &mut vars).unwrap());

        let expr = Expr::binary(BinaryOp::Lt, Expr::var("name"), Expr::string("Bob"));
        assert!(evaluate_to_bool(&expr, &mut vars).unwrap());

        let expr = Expr::binary(BinaryOp::Lt, Expr::var("name"), Expr::int(1));
        assert!(matches!(
            evaluate(&expr, &mut vars),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_short_circuit_skips_assignment() {
        let mut vars = ctx();
        let expr = Expr::and(Expr::bool(false), Expr::assign("x", Expr::int(1)));
        assert_eq!(evaluate(&expr, &mut vars).unwrap(), Value::Bool(false));
        assert!(!vars.contains_key("x"));
    }

    #[test]
    fn test_arithmetic() {
        let mut vars = ctx();
        let expr = Expr::binary(BinaryOp::Add, Expr::var("age"), Expr::int(1));
        assert_eq!(evaluate(&expr, &mut vars).unwrap(), Value::Int(21));

        let expr = Expr::binary(BinaryOp::Div, Expr::int(7), Expr::int(2));
        assert_eq!(evaluate(&expr, &mut vars).unwrap(), Value::Float(3.5));

        let expr = Expr::binary(BinaryOp::Div, Expr::int(8), Expr::int(2));
        assert_eq!(evaluate(&expr, &mut vars).unwrap(), Value::Int(4));

        let expr = Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0));
        assert_eq!(evaluate(&expr, &mut vars), Err(EvalError::DivisionByZero));

        let expr = Expr::binary(BinaryOp::Div, Expr::int(i64::MIN), Expr::int(-1));
        assert_eq!(evaluate(&expr, &mut vars).unwrap(), Value::Float(-(i64::MIN as f64)));

        let expr = Expr::binary(BinaryOp::Div, Expr::int(i64::MIN), Expr::int(2));
        assert_eq!(evaluate(&expr, &mut vars).unwrap(), Value::Int(i64::MIN / 2));

        let expr = Expr::binary(BinaryOp::Add, Expr::string("n="), Expr::var("age"));
        assert_eq!(evaluate(&expr, &mut vars).unwrap(), Value::from("n=20"));
    }

    #[test]
    fn test_assignment_writes_context() {
        let mut vars = ctx();
        let expr = Expr::assign(
            "age",
            Expr::binary(BinaryOp::Add, Expr::var("age"), Expr::int(1)),
        );
        evaluate(&expr, &mut vars).unwrap();
        assert_eq!(vars["age"], Value::Int(21));
    }

    #[test]
    fn test_descendants_and_assignment_detection() {
        let expr = Expr::or(Expr::var("a"), Expr::assign("b", Expr::int(1)));
        assert_eq!(expr.descendants().len(), 3);
        assert!(expr.contains_assignment());
        assert!(!Expr::eq(Expr::var("a"), Expr::int(1)).contains_assignment());
        let names: Vec<_> = expr.variable_names().into_iter().collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_display_minimal_parentheses() {
        let expr = Expr::binary(
            BinaryOp::Mul,
            Expr::binary(BinaryOp::Add, Expr::var("a"), Expr::int(1)),
            Expr::int(2),
        );
        assert_eq!(expr.to_string(), "($a + 1) * 2");

        let expr = Expr::assign("s", Expr::string("say \"hi\""));
        assert_eq!(expr.to_string(), r#"$s = "say \"hi\"""#);

        let expr = Expr::binary(
            BinaryOp::Sub,
            Expr::var("a"),
            Expr::binary(BinaryOp::Sub, Expr::var("b"), Expr::var("c")),
        );
        assert_eq!(expr.to_string(), "$a - ($b - $c)");
    }
}

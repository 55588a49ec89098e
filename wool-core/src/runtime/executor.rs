//! # Executor 模块
//!
//! 把节点正文执行为只包含已解析文本和客户端命令的正文。
//!
//! ## 职责
//!
//! - 文本：替换变量引用
//! - `if` / `random`：选出一个子句，把子句正文展开到输出中
//! - `set`：对变量上下文求值赋值
//! - `action` / `input`：解析其中的变量引用后原样输出
//! - 回复：执行陈述，命令留到回复被选中时再执行
//!
//! 执行不修改解析得到的节点，输出总是新的副本。

use rand::{Rng, RngCore};
use tracing::debug;

use crate::script::ast::{
    ActionCommand, Command, InputCommand, Node, NodeBody, RandomCommand, Reply, Segment,
    TimeInput, VariableString, evaluate_time,
};
use crate::script::expr::{EvalContext, EvalError, evaluate, evaluate_to_bool};

/// 节点执行器
///
/// 在一次执行期间借用变量上下文和随机数源。
pub struct Executor<'a> {
    ctx: &'a mut dyn EvalContext,
    rng: &'a mut dyn RngCore,
}

impl<'a> Executor<'a> {
    pub fn new(ctx: &'a mut dyn EvalContext, rng: &'a mut dyn RngCore) -> Self {
        Self { ctx, rng }
    }

    /// 执行节点，头部原样复制
    ///
    /// # 返回
    ///
    /// 执行后的节点；任何命令求值失败都会使整个节点执行失败
    pub fn execute_node(&mut self, node: &Node) -> Result<Node, EvalError> {
        let body = self.execute_body(&node.body, true)?;
        debug!(node = %node.title(), segments = body.segments().len(), "节点执行完成");
        Ok(Node::new(node.header.clone(), body))
    }

    /// 执行正文并规范化空白
    ///
    /// # 参数
    ///
    /// - `trim`: 是否去除末尾空白，只对节点顶层正文为 `true`
    pub fn execute_body(&mut self, body: &NodeBody, trim: bool) -> Result<NodeBody, EvalError> {
        let mut out = NodeBody::new();
        self.execute_into(body, &mut out)?;
        out.normalize_whitespace(trim);
        Ok(out)
    }

    /// 执行回复被选中时的命令
    ///
    /// `set` 在这里求值，`action` 解析后返回给调用方。
    pub fn execute_reply_commands(
        &mut self,
        commands: &[Command],
    ) -> Result<Vec<ActionCommand>, EvalError> {
        let mut actions = Vec::new();
        for command in commands {
            match command {
                Command::Set(cmd) => {
                    evaluate(&cmd.expression, &mut *self.ctx)?;
                }
                Command::Action(cmd) => actions.push(self.resolve_action(cmd)),
                _ => {}
            }
        }
        Ok(actions)
    }

    /// 执行正文，把结果追加到 `out`
    ///
    /// 子句正文直接展开到 `out`，其中的回复也加入 `out`。
    fn execute_into(&mut self, body: &NodeBody, out: &mut NodeBody) -> Result<(), EvalError> {
        for segment in body.segments() {
            match segment {
                Segment::Text(text) => {
                    out.add_text(VariableString::from_text(text.resolve(&*self.ctx)));
                }
                Segment::Command(command) => self.execute_command(command, out)?,
            }
        }
        for reply in body.replies() {
            let reply = self.execute_reply(reply)?;
            out.add_reply(reply);
        }
        Ok(())
    }

    fn execute_command(&mut self, command: &Command, out: &mut NodeBody) -> Result<(), EvalError> {
        match command {
            Command::Action(cmd) => {
                let action = self.resolve_action(cmd);
                out.add_command(Command::Action(action));
            }
            Command::If(cmd) => {
                for clause in &cmd.clauses {
                    if evaluate_to_bool(&clause.condition, &mut *self.ctx)? {
                        return self.execute_into(&clause.body, out);
                    }
                }
                if let Some(body) = &cmd.else_body {
                    self.execute_into(body, out)?;
                }
            }
            Command::Random(cmd) => {
                if let Some(body) = self.choose_random(cmd) {
                    self.execute_into(body, out)?;
                }
            }
            Command::Set(cmd) => {
                evaluate(&cmd.expression, &mut *self.ctx)?;
            }
            Command::Input(cmd) => {
                let input = self.resolve_input(cmd)?;
                out.add_command(Command::Input(input));
            }
        }
        Ok(())
    }

    /// 按权重随机选择子句
    ///
    /// 抽样值落在累计权重之外时（浮点舍入）选择最后一个子句。
    fn choose_random<'c>(&mut self, cmd: &'c RandomCommand) -> Option<&'c NodeBody> {
        let selection = self.rng.r#gen::<f64>() * cmd.total_weight();
        let mut current = 0.0;
        for clause in &cmd.clauses {
            current += clause.weight;
            if selection <= current {
                return Some(&clause.body);
            }
        }
        cmd.clauses.last().map(|clause| &clause.body)
    }

    fn execute_reply(&mut self, reply: &Reply) -> Result<Reply, EvalError> {
        let statement = match &reply.statement {
            Some(statement) => Some(self.execute_body(statement, false)?),
            None => None,
        };
        Ok(Reply {
            id: reply.id,
            statement,
            pointer: reply.pointer.clone(),
            commands: reply.commands.clone(),
        })
    }

    fn resolve(&self, text: &VariableString) -> VariableString {
        VariableString::from_text(text.resolve(&*self.ctx))
    }

    fn resolve_action(&self, cmd: &ActionCommand) -> ActionCommand {
        ActionCommand {
            action_type: cmd.action_type,
            value: self.resolve(&cmd.value),
            parameters: cmd
                .parameters
                .iter()
                .map(|(name, value)| (name.clone(), self.resolve(value)))
                .collect(),
        }
    }

    fn resolve_input(&self, cmd: &InputCommand) -> Result<InputCommand, EvalError> {
        let input = match cmd {
            InputCommand::Set(input) => {
                let mut input = input.clone();
                for option in &mut input.options {
                    option.text = self.resolve(&option.text);
                }
                InputCommand::Set(input)
            }
            InputCommand::Time(input) => InputCommand::Time(TimeInput {
                start_time: self.resolve_time(input.start_time.as_ref())?,
                min_time: self.resolve_time(input.min_time.as_ref())?,
                max_time: self.resolve_time(input.max_time.as_ref())?,
                ..input.clone()
            }),
            other => other.clone(),
        };
        Ok(input)
    }

    /// 解析时间边界并规范化为 `HH:MM` 或 `now`
    fn resolve_time(
        &self,
        bound: Option<&VariableString>,
    ) -> Result<Option<VariableString>, EvalError> {
        let Some(bound) = bound else {
            return Ok(None);
        };
        let value = bound.resolve(&*self.ctx);
        let time = evaluate_time(&value).ok_or(EvalError::InvalidTime { value })?;
        Ok(Some(VariableString::from_text(time)))
    }
}

/// 用户选择回复时“说出”的文本
///
/// 陈述中的文本替换变量，`input` 命令替换为用户输入的记录文本。
/// 自动前进回复没有陈述，返回 `None`。
pub fn user_statement<C: EvalContext + ?Sized>(reply: &Reply, ctx: &C) -> Option<String> {
    let statement = reply.statement.as_ref()?;
    let mut text = String::new();
    for segment in statement.segments() {
        match segment {
            Segment::Text(s) => text.push_str(&s.resolve(ctx)),
            Segment::Command(Command::Input(input)) => text.push_str(&input.statement_log(ctx)),
            Segment::Command(_) => {}
        }
    }
    let mut body = NodeBody::from_text(&text);
    body.normalize_whitespace(true);
    Some(body.plain_text())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::script::ast::NodePointer;
    use crate::script::parser::Parser;
    use crate::value::Value;

    fn node(body: &str) -> Node {
        let text = format!("title: Start\nspeaker: Bot\n---\n{body}\n===\ntitle: Next\nspeaker: Bot\n---\n===\n");
        let dialogue = Parser::new().parse("test", &text).unwrap();
        dialogue.start_node().unwrap().clone()
    }

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn run(body: &str, ctx: &mut HashMap<String, Value>, seed: u64) -> Result<Node, EvalError> {
        let mut rng = StdRng::seed_from_u64(seed);
        Executor::new(ctx, &mut rng).execute_node(&node(body))
    }

    fn text(body: &str, pairs: &[(&str, Value)]) -> String {
        run(body, &mut vars(pairs), 0).unwrap().body.plain_text()
    }

    #[test]
    fn test_text_is_resolved() {
        assert_eq!(text("Hello $name!", &[("name", "Ava".into())]), "Hello Ava!");
        assert_eq!(text("Hello $name!", &[]), "Hello null!");
    }

    #[test]
    fn test_if_selects_first_true_clause() {
        let body = "<<if $a>>A<<elseif $b>>B<<else>>C<<endif>>";
        assert_eq!(text(body, &[("a", false.into()), ("b", true.into())]), "B");
        assert_eq!(text(body, &[("a", true.into()), ("b", true.into())]), "A");
        assert_eq!(text(body, &[]), "C");
        assert_eq!(text("x<<if $a>>A<<endif>>", &[]), "x");
    }

    #[test]
    fn test_set_updates_context() {
        let mut ctx = vars(&[("visits", Value::Int(1))]);
        let out = run("<<set $visits = $visits + 1>>Visit $visits", &mut ctx, 0).unwrap();
        assert_eq!(out.body.plain_text(), "Visit 2");
        assert_eq!(ctx["visits"], Value::Int(2));
    }

    #[test]
    fn test_evaluation_error_aborts_node() {
        let err = run("A <<set $x = 1 / 0>>", &mut HashMap::new(), 0).unwrap_err();
        assert_eq!(err, EvalError::DivisionByZero);
    }

    #[test]
    fn test_random_weighting() {
        let body = "<<random>>one<<or weight=\"3\">>two<<endrandom>>";
        let source = node(body);
        let mut rng = StdRng::seed_from_u64(42);
        let mut ctx = HashMap::new();
        let mut counts = [0u32; 2];
        for _ in 0..4000 {
            let out = Executor::new(&mut ctx, &mut rng).execute_node(&source).unwrap();
            match out.body.plain_text().as_str() {
                "one" => counts[0] += 1,
                "two" => counts[1] += 1,
                other => panic!("unexpected {other}"),
            }
        }
        let ratio = f64::from(counts[1]) / f64::from(counts[0]);
        assert!((2.5..3.5).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn test_random_zero_weight_clause_is_never_chosen_after_first() {
        let body = "<<random>>one<<or weight=\"0\">>never<<endrandom>>";
        for seed in 0..50 {
            assert_eq!(run(body, &mut HashMap::new(), seed).unwrap().body.plain_text(), "one");
        }
    }

    #[test]
    fn test_nested_replies_are_collected() {
        let body = "Pick\n<<if $a>>[[Yes|Next]]<<else>>[[No|Next]]<<endif>>";
        let out = run(body, &mut vars(&[("a", true.into())]), 0).unwrap();
        let replies = out.body.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id, 1);
        assert_eq!(replies[0].statement.as_ref().unwrap().plain_text(), "Yes");
        assert_eq!(out.body.plain_text(), "Pick");
    }

    #[test]
    fn test_reply_statement_resolved_and_commands_deferred() {
        let body = "Hi\n[[I am $name|Next|<<set $done = true>>]]";
        let mut ctx = vars(&[("name", "Ava".into())]);
        let out = run(body, &mut ctx, 0).unwrap();
        let reply = &out.body.replies()[0];
        assert_eq!(reply.statement.as_ref().unwrap().plain_text(), "I am Ava");
        assert_eq!(reply.pointer, NodePointer::internal("Next"));
        assert_eq!(reply.commands.len(), 1);
        assert!(!ctx.contains_key("done"));
    }

    #[test]
    fn test_reply_commands_run_on_selection() {
        let source = node("[[Go|Next|<<set $done = true>><<action type=\"image\" value=\"$img\">>]]");
        let mut ctx = vars(&[("img", "a.png".into())]);
        let mut rng = StdRng::seed_from_u64(0);
        let actions = Executor::new(&mut ctx, &mut rng)
            .execute_reply_commands(&source.body.replies()[0].commands)
            .unwrap();
        assert_eq!(ctx["done"], Value::Bool(true));
        assert_eq!(actions[0].value.to_raw_string(), "a.png");
    }

    #[test]
    fn test_action_and_input_are_resolved() {
        let body = "<<action type=\"image\" value=\"img/$mood.png\" alt=\"$mood\">>\n\
                    [[<<input type=\"set\" value1=\"$t\" option1=\"Tea for $name\">>|Next]]\n\
                    [[<<input type=\"time\" value=\"$at\" minTime=\"$open\" maxTime=\"now\">>|Next]]";
        let mut ctx = vars(&[
            ("mood", "happy".into()),
            ("name", "Ava".into()),
            ("open", "08:30".into()),
        ]);
        let out = run(body, &mut ctx, 0).unwrap();
        let Segment::Command(Command::Action(action)) = &out.body.segments()[0] else {
            panic!("expected action");
        };
        assert_eq!(action.value.to_raw_string(), "img/happy.png");
        assert_eq!(action.parameters[0].1.to_raw_string(), "happy");

        let statement = |i: usize| out.body.replies()[i].statement.clone().unwrap();
        let (first, second) = (statement(0), statement(1));
        let Segment::Command(Command::Input(InputCommand::Set(set))) = &first.segments()[0] else {
            panic!("expected set input");
        };
        assert_eq!(set.options[0].text.to_raw_string(), "Tea for Ava");
        let Segment::Command(Command::Input(InputCommand::Time(time))) = &second.segments()[0] else {
            panic!("expected time input");
        };
        assert_eq!(time.min_time.as_ref().unwrap().to_raw_string(), "08:30");
        assert_eq!(time.max_time.as_ref().unwrap().to_raw_string(), "now");
    }

    #[test]
    fn test_invalid_time_bound() {
        let body = "[[<<input type=\"time\" value=\"$at\" minTime=\"$open\">>|Next]]";
        let err = run(body, &mut vars(&[("open", "soon".into())]), 0).unwrap_err();
        assert_eq!(err, EvalError::InvalidTime { value: "soon".to_string() });
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let body = "Hello   $name\n\n\n<<if true>>\n   You may enter.\n<<endif>>\n";
        assert_eq!(text(body, &[("name", "Ava".into())]), "Hello Ava\nYou may enter.");
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        let mut ctx = vars(&[]);
        run(
            "<<set $m = -9223372036854775807 - 1>><<set $x = $m / -1>>",
            &mut ctx,
            0,
        )
        .unwrap();
        assert_eq!(ctx.get("m"), Some(&Value::Int(i64::MIN)));
        assert_eq!(ctx.get("x"), Some(&Value::Float(9_223_372_036_854_775_808.0)));
    }

    #[test]
    fn test_user_statement() {
        let source = node(
            "[[I am <<input type=\"numeric\" value=\"$age\">> years|Next]]\n\
             [[Pick <<input type=\"set\" value1=\"$a\" option1=\"A\" value2=\"$b\" option2=\"B\">>|Next]]\n\
             [[Next]]",
        );
        let ctx = vars(&[("age", Value::Int(30)), ("a", true.into()), ("b", false.into())]);
        let replies = source.body.replies();
        assert_eq!(user_statement(&replies[0], &ctx).as_deref(), Some("I am 30 years"));
        assert_eq!(user_statement(&replies[1], &ctx).as_deref(), Some("Pick [\"A\"]"));
        assert_eq!(user_statement(&replies[2], &ctx), None);
    }
}

//! # 命令
//!
//! `<<...>>` 中的命令。命令体系是封闭的，用枚举表示，执行与分析都通过模式匹配分派。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::body::{NodeBody, Reply};
use super::input::InputCommand;
use super::pointer::NodePointer;
use super::vstring::VariableString;
use crate::script::expr::Expr;

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Image,
    Video,
    Generic,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Image => "image",
            ActionType::Video => "video",
            ActionType::Generic => "generic",
        }
    }

    /// 由 `type` 属性值解析
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "image" => Some(ActionType::Image),
            "video" => Some(ActionType::Video),
            "generic" => Some(ActionType::Generic),
            _ => None,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 动作命令：交给客户端执行的指令（显示图片、播放视频等）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCommand {
    pub action_type: ActionType,
    pub value: VariableString,
    /// 其他属性，保持源码顺序
    pub parameters: Vec<(String, VariableString)>,
}

/// 条件分支中的一个子句
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfClause {
    pub condition: Expr,
    pub body: NodeBody,
}

/// 条件命令：`<<if>>` / `<<elseif>>` / `<<else>>` / `<<endif>>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfCommand {
    /// `if` 及全部 `elseif` 子句
    pub clauses: Vec<IfClause>,
    pub else_body: Option<NodeBody>,
}

/// 随机分支中的一个子句
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomClause {
    /// 权重，不小于 0
    pub weight: f64,
    pub body: NodeBody,
}

/// 随机命令：`<<random>>` / `<<or>>` / `<<endrandom>>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomCommand {
    pub clauses: Vec<RandomClause>,
}

impl RandomCommand {
    pub fn total_weight(&self) -> f64 {
        self.clauses.iter().map(|c| c.weight).sum()
    }
}

/// 赋值命令：`<<set $x = expr>>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetCommand {
    /// 完整的赋值表达式
    pub expression: Expr,
}

impl SetCommand {
    /// 被赋值的变量
    pub fn target(&self) -> Option<&str> {
        self.expression.as_assignment().map(|(target, _)| target)
    }

    /// 值操作数
    pub fn value(&self) -> Option<&Expr> {
        self.expression.as_assignment().map(|(_, value)| value)
    }
}

/// 命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Action(ActionCommand),
    If(IfCommand),
    Random(RandomCommand),
    Set(SetCommand),
    Input(InputCommand),
}

impl Command {
    /// 命令名
    pub fn name(&self) -> &'static str {
        match self {
            Command::Action(_) => "action",
            Command::If(_) => "if",
            Command::Random(_) => "random",
            Command::Set(_) => "set",
            Command::Input(_) => "input",
        }
    }

    /// 包含子正文的命令（`if`/`random`）的全部子正文
    pub fn bodies(&self) -> Vec<&NodeBody> {
        match self {
            Command::If(cmd) => cmd
                .clauses
                .iter()
                .map(|c| &c.body)
                .chain(cmd.else_body.as_ref())
                .collect(),
            Command::Random(cmd) => cmd.clauses.iter().map(|c| &c.body).collect(),
            _ => Vec::new(),
        }
    }

    /// 在子正文中按 ID 查找回复
    pub fn find_reply_by_id(&self, reply_id: u32) -> Option<&Reply> {
        self.bodies()
            .into_iter()
            .find_map(|body| body.find_reply_by_id(reply_id))
    }

    pub fn collect_read_variables(&self, names: &mut BTreeSet<String>) {
        match self {
            Command::Action(cmd) => {
                cmd.value.collect_variables(names);
                for (_, value) in &cmd.parameters {
                    value.collect_variables(names);
                }
            }
            Command::If(cmd) => {
                for clause in &cmd.clauses {
                    clause.condition.collect_variables(names);
                }
            }
            Command::Random(_) => {}
            Command::Set(cmd) => {
                if let Some(value) = cmd.value() {
                    value.collect_variables(names);
                }
            }
            Command::Input(cmd) => cmd.collect_read_variables(names),
        }
        for body in self.bodies() {
            body.collect_read_variables(names);
        }
    }

    pub fn collect_write_variables(&self, names: &mut BTreeSet<String>) {
        match self {
            Command::Set(cmd) => {
                if let Some(target) = cmd.target() {
                    names.insert(target.to_string());
                }
            }
            Command::Input(cmd) => cmd.collect_write_variables(names),
            _ => {}
        }
        for body in self.bodies() {
            body.collect_write_variables(names);
        }
    }

    /// 收集子正文中回复的节点指针
    pub fn collect_pointers(&self, pointers: &mut BTreeSet<NodePointer>) {
        for body in self.bodies() {
            body.collect_pointers(pointers);
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Action(cmd) => {
                write!(
                    f,
                    "<<action type=\"{}\" value=\"{}\"",
                    cmd.action_type,
                    cmd.value.to_quoted_code()
                )?;
                for (name, value) in &cmd.parameters {
                    write!(f, " {name}=\"{}\"", value.to_quoted_code())?;
                }
                f.write_str(">>")
            }
            Command::If(cmd) => {
                for (i, clause) in cmd.clauses.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "elseif" };
                    writeln!(f, "<<{keyword} {}>>", clause.condition)?;
                    writeln!(f, "{}", clause.body)?;
                }
                if let Some(body) = &cmd.else_body {
                    writeln!(f, "<<else>>")?;
                    writeln!(f, "{body}")?;
                }
                f.write_str("<<endif>>")
            }
            Command::Random(cmd) => {
                for (i, clause) in cmd.clauses.iter().enumerate() {
                    f.write_str(if i == 0 { "<<random" } else { "<<or" })?;
                    if clause.weight != 1.0 {
                        write!(f, " weight=\"{}\"", clause.weight)?;
                    }
                    writeln!(f, ">>")?;
                    writeln!(f, "{}", clause.body)?;
                }
                f.write_str("<<endrandom>>")
            }
            Command::Set(cmd) => write!(f, "<<set {}>>", cmd.expression),
            Command::Input(cmd) => write!(f, "{cmd}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::expr::BinaryOp;

    #[test]
    fn test_action_display_escapes_quotes() {
        let mut value = VariableString::from_text("say \"hi\" to ");
        value.push_variable("name");
        let cmd = Command::Action(ActionCommand {
            action_type: ActionType::Generic,
            value,
            parameters: vec![("delay".to_string(), VariableString::from_text("2"))],
        });
        assert_eq!(
            cmd.to_string(),
            r#"<<action type="generic" value="say \"hi\" to $name" delay="2">>"#
        );
    }

    #[test]
    fn test_set_variables() {
        let cmd = Command::Set(SetCommand {
            expression: Expr::assign(
                "total",
                Expr::binary(BinaryOp::Add, Expr::var("total"), Expr::var("bonus")),
            ),
        });
        let mut read = BTreeSet::new();
        let mut written = BTreeSet::new();
        cmd.collect_read_variables(&mut read);
        cmd.collect_write_variables(&mut written);
        assert_eq!(read.into_iter().collect::<Vec<_>>(), ["bonus", "total"]);
        assert_eq!(written.into_iter().collect::<Vec<_>>(), ["total"]);
        assert_eq!(cmd.to_string(), "<<set $total = $total + $bonus>>");
    }

    #[test]
    fn test_random_display_skips_default_weight() {
        let cmd = Command::Random(RandomCommand {
            clauses: vec![
                RandomClause {
                    weight: 1.0,
                    body: NodeBody::from_text("Heads"),
                },
                RandomClause {
                    weight: 2.5,
                    body: NodeBody::from_text("Tails"),
                },
            ],
        });
        assert_eq!(
            cmd.to_string(),
            "<<random>>\nHeads\n<<or weight=\"2.5\">>\nTails\n<<endrandom>>"
        );
        if let Command::Random(random) = &cmd {
            assert_eq!(random.total_weight(), 3.5);
        }
    }

    #[test]
    fn test_action_type_names() {
        assert_eq!(ActionType::from_name("video"), Some(ActionType::Video));
        assert_eq!(ActionType::from_name("Video"), None);
        assert_eq!(ActionType::Image.to_string(), "image");
    }
}

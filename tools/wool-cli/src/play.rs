//! # Play 模块
//!
//! 在终端中交互式试玩对话。
//!
//! 每个节点显示说话者、文本、动作与编号的回复；
//! 输入回复编号前进，`b` 返回上一个节点，`q` 或输入结束时退出。
//! 回复中包含输入命令时依次询问各个变量的值。

use std::io::{BufRead, Write};

use anyhow::Result;
use tracing::debug;
use wool_core::script::ast::{Command, InputCommand, NodeBody, Segment, evaluate_time};
use wool_core::{
    ClientMessage, DialogueSession, MessageReply, MessageSegment, Value, event_time_now,
};

/// 试玩结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// 对话走到结尾
    Finished,
    /// 用户退出
    Quit,
}

enum Choice {
    Reply(u32),
    Back,
}

/// 终端试玩器
pub struct Player<'p, I, O> {
    session: DialogueSession<'p>,
    input: I,
    output: O,
    utc_offset_minutes: i32,
}

impl<'p, I: BufRead, O: Write> Player<'p, I, O> {
    pub fn new(session: DialogueSession<'p>, input: I, output: O, utc_offset_minutes: i32) -> Self {
        Self {
            session,
            input,
            output,
            utc_offset_minutes,
        }
    }

    pub fn session(&self) -> &DialogueSession<'p> {
        &self.session
    }

    /// 从指定节点开始试玩
    pub fn play(&mut self, dialogue: &str, node: Option<&str>) -> Result<PlayOutcome> {
        let mut node = self.session.start(dialogue, node, event_time_now(self.utc_offset_minutes))?;
        loop {
            let message = ClientMessage::from_node(&node);
            self.show(&message)?;
            if message.is_final() {
                writeln!(self.output, "（对话结束）")?;
                return Ok(PlayOutcome::Finished);
            }

            let Some(choice) = self.choose(&message)? else {
                return Ok(self.quit());
            };
            let reply_id = match choice {
                Choice::Reply(id) => id,
                Choice::Back => {
                    match self.session.back(event_time_now(self.utc_offset_minutes)) {
                        Ok(previous) => node = previous,
                        Err(e) => writeln!(self.output, "⚠️ {}", e)?,
                    }
                    continue;
                }
            };

            let inputs = reply_inputs(&node.body, reply_id);
            let Some(variables) = self.ask_inputs(&inputs)? else {
                return Ok(self.quit());
            };
            self.session.store_reply_input(variables, event_time_now(self.utc_offset_minutes))?;
            let progress = self.session.progress(reply_id, event_time_now(self.utc_offset_minutes))?;
            for action in &progress.actions {
                writeln!(self.output, "  [{}: {}]", action.action_type, action.value.to_raw_string())?;
            }
            match progress.node {
                Some(next) => node = next,
                None => {
                    writeln!(self.output, "（对话结束）")?;
                    return Ok(PlayOutcome::Finished);
                }
            }
        }
    }

    fn quit(&mut self) -> PlayOutcome {
        self.session.cancel();
        PlayOutcome::Quit
    }

    fn show(&mut self, message: &ClientMessage) -> Result<()> {
        writeln!(self.output)?;
        if let Some(speaker) = &message.speaker {
            writeln!(self.output, "{}:", speaker)?;
        }
        for segment in &message.segments {
            match segment {
                MessageSegment::Text { text } => {
                    for line in text.lines() {
                        writeln!(self.output, "  {}", line)?;
                    }
                }
                MessageSegment::Action {
                    action_type, value, ..
                } => writeln!(self.output, "  [{}: {}]", action_type, value)?,
                MessageSegment::Input { input_type, .. } => {
                    writeln!(self.output, "  [{}]", input_type)?
                }
            }
        }
        for reply in &message.replies {
            writeln!(self.output, "  {}) {}", reply.id, reply_label(reply))?;
        }
        Ok(())
    }

    /// 读取一行，输入结束时返回 `None`
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn choose(&mut self, message: &ClientMessage) -> Result<Option<Choice>> {
        loop {
            let Some(line) = self.read_line("> ")? else {
                return Ok(None);
            };
            match line.as_str() {
                "q" => return Ok(None),
                "b" => return Ok(Some(Choice::Back)),
                _ => {}
            }
            if let Ok(id) = line.parse::<u32>() {
                if message.replies.iter().any(|r| r.id == id) {
                    debug!(reply_id = id, "选择回复");
                    return Ok(Some(Choice::Reply(id)));
                }
            }
            writeln!(self.output, "请输入回复编号，b 返回，q 退出")?;
        }
    }

    fn ask_inputs(&mut self, inputs: &[InputCommand]) -> Result<Option<Vec<(String, Value)>>> {
        let mut variables = Vec::new();
        for input in inputs {
            match input {
                InputCommand::Text(text) | InputCommand::Longtext(text) => {
                    let Some(line) = self.read_line(&format!("{}: ", text.variable))? else {
                        return Ok(None);
                    };
                    variables.push((text.variable.clone(), Value::String(line)));
                }
                InputCommand::Email(email) => {
                    let Some(line) = self.read_line(&format!("{} (email): ", email.variable))?
                    else {
                        return Ok(None);
                    };
                    variables.push((email.variable.clone(), Value::String(line)));
                }
                InputCommand::Numeric(numeric) => loop {
                    let Some(line) = self.read_line(&format!("{} (整数): ", numeric.variable))?
                    else {
                        return Ok(None);
                    };
                    match line.parse::<i64>() {
                        Ok(n)
                            if numeric.min.is_none_or(|min| n >= min)
                                && numeric.max.is_none_or(|max| n <= max) =>
                        {
                            variables.push((numeric.variable.clone(), Value::Int(n)));
                            break;
                        }
                        _ => writeln!(self.output, "请输入范围内的整数")?,
                    }
                },
                InputCommand::Time(time) => loop {
                    let Some(line) = self.read_line(&format!("{} (HH:MM): ", time.variable))?
                    else {
                        return Ok(None);
                    };
                    match evaluate_time(&line) {
                        Some(value) => {
                            variables.push((time.variable.clone(), Value::String(value)));
                            break;
                        }
                        None => writeln!(self.output, "请输入 HH:MM 格式的时间")?,
                    }
                },
                InputCommand::Set(set) => {
                    for (i, option) in set.options.iter().enumerate() {
                        writeln!(self.output, "  [{}] {}", i + 1, option.text.to_raw_string())?;
                    }
                    let Some(line) = self.read_line("选择（逗号分隔）: ")? else {
                        return Ok(None);
                    };
                    let chosen: Vec<usize> = line
                        .split(',')
                        .filter_map(|part| part.trim().parse().ok())
                        .collect();
                    for (i, option) in set.options.iter().enumerate() {
                        variables.push((option.variable.clone(), Value::Bool(chosen.contains(&(i + 1)))));
                    }
                }
            }
        }
        Ok(Some(variables))
    }
}

fn reply_label(reply: &MessageReply) -> String {
    if reply.auto_forward {
        return "（继续）".to_string();
    }
    let parts: Vec<String> = reply
        .statement
        .iter()
        .filter_map(|segment| match segment {
            MessageSegment::Text { text } => Some(text.trim().to_string()),
            MessageSegment::Action { .. } => None,
            MessageSegment::Input { input_type, .. } => Some(format!("[{}]", input_type)),
        })
        .filter(|part| !part.is_empty())
        .collect();
    parts.join(" ")
}

/// 回复陈述中的输入命令
fn reply_inputs(body: &NodeBody, reply_id: u32) -> Vec<InputCommand> {
    body.find_reply_by_id(reply_id)
        .and_then(|reply| reply.statement.as_ref())
        .map(|statement| {
            statement
                .segments()
                .iter()
                .filter_map(|segment| match segment {
                    Segment::Command(Command::Input(input)) => Some(input.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

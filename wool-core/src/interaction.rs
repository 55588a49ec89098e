//! # Interaction 模块
//!
//! 会话中的交互记录：代理说出的节点与用户选择的回复。
//!
//! ## 设计原则
//!
//! - 每条记录保存上一条相关记录的下标，沿着链可以回到之前的代理节点
//! - 一次会话可以经过多个对话（外部节点指针），每段对话单独记录开始时间与结果
//! - 所有数据可序列化，交给外部的日志存储

use serde::{Deserialize, Serialize};

use crate::store::EventTime;

/// 交互来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionSource {
    Agent,
    User,
}

/// 一条交互记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub timestamp: EventTime,
    pub source: InteractionSource,
    /// 代理节点的说话者，用户记录为 `None`
    pub speaker: Option<String>,
    /// 对话名
    pub dialogue: String,
    /// 节点标题
    pub node: String,
    /// 上一条相关记录的下标
    pub previous: Option<usize>,
    /// 代理说出的文本或用户的陈述
    pub statement: String,
    /// 用户选择的回复
    pub reply_id: Option<u32>,
}

impl Interaction {
    pub fn is_agent(&self) -> bool {
        self.source == InteractionSource::Agent
    }
}

/// 一段对话的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueOutcome {
    Active,
    Completed,
    Cancelled,
}

/// 会话经过的一段对话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedDialogue {
    pub dialogue: String,
    pub started: EventTime,
    pub outcome: DialogueOutcome,
}

/// 交互记录容器
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionLog {
    dialogues: Vec<LoggedDialogue>,
    /// 按时间顺序
    interactions: Vec<Interaction>,
}

impl InteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始记录一段对话，上一段仍为 `Active` 时标记为完成
    pub fn begin_dialogue(&mut self, dialogue: &str, started: EventTime) {
        self.finish_current(DialogueOutcome::Completed);
        self.dialogues.push(LoggedDialogue {
            dialogue: dialogue.to_string(),
            started,
            outcome: DialogueOutcome::Active,
        });
    }

    /// 结束当前对话段，已结束时不变
    pub fn finish_current(&mut self, outcome: DialogueOutcome) {
        if let Some(current) = self.dialogues.last_mut() {
            if current.outcome == DialogueOutcome::Active {
                current.outcome = outcome;
            }
        }
    }

    /// 添加记录，返回其下标
    pub fn push(&mut self, interaction: Interaction) -> usize {
        self.interactions.push(interaction);
        self.interactions.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Interaction> {
        self.interactions.get(index)
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn dialogues(&self) -> &[LoggedDialogue] {
        &self.dialogues
    }

    pub fn current_dialogue(&self) -> Option<&LoggedDialogue> {
        self.dialogues.last()
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// 最后一条代理记录的下标
    pub fn last_agent(&self) -> Option<usize> {
        self.interactions.iter().rposition(Interaction::is_agent)
    }

    /// 沿 `previous` 链查找 `index` 之前的代理记录
    pub fn previous_agent(&self, index: usize) -> Option<usize> {
        let mut current = self.interactions.get(index)?.previous;
        while let Some(i) = current {
            let interaction = self.interactions.get(i)?;
            if interaction.is_agent() {
                return Some(i);
            }
            current = interaction.previous;
        }
        None
    }

    pub fn agent_count(&self) -> usize {
        self.interactions.iter().filter(|i| i.is_agent()).count()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::*;

    fn time() -> EventTime {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
            .unwrap()
    }

    fn record(source: InteractionSource, node: &str, previous: Option<usize>) -> Interaction {
        Interaction {
            timestamp: time(),
            source,
            speaker: (source == InteractionSource::Agent).then(|| "Bot".to_string()),
            dialogue: "intro".to_string(),
            node: node.to_string(),
            previous,
            statement: String::new(),
            reply_id: (source == InteractionSource::User).then_some(1),
        }
    }

    #[test]
    fn test_previous_agent_follows_links() {
        let mut log = InteractionLog::new();
        let a = log.push(record(InteractionSource::Agent, "Start", None));
        let u = log.push(record(InteractionSource::User, "Start", Some(a)));
        let b = log.push(record(InteractionSource::Agent, "Next", Some(u)));
        assert_eq!(log.previous_agent(b), Some(a));
        assert_eq!(log.previous_agent(a), None);
        assert_eq!(log.last_agent(), Some(b));
        assert_eq!(log.agent_count(), 2);
    }

    #[test]
    fn test_dialogue_outcomes() {
        let mut log = InteractionLog::new();
        log.begin_dialogue("intro", time());
        log.begin_dialogue("outro", time());
        log.finish_current(DialogueOutcome::Cancelled);
        log.finish_current(DialogueOutcome::Completed);
        let outcomes: Vec<_> = log.dialogues().iter().map(|d| d.outcome).collect();
        assert_eq!(outcomes, [DialogueOutcome::Completed, DialogueOutcome::Cancelled]);
    }

    #[test]
    fn test_serialization() {
        let mut log = InteractionLog::new();
        log.begin_dialogue("intro", time());
        log.push(record(InteractionSource::Agent, "Start", None));
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["interactions"][0]["source"], "agent");
        assert_eq!(json["dialogues"][0]["outcome"], "active");
        assert_eq!(json["interactions"][0]["timestamp"], "2024-03-01T09:00:00+01:00");
        let back: InteractionLog = serde_json::from_value(json).unwrap();
        assert_eq!(back, log);
    }
}

//! # Message 模块
//!
//! 发送给客户端的消息：执行后的节点只剩文本、动作与输入，回复只暴露 ID 与陈述，
//! 不暴露节点指针。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::script::ast::{ActionType, Command, Node, NodeBody, Segment};

/// 消息片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageSegment {
    Text {
        text: String,
    },
    Action {
        action_type: ActionType,
        value: String,
        parameters: BTreeMap<String, String>,
    },
    Input {
        input_type: String,
        parameters: JsonValue,
    },
}

/// 回复选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReply {
    pub id: u32,
    /// 陈述内容，自动前进回复为空
    pub statement: Vec<MessageSegment>,
    pub auto_forward: bool,
}

impl MessageReply {
    /// 陈述中的文本
    pub fn text(&self) -> String {
        plain_text(&self.statement)
    }
}

/// 一个代理节点的客户端消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub speaker: Option<String>,
    pub segments: Vec<MessageSegment>,
    pub replies: Vec<MessageReply>,
}

impl ClientMessage {
    /// 由执行后的节点生成消息
    ///
    /// 执行后的正文中不再有 `if`、`random` 与 `set`，遇到时忽略。
    pub fn from_node(node: &Node) -> Self {
        Self {
            speaker: node.speaker().map(str::to_string),
            segments: segments(&node.body),
            replies: node
                .body
                .replies()
                .iter()
                .map(|reply| MessageReply {
                    id: reply.id,
                    statement: reply.statement.as_ref().map(segments).unwrap_or_default(),
                    auto_forward: reply.is_auto_forward(),
                })
                .collect(),
        }
    }

    /// 正文中的文本
    pub fn text(&self) -> String {
        plain_text(&self.segments)
    }

    pub fn is_final(&self) -> bool {
        self.replies.is_empty()
    }
}

fn segments(body: &NodeBody) -> Vec<MessageSegment> {
    body.segments()
        .iter()
        .filter_map(|segment| match segment {
            Segment::Text(text) => Some(MessageSegment::Text {
                text: text.to_raw_string(),
            }),
            Segment::Command(Command::Action(action)) => Some(MessageSegment::Action {
                action_type: action.action_type,
                value: action.value.to_raw_string(),
                parameters: action
                    .parameters
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_raw_string()))
                    .collect(),
            }),
            Segment::Command(Command::Input(input)) => Some(MessageSegment::Input {
                input_type: input.input_type().to_string(),
                parameters: input.parameters(),
            }),
            Segment::Command(_) => None,
        })
        .collect()
}

fn plain_text(segments: &[MessageSegment]) -> String {
    segments
        .iter()
        .filter_map(|segment| match segment {
            MessageSegment::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

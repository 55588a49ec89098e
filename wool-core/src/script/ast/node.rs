//! # 节点
//!
//! 节点由头部（`title`、`speaker` 和其他标签）与正文组成，源码中以 `---` 分隔、`===` 结束。

use std::fmt;

use serde::{Deserialize, Serialize};

use super::body::NodeBody;
use super::pointer::END_NODE;

/// 节点头部
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHeader {
    /// 节点标题，对话内唯一（不区分大小写）
    pub title: String,
    /// 说话者，`End` 节点没有说话者
    pub speaker: Option<String>,
    /// 其他头部字段，保持源码顺序
    pub tags: Vec<(String, String)>,
}

impl NodeHeader {
    pub fn new(title: impl Into<String>, speaker: Option<String>) -> Self {
        Self {
            title: title.into(),
            speaker,
            tags: Vec::new(),
        }
    }

    /// 按名称查找标签
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for NodeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "title: {}", self.title)?;
        if let Some(speaker) = &self.speaker {
            write!(f, "\nspeaker: {speaker}")?;
        }
        for (key, value) in &self.tags {
            write!(f, "\n{key}: {value}")?;
        }
        Ok(())
    }
}

/// 对话节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub header: NodeHeader,
    pub body: NodeBody,
}

impl Node {
    pub fn new(header: NodeHeader, body: NodeBody) -> Self {
        Self { header, body }
    }

    pub fn title(&self) -> &str {
        &self.header.title
    }

    pub fn speaker(&self) -> Option<&str> {
        self.header.speaker.as_deref()
    }

    /// 是否为结束节点
    pub fn is_end(&self) -> bool {
        self.header.title.eq_ignore_ascii_case(END_NODE)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n---\n{}", self.header, self.body)
    }
}

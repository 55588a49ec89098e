//! # 节点指针
//!
//! 回复指向的下一个节点：同一对话内的节点、其他对话中的节点，或表示对话结束的 `End`。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 表示对话结束的节点标题
pub const END_NODE: &str = "End";

/// 节点指针
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodePointer {
    /// 同一对话内的节点
    Internal(String),
    /// 对话结束
    End,
    /// 其他对话中的节点
    External {
        /// 绝对对话 ID（`/` 分隔的路径，不带开头的 `/`）
        dialogue: String,
        /// 节点标题
        node: String,
    },
}

impl NodePointer {
    /// 由节点标题创建内部指针，`end`（不区分大小写）映射为 [`NodePointer::End`]
    pub fn internal(node: impl Into<String>) -> Self {
        let node = node.into();
        if node.eq_ignore_ascii_case(END_NODE) {
            NodePointer::End
        } else {
            NodePointer::Internal(node)
        }
    }

    pub fn external(dialogue: impl Into<String>, node: impl Into<String>) -> Self {
        NodePointer::External {
            dialogue: dialogue.into(),
            node: node.into(),
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, NodePointer::End)
    }

    pub fn is_external(&self) -> bool {
        matches!(self, NodePointer::External { .. })
    }

    /// 目标节点标题
    pub fn node_id(&self) -> &str {
        match self {
            NodePointer::Internal(node) => node,
            NodePointer::End => END_NODE,
            NodePointer::External { node, .. } => node,
        }
    }

    /// 外部指针的目标对话
    pub fn dialogue_id(&self) -> Option<&str> {
        match self {
            NodePointer::External { dialogue, .. } => Some(dialogue),
            _ => None,
        }
    }
}

impl fmt::Display for NodePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodePointer::Internal(node) => f.write_str(node),
            NodePointer::End => f.write_str(END_NODE),
            NodePointer::External { dialogue, node } => write!(f, "/{dialogue}.{node}"),
        }
    }
}

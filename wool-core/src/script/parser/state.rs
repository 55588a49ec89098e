//! # 节点解析状态
//!
//! 解析单个节点时在各个解析函数之间传递的状态：回复 ID 计数器和已登记的节点指针。

use super::tokenizer::Token;
use crate::script::ast::NodePointer;

/// 已登记的节点指针，解析完所有节点后检查目标是否存在
#[derive(Debug, Clone)]
pub struct PointerToken {
    /// 指针所在节点的标题
    pub node_title: Option<String>,
    pub pointer: NodePointer,
    /// 指针在源码中的记号
    pub token: Token,
}

/// 单个节点的解析状态
#[derive(Debug)]
pub struct NodeState {
    dialogue_name: String,
    title: Option<String>,
    next_reply_id: u32,
    pointers: Vec<PointerToken>,
}

impl NodeState {
    pub fn new(dialogue_name: impl Into<String>) -> Self {
        Self {
            dialogue_name: dialogue_name.into(),
            title: None,
            next_reply_id: 1,
            pointers: Vec::new(),
        }
    }

    pub fn dialogue_name(&self) -> &str {
        &self.dialogue_name
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    /// 分配下一个回复 ID（从 1 开始）
    pub fn next_reply_id(&mut self) -> u32 {
        let id = self.next_reply_id;
        self.next_reply_id += 1;
        id
    }

    pub fn add_pointer(&mut self, pointer: NodePointer, token: Token) {
        self.pointers.push(PointerToken {
            node_title: self.title.clone(),
            pointer,
            token,
        });
    }

    /// 取出已登记的节点指针
    pub fn into_pointers(self) -> Vec<PointerToken> {
        self.pointers
    }
}

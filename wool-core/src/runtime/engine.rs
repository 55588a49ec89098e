//! # Engine 模块
//!
//! 单个对话的执行状态机。
//!
//! ## 执行模型
//!
//! ```text
//! start(node) -> 执行后的节点
//! process_reply(reply_id) -> 节点指针 + 回复动作
//! continue_to(pointer) -> 执行后的节点 | None（对话结束）
//! ```
//!
//! 1. `start` 执行起始节点（默认 `Start`），对话进入 `Active`
//! 2. 用户选择回复后，`process_reply` 执行回复附带的命令，返回回复的节点指针
//! 3. `continue_to` 执行指针指向的节点；指向 `End` 或节点没有回复时对话进入 `Finished`
//!
//! 外部节点指针不在这里处理，由会话层切换对话。

use std::sync::Arc;

use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::error::RuntimeError;
use crate::runtime::executor::{Executor, user_statement};
use crate::script::ast::{ActionCommand, Dialogue, Node, NodePointer, Reply, START_NODE};
use crate::store::{ChangeSource, EventTime, VariableStore, WriteOptions};
use crate::value::Value;

/// 自动前进回复的用户陈述
pub const AUTO_FORWARD_STATEMENT: &str = "AUTOFORWARD";

/// 对话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    /// 尚未开始
    Inactive,
    /// 等待用户选择回复
    Active,
    /// 已结束（到达 `End`、节点没有回复或被取消）
    Finished,
}

/// 选择回复的结果
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedReply {
    /// 回复指向的节点
    pub pointer: NodePointer,
    /// 回复附带的动作命令（已解析变量）
    pub actions: Vec<ActionCommand>,
}

/// 正在执行的对话
///
/// 借用已解析的对话，变量存储在多个对话之间共享。
///
/// # 使用示例
///
/// ```ignore
/// let mut active = ActiveDialogue::new(&dialogue, store);
/// let node = active.start(None, time)?;
///
/// // 客户端展示 node，用户选择回复...
/// let selected = active.process_reply(reply_id, time)?;
/// let next = active.continue_to(&selected.pointer, time)?;
/// ```
pub struct ActiveDialogue<'d, R: RngCore = StdRng> {
    dialogue: &'d Dialogue,
    store: Arc<VariableStore>,
    state: DialogueState,
    /// 当前节点（解析得到的原始节点）
    current: Option<&'d Node>,
    /// 当前节点执行后展示给用户的回复
    offered: Vec<u32>,
    rng: R,
}

impl<'d> ActiveDialogue<'d> {
    /// 创建对话，随机数源从系统熵初始化
    pub fn new(dialogue: &'d Dialogue, store: Arc<VariableStore>) -> Self {
        Self::with_rng(dialogue, store, StdRng::from_entropy())
    }
}

impl<'d, R: RngCore> ActiveDialogue<'d, R> {
    /// 使用指定的随机数源创建对话
    pub fn with_rng(dialogue: &'d Dialogue, store: Arc<VariableStore>, rng: R) -> Self {
        Self {
            dialogue,
            store,
            state: DialogueState::Inactive,
            current: None,
            offered: Vec::new(),
            rng,
        }
    }


    pub fn dialogue(&self) -> &'d Dialogue {
        self.dialogue
    }

    pub fn state(&self) -> DialogueState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == DialogueState::Finished
    }

    /// 当前节点（未执行的原始节点）
    pub fn current_node(&self) -> Option<&'d Node> {
        self.current
    }

    /// 当前节点展示给用户的回复编号
    pub fn offered_replies(&self) -> &[u32] {
        &self.offered
    }

    pub fn store(&self) -> &Arc<VariableStore> {
        &self.store
    }

    /// 开始对话
    ///
    /// # 参数
    ///
    /// - `node_id`: 起始节点标题，`None` 表示 `Start`
    /// - `time`: 事件时间
    ///
    /// # 返回
    ///
    /// 执行后的节点
    pub fn start(&mut self, node_id: Option<&str>, time: EventTime) -> Result<Node, RuntimeError> {
        self.start_in(self.dialogue, node_id, time)
    }

    /// 在另一个对话中开始，保留变量存储与随机数源
    ///
    /// 节点不存在或执行失败时保持原来的对话和状态。
    pub fn start_in(
        &mut self,
        dialogue: &'d Dialogue,
        node_id: Option<&str>,
        time: EventTime,
    ) -> Result<Node, RuntimeError> {
        let node = find_node(dialogue, node_id.unwrap_or(START_NODE))?;
        let processed = self.execute(node, time, true)?;
        self.dialogue = dialogue;
        self.settle(node, &processed);
        info!(dialogue = %dialogue.name(), node = %node.title(), "对话开始");
        Ok(processed)
    }

    /// 查找当前节点上展示过的回复
    ///
    /// 未被选中的 `if` / `random` 子句中的回复不能选择。
    pub fn offered_reply(&self, reply_id: u32) -> Result<&'d Reply, RuntimeError> {
        let node = self.active_node()?;
        self.offered
            .contains(&reply_id)
            .then(|| node.body.find_reply_by_id(reply_id))
            .flatten()
            .ok_or_else(|| RuntimeError::ReplyNotFound {
                node: node.title().to_string(),
                reply_id,
            })
    }

    /// 选择当前节点的回复
    ///
    /// 执行回复附带的 `set` 命令，返回回复的节点指针，不移动到下一个节点。
    pub fn process_reply(
        &mut self,
        reply_id: u32,
        time: EventTime,
    ) -> Result<SelectedReply, RuntimeError> {
        let reply = self.offered_reply(reply_id)?;
        let mut vars = self.store.live_map(self.write_options(time));
        let actions = Executor::new(&mut vars, &mut self.rng).execute_reply_commands(&reply.commands)?;
        debug!(dialogue = %self.dialogue.name(), reply_id, pointer = %reply.pointer, "选择回复");
        Ok(SelectedReply {
            pointer: reply.pointer.clone(),
            actions,
        })
    }

    /// 移动到内部节点指针指向的节点
    ///
    /// # 返回
    ///
    /// 执行后的节点；指针指向 `End` 时返回 `None`，对话结束
    pub fn continue_to(
        &mut self,
        pointer: &NodePointer,
        time: EventTime,
    ) -> Result<Option<Node>, RuntimeError> {
        self.active_node()?;
        match pointer {
            NodePointer::End => {
                self.finish();
                Ok(None)
            }
            NodePointer::Internal(node_id) => {
                let node = find_node(self.dialogue, node_id)?;
                let processed = self.execute(node, time, true)?;
                self.settle(node, &processed);
                Ok(Some(processed))
            }
            NodePointer::External { dialogue, node } => Err(RuntimeError::ExternalPointer {
                dialogue: dialogue.clone(),
                node: node.clone(),
            }),
        }
    }

    /// 写入用户在回复中输入的变量
    pub fn store_reply_input<I>(&self, variables: I, time: EventTime)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.store.put_all(variables, &self.write_options(time));
    }

    /// 用户选择回复时“说出”的文本，自动前进回复返回 [`AUTO_FORWARD_STATEMENT`]
    pub fn user_statement(&self, reply_id: u32) -> Result<String, RuntimeError> {
        let reply = self.offered_reply(reply_id)?;
        let vars = self.store.snapshot();
        Ok(user_statement(reply, &vars).unwrap_or_else(|| AUTO_FORWARD_STATEMENT.to_string()))
    }

    /// 执行节点
    ///
    /// # 参数
    ///
    /// - `mutating`: 为 `false` 时在变量快照上执行，不修改存储，用于重新渲染节点
    pub fn execute(
        &mut self,
        node: &Node,
        time: EventTime,
        mutating: bool,
    ) -> Result<Node, RuntimeError> {
        let processed = if mutating {
            let mut vars = self.store.live_map(self.write_options(time));
            Executor::new(&mut vars, &mut self.rng).execute_node(node)?
        } else {
            let mut vars = self.store.snapshot();
            Executor::new(&mut vars, &mut self.rng).execute_node(node)?
        };
        Ok(processed)
    }

    /// 不修改存储地重新执行当前节点
    pub fn execute_stateless(&mut self, time: EventTime) -> Result<Node, RuntimeError> {
        let node = self.active_node()?;
        self.execute(node, time, false)
    }

    /// 结束对话
    pub fn cancel(&mut self) {
        if self.state != DialogueState::Finished {
            info!(dialogue = %self.dialogue.name(), "对话取消");
        }
        self.finish();
    }

    /// 移动到已执行的节点
    fn settle(&mut self, node: &'d Node, processed: &Node) {
        self.current = Some(node);
        self.offered = processed.body.replies().iter().map(|reply| reply.id).collect();
        if self.offered.is_empty() {
            self.finish();
        } else {
            self.state = DialogueState::Active;
        }
    }

    fn finish(&mut self) {
        if self.state != DialogueState::Finished {
            debug!(dialogue = %self.dialogue.name(), "对话结束");
        }
        self.state = DialogueState::Finished;
    }

    fn active_node(&self) -> Result<&'d Node, RuntimeError> {
        match (self.state, self.current) {
            (DialogueState::Active, Some(node)) => Ok(node),
            (state, _) => Err(RuntimeError::StateMismatch {
                expected: format!("{:?}", DialogueState::Active),
                actual: format!("{state:?}"),
            }),
        }
    }

    fn write_options(&self, time: EventTime) -> WriteOptions {
        WriteOptions::new(time).with_source(ChangeSource::Dialogue)
    }
}

fn find_node<'d>(dialogue: &'d Dialogue, node_id: &str) -> Result<&'d Node, RuntimeError> {
    dialogue
        .node(node_id)
        .ok_or_else(|| RuntimeError::NodeNotFound {
            dialogue: dialogue.name().to_string(),
            node: node_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::*;
    use crate::script::parser::Parser;

    const SCRIPT: &str = "\
title: Start
speaker: Bot
---
Hello $name
[[Hi, I am <<input type=\"text\" value=\"$name\">>|Second|<<set $greeted = true>>]]
[[Skip|end]]
===
title: Second
speaker: Bot
---
Nice to meet you, $name. <<set $visits = $visits + 1>>
[[Again|Start]]
[[Bye|Last]]
===
title: Last
speaker: Bot
---
Goodbye.
===
";

    fn time() -> EventTime {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .unwrap()
    }

    fn dialogue() -> Dialogue {
        Parser::new().parse("test", SCRIPT).unwrap()
    }

    fn active(dialogue: &Dialogue) -> ActiveDialogue<'_> {
        let store = Arc::new(VariableStore::new());
        store.set_value("visits", Value::Int(0), &WriteOptions::new(time()));
        ActiveDialogue::with_rng(dialogue, store, StdRng::seed_from_u64(1))
    }

    #[test]
    fn test_start() {
        let dialogue = dialogue();
        let mut active = active(&dialogue);
        assert_eq!(active.state(), DialogueState::Inactive);
        let node = active.start(None, time()).unwrap();
        assert_eq!(node.body.plain_text(), "Hello null");
        assert_eq!(node.body.replies().len(), 2);
        assert_eq!(active.state(), DialogueState::Active);
        assert_eq!(active.current_node().unwrap().title(), "Start");
    }

    #[test]
    fn test_start_unknown_node() {
        let dialogue = dialogue();
        let err = active(&dialogue).start(Some("Nowhere"), time()).unwrap_err();
        assert!(matches!(err, RuntimeError::NodeNotFound { node, .. } if node == "Nowhere"));
    }

    #[test]
    fn test_reply_flow() {
        let dialogue = dialogue();
        let mut active = active(&dialogue);
        active.start(None, time()).unwrap();

        active.store_reply_input([("name".to_string(), Value::from("Ava"))], time());
        assert_eq!(active.user_statement(1).unwrap(), "Hi, I am Ava");

        let selected = active.process_reply(1, time()).unwrap();
        assert_eq!(selected.pointer, NodePointer::internal("Second"));
        assert_eq!(active.store().get_value("greeted"), Some(Value::Bool(true)));

        let node = active.continue_to(&selected.pointer, time()).unwrap().unwrap();
        assert_eq!(node.body.plain_text(), "Nice to meet you, Ava.");
        assert_eq!(active.store().get_value("visits"), Some(Value::Int(1)));

        let selected = active.process_reply(2, time()).unwrap();
        let last = active.continue_to(&selected.pointer, time()).unwrap().unwrap();
        assert_eq!(last.body.plain_text(), "Goodbye.");
        assert!(active.is_finished());
    }

    #[test]
    fn test_end_pointer_finishes() {
        let dialogue = dialogue();
        let mut active = active(&dialogue);
        active.start(None, time()).unwrap();
        let selected = active.process_reply(2, time()).unwrap();
        assert!(selected.pointer.is_end());
        assert_eq!(active.continue_to(&selected.pointer, time()).unwrap(), None);
        assert!(active.is_finished());
        assert!(matches!(
            active.process_reply(1, time()),
            Err(RuntimeError::StateMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_reply() {
        let dialogue = dialogue();
        let mut active = active(&dialogue);
        active.start(None, time()).unwrap();
        let err = active.process_reply(9, time()).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::ReplyNotFound {
                node: "Start".to_string(),
                reply_id: 9
            }
        );
    }

    #[test]
    fn test_external_pointer_is_not_followed() {
        let dialogue = dialogue();
        let mut active = active(&dialogue);
        active.start(None, time()).unwrap();
        let pointer = NodePointer::external("other", "Start");
        assert!(matches!(
            active.continue_to(&pointer, time()),
            Err(RuntimeError::ExternalPointer { .. })
        ));
    }

    #[test]
    fn test_stateless_execution_does_not_write() {
        let dialogue = dialogue();
        let mut active = active(&dialogue);
        active.start(Some("Second"), time()).unwrap();
        assert_eq!(active.store().get_value("visits"), Some(Value::Int(1)));
        let preview = active.execute_stateless(time()).unwrap();
        assert_eq!(preview.body.plain_text(), "Nice to meet you, null.");
        assert_eq!(active.store().get_value("visits"), Some(Value::Int(1)));
    }

    #[test]
    fn test_auto_forward_statement() {
        let text = "title: Start\nspeaker: Bot\n---\nHi\n[[Next]]\n===\ntitle: Next\nspeaker: Bot\n---\nBye\n===\n";
        let dialogue = Parser::new().parse("test", text).unwrap();
        let mut active = active(&dialogue);
        active.start(None, time()).unwrap();
        assert_eq!(active.user_statement(1).unwrap(), AUTO_FORWARD_STATEMENT);
    }

    #[test]
    fn test_cancel() {
        let dialogue = dialogue();
        let mut active = active(&dialogue);
        active.start(None, time()).unwrap();
        active.cancel();
        assert!(active.is_finished());
    }

    #[test]
    fn test_switch_keeps_store() {
        let dialogue = dialogue();
        let other = Parser::new()
            .parse("other", "title: Start\nspeaker: Guide\n---\nVisits: $visits\n===\n")
            .unwrap();
        let mut active = active(&dialogue);
        active.start(Some("Second"), time()).unwrap();

        // 目标节点不存在时仍停留在原对话
        let err = active.start_in(&other, Some("Nowhere"), time()).unwrap_err();
        assert!(matches!(err, RuntimeError::NodeNotFound { .. }));
        assert_eq!(active.dialogue().name(), "test");
        assert_eq!(active.state(), DialogueState::Active);
        assert_eq!(active.offered_replies(), [1, 2]);

        let node = active.start_in(&other, None, time()).unwrap();
        assert_eq!(active.dialogue().name(), "other");
        assert_eq!(node.body.plain_text(), "Visits: 1");
        assert!(active.is_finished());
    }

    #[test]
    fn test_only_offered_replies_can_be_selected() {
        let text = "\
title: Start
speaker: Bot
---
Ready?
<<if $ready>>[[Yes|Yes]]<<else>>[[No|No]]<<endif>>
===
title: Yes
speaker: Bot
---
Good.
===
title: No
speaker: Bot
---
Later.
===
";
        let dialogue = Parser::new().parse("test", text).unwrap();
        let mut active = active(&dialogue);
        active
            .store()
            .set_value("ready", Value::Bool(true), &WriteOptions::new(time()));
        let node = active.start(None, time()).unwrap();
        let ids: Vec<_> = node.body.replies().iter().map(|r| r.id).collect();
        assert_eq!(ids, [1]);
        assert_eq!(active.offered_replies(), [1]);

        // 未选中的 else 分支中的回复
        let expected = RuntimeError::ReplyNotFound {
            node: "Start".to_string(),
            reply_id: 2,
        };
        assert_eq!(active.process_reply(2, time()).unwrap_err(), expected);
        assert_eq!(active.user_statement(2).unwrap_err(), expected);
        assert_eq!(active.state(), DialogueState::Active);

        let selected = active.process_reply(1, time()).unwrap();
        assert_eq!(selected.pointer, NodePointer::internal("Yes"));
    }
}

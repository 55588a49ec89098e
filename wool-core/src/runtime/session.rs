//! # Session 模块
//!
//! 一个用户在项目中的对话会话：驱动 [`ActiveDialogue`]，跟随外部节点指针切换对话，
//! 并记录代理与用户的交互。
//!
//! ## 操作
//!
//! - `start`：开始对话并记录代理节点
//! - `progress`：记录用户回复，执行回复并移动到下一个节点
//! - `back`：回到上一个代理节点并重新执行
//! - `cancel`：取消会话

use std::sync::Arc;

use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use crate::error::RuntimeError;
use crate::interaction::{DialogueOutcome, Interaction, InteractionLog, InteractionSource};
use crate::runtime::engine::ActiveDialogue;
use crate::script::ast::{ActionCommand, Dialogue, Node, NodePointer, Project};
use crate::store::{EventTime, VariableStore};
use crate::value::Value;

/// `progress` 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// 回复附带的动作命令
    pub actions: Vec<ActionCommand>,
    /// 下一个节点，对话结束时为 `None`
    pub node: Option<Node>,
}

/// 对话会话
pub struct DialogueSession<'p, R: RngCore = StdRng> {
    project: &'p Project,
    store: Arc<VariableStore>,
    /// 第一次开始对话前持有随机数源
    rng: Option<R>,
    active: Option<ActiveDialogue<'p, R>>,
    log: InteractionLog,
    /// 最后一条代理记录
    current: Option<usize>,
}

impl<'p> DialogueSession<'p> {
    pub fn new(project: &'p Project, store: Arc<VariableStore>) -> Self {
        Self::with_rng(project, store, StdRng::from_entropy())
    }
}

impl<'p, R: RngCore> DialogueSession<'p, R> {
    pub fn with_rng(project: &'p Project, store: Arc<VariableStore>, rng: R) -> Self {
        Self {
            project,
            store,
            rng: Some(rng),
            active: None,
            log: InteractionLog::new(),
            current: None,
        }
    }

    pub fn log(&self) -> &InteractionLog {
        &self.log
    }

    pub fn active(&self) -> Option<&ActiveDialogue<'p, R>> {
        self.active.as_ref()
    }

    pub fn store(&self) -> &Arc<VariableStore> {
        &self.store
    }

    /// 会话是否已结束，尚未开始时为 `false`
    pub fn is_finished(&self) -> bool {
        self.active.as_ref().is_some_and(ActiveDialogue::is_finished)
    }

    /// 开始对话
    ///
    /// # 参数
    ///
    /// - `dialogue_id`: 对话名
    /// - `node_id`: 起始节点，`None` 表示 `Start`
    pub fn start(
        &mut self,
        dialogue_id: &str,
        node_id: Option<&str>,
        time: EventTime,
    ) -> Result<Node, RuntimeError> {
        let dialogue = self.find_dialogue(dialogue_id)?;
        let node = self.switch(dialogue, node_id, time)?;
        self.record(&node, None, true, time)?;
        info!(dialogue = %dialogue_id, "会话开始");
        Ok(node)
    }

    /// 写入用户在回复中输入的变量，应在 `progress` 之前调用
    pub fn store_reply_input<I>(&self, variables: I, time: EventTime) -> Result<(), RuntimeError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.active_dialogue()?.store_reply_input(variables, time);
        Ok(())
    }

    /// 选择回复并继续对话
    ///
    /// 外部节点指针会结束当前对话段并在目标对话中继续。
    /// 出错时会话停留在当前节点，交互记录不变。
    pub fn progress(&mut self, reply_id: u32, time: EventTime) -> Result<Progress, RuntimeError> {
        let project = self.project;
        let active = self.active_dialogue_mut()?;
        let reply = active.offered_reply(reply_id)?;
        let target = match &reply.pointer {
            NodePointer::External { dialogue, node } => {
                let target = project.dialogue(dialogue).ok_or_else(|| {
                    RuntimeError::DialogueNotFound {
                        dialogue: dialogue.clone(),
                    }
                })?;
                if target.node(node).is_none() {
                    return Err(RuntimeError::NodeNotFound {
                        dialogue: dialogue.clone(),
                        node: node.clone(),
                    });
                }
                Some((target, node.as_str()))
            }
            _ => None,
        };
        let statement = active.user_statement(reply_id)?;
        let dialogue = active.dialogue().name().to_string();
        let node_title = active
            .current_node()
            .map(|node| node.title().to_string())
            .unwrap_or_default();
        let selected = active.process_reply(reply_id, time)?;
        let next = match target {
            Some((target, node)) => Some(active.start_in(target, Some(node), time)?),
            None => active.continue_to(&selected.pointer, time)?,
        };

        let user = self.log.push(Interaction {
            timestamp: time,
            source: InteractionSource::User,
            speaker: None,
            dialogue,
            node: node_title,
            previous: self.current,
            statement,
            reply_id: Some(reply_id),
        });
        match &next {
            Some(node) => self.record(node, Some(user), target.is_some(), time)?,
            None => self.complete_if_finished(),
        }
        if self.is_finished() {
            info!("会话结束");
        }
        Ok(Progress {
            actions: selected.actions,
            node: next,
        })
    }

    /// 回到上一个代理节点并重新执行
    pub fn back(&mut self, time: EventTime) -> Result<Node, RuntimeError> {
        let no_previous = || RuntimeError::InvalidState {
            message: "没有可以返回的节点".to_string(),
        };
        let current = self.current.ok_or_else(no_previous)?;
        let previous = self.log.previous_agent(current).ok_or_else(no_previous)?;
        let target = self.log.get(previous).cloned().ok_or_else(no_previous)?;
        let dialogue = self.find_dialogue(&target.dialogue)?;

        let switching = self
            .active
            .as_ref()
            .is_none_or(|active| active.dialogue().name() != target.dialogue);
        let node = self.switch(dialogue, Some(target.node.as_str()), time)?;
        self.record(&node, target.previous, switching, time)?;
        Ok(node)
    }

    /// 取消会话
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.cancel();
        }
        self.log.finish_current(DialogueOutcome::Cancelled);
        info!("会话取消");
    }

    /// 切换到对话并执行节点，失败时停留在原来的对话
    fn switch(
        &mut self,
        dialogue: &'p Dialogue,
        node_id: Option<&str>,
        time: EventTime,
    ) -> Result<Node, RuntimeError> {
        if self.active.is_none() {
            let rng = self.rng.take().ok_or_else(|| RuntimeError::InvalidState {
                message: "会话的随机数源不可用".to_string(),
            })?;
            self.active = Some(ActiveDialogue::with_rng(dialogue, Arc::clone(&self.store), rng));
        }
        self.active_dialogue_mut()?.start_in(dialogue, node_id, time)
    }

    /// 记录代理交互
    ///
    /// - `begin`: 是否开始新的对话段
    fn record(
        &mut self,
        node: &Node,
        previous: Option<usize>,
        begin: bool,
        time: EventTime,
    ) -> Result<(), RuntimeError> {
        if begin {
            let dialogue = self.active_dialogue()?.dialogue().name().to_string();
            self.log.begin_dialogue(&dialogue, time);
        }
        self.log_agent(node, previous, time)?;
        self.complete_if_finished();
        Ok(())
    }

    fn log_agent(
        &mut self,
        node: &Node,
        previous: Option<usize>,
        time: EventTime,
    ) -> Result<(), RuntimeError> {
        let dialogue = self.active_dialogue()?.dialogue().name().to_string();
        let index = self.log.push(Interaction {
            timestamp: time,
            source: InteractionSource::Agent,
            speaker: node.speaker().map(str::to_string),
            dialogue,
            node: node.title().to_string(),
            previous,
            statement: node.body.plain_text(),
            reply_id: None,
        });
        self.current = Some(index);
        Ok(())
    }

    fn complete_if_finished(&mut self) {
        if self.is_finished() {
            self.log.finish_current(DialogueOutcome::Completed);
        }
    }

    fn find_dialogue(&self, dialogue_id: &str) -> Result<&'p Dialogue, RuntimeError> {
        self.project
            .dialogue(dialogue_id)
            .ok_or_else(|| RuntimeError::DialogueNotFound {
                dialogue: dialogue_id.to_string(),
            })
    }

    fn active_dialogue(&self) -> Result<&ActiveDialogue<'p, R>, RuntimeError> {
        self.active.as_ref().ok_or_else(not_started)
    }

    fn active_dialogue_mut(&mut self) -> Result<&mut ActiveDialogue<'p, R>, RuntimeError> {
        self.active.as_mut().ok_or_else(not_started)
    }
}

fn not_started() -> RuntimeError {
    RuntimeError::InvalidState {
        message: "会话尚未开始".to_string(),
    }
}

//! # 对话
//!
//! 一份 `.wool` 文件解析后的结果：按插入顺序保存的节点集合，节点标题不区分大小写。

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::node::Node;
use super::pointer::NodePointer;

/// 起始节点标题
pub const START_NODE: &str = "Start";

/// 对话
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dialogue {
    /// 对话名（`/` 分隔的路径，不含扩展名）
    name: String,
    nodes: Vec<Node>,
    /// 小写标题 -> `nodes` 下标
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Dialogue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 添加节点，已存在同名节点（不区分大小写）时替换
    pub fn add_node(&mut self, node: Node) {
        let key = node.title().to_lowercase();
        match self.index.get(&key) {
            Some(&i) => self.nodes[i] = node,
            None => {
                self.index.insert(key, self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    /// 按标题查找节点（不区分大小写）
    pub fn node(&self, title: &str) -> Option<&Node> {
        self.index
            .get(&title.to_lowercase())
            .and_then(|&i| self.nodes.get(i))
    }

    pub fn contains_node(&self, title: &str) -> bool {
        self.index.contains_key(&title.to_lowercase())
    }

    pub fn start_node(&self) -> Option<&Node> {
        self.node(START_NODE)
    }

    /// 按插入顺序遍历节点
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 出现过的说话者
    pub fn speakers(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .filter_map(|node| node.speaker().map(str::to_string))
            .collect()
    }

    /// 读取的变量
    pub fn variables_needed(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for node in &self.nodes {
            node.body.collect_read_variables(&mut names);
        }
        names
    }

    /// 写入的变量
    pub fn variables_written(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for node in &self.nodes {
            node.body.collect_write_variables(&mut names);
        }
        names
    }

    /// 外部节点指针引用的对话
    pub fn dialogues_referenced(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .flat_map(|node| node.body.pointers())
            .filter_map(|pointer| match pointer {
                NodePointer::External { dialogue, .. } => Some(dialogue),
                _ => None,
            })
            .collect()
    }

    /// 对话概要，用于命令行输出
    pub fn summary(&self) -> DialogueSummary<'_> {
        DialogueSummary(self)
    }

    /// 反序列化后重建标题索引
    pub fn rebuild_index(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.title().to_lowercase(), i))
            .collect();
    }
}

impl fmt::Display for Dialogue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            writeln!(f, "{node}")?;
            writeln!(f, "===")?;
        }
        Ok(())
    }
}

/// 对话概要
pub struct DialogueSummary<'a>(&'a Dialogue);

impl fmt::Display for DialogueSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dialogue = self.0;
        writeln!(f, "对话名：{}", dialogue.name())?;
        writeln!(f, "节点数：{}", dialogue.node_count())?;
        writeln!(f)?;
        let sections = [
            ("说话者", dialogue.speakers()),
            ("引用的对话", dialogue.dialogues_referenced()),
            ("需要的变量", dialogue.variables_needed()),
            ("写入的变量", dialogue.variables_written()),
        ];
        for (label, names) in sections {
            writeln!(f, "{label}（{}）：", names.len())?;
            for name in names {
                writeln!(f, "  - {name}")?;
            }
        }
        Ok(())
    }
}

//! # Config 模块
//!
//! 命令行工具配置，集中管理所有配置项。
//!
//! ## 配置优先级
//!
//! 1. 命令行参数（最高）
//! 2. 配置文件 (wool.json)
//! 3. 默认值（最低）

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use wool_core::Value;

/// 工具配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WoolConfig {
    /// 对话文件根目录
    #[serde(default = "default_dialogues_root")]
    pub dialogues_root: PathBuf,

    /// 起始节点标题
    #[serde(default = "default_start_node")]
    pub start_node: String,

    /// 随机种子，不设置时从系统熵初始化
    #[serde(default)]
    pub seed: Option<u64>,

    /// 事件时间的 UTC 偏移（分钟）
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// 初始变量文件（JSON 对象）
    #[serde(default)]
    pub variables_file: Option<PathBuf>,

    /// 日志级别，`RUST_LOG` 优先
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// 命令行给出的覆盖项
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub dialogues_root: Option<PathBuf>,
    pub start_node: Option<String>,
    pub seed: Option<u64>,
    pub utc_offset_minutes: Option<i32>,
    pub variables_file: Option<PathBuf>,
    pub log_level: Option<String>,
}

fn default_dialogues_root() -> PathBuf {
    PathBuf::from("dialogues")
}

fn default_start_node() -> String {
    "Start".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WoolConfig {
    fn default() -> Self {
        Self {
            dialogues_root: default_dialogues_root(),
            start_node: default_start_node(),
            seed: None,
            utc_offset_minutes: 0,
            variables_file: None,
            log_level: default_log_level(),
        }
    }
}

impl WoolConfig {
    /// 加载配置文件
    ///
    /// 文件不存在时返回默认配置；存在但无法解析时返回错误。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            fs::read_to_string(path).with_context(|| format!("读取配置文件失败: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("配置文件解析失败: {:?}", path))
    }

    /// 应用命令行覆盖项
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(root) = overrides.dialogues_root {
            self.dialogues_root = root;
        }
        if let Some(node) = overrides.start_node {
            self.start_node = node;
        }
        if overrides.seed.is_some() {
            self.seed = overrides.seed;
        }
        if let Some(offset) = overrides.utc_offset_minutes {
            self.utc_offset_minutes = offset;
        }
        if overrides.variables_file.is_some() {
            self.variables_file = overrides.variables_file;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        self
    }

    /// 读取初始变量，未配置变量文件时为空
    pub fn initial_variables(&self) -> Result<HashMap<String, Value>> {
        let Some(path) = &self.variables_file else {
            return Ok(HashMap::new());
        };
        let content =
            fs::read_to_string(path).with_context(|| format!("读取变量文件失败: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("变量文件必须是 JSON 对象，值为字符串、数字或布尔: {:?}", path))
    }
}

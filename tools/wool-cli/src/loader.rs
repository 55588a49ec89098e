//! # Loader 模块
//!
//! 从文件或目录收集 `.wool` 对话源码。
//!
//! 对话名是相对于根目录的路径，以 `/` 分隔并去掉扩展名，
//! 例如 `dialogues/chapters/one.wool` 在根目录 `dialogues` 下的对话名为 `chapters/one`。

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};
use walkdir::WalkDir;
use wool_core::{Dialogue, ParseErrors, Parser, Project, ProjectErrors, parse_project};

/// 对话文件扩展名
pub const EXTENSION: &str = "wool";

/// 一份对话源码
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub text: String,
}

/// 由文件路径计算对话名
pub fn dialogue_name(root: &Path, file: &Path) -> Result<String> {
    let relative = file
        .strip_prefix(root)
        .with_context(|| format!("{:?} 不在目录 {:?} 中", file, root))?
        .with_extension("");
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// 收集源码
///
/// # 参数
///
/// - `path`: `.wool` 文件或包含 `.wool` 文件的目录
///
/// # 返回
///
/// 单个文件时对话名为文件名（不含扩展名）；目录时按对话名排序。
pub fn collect_sources(path: &Path) -> Result<Vec<Source>> {
    if path.is_file() {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .with_context(|| format!("无效的文件名: {:?}", path))?;
        let text = read(path)?;
        return Ok(vec![Source { name, text }]);
    }
    if !path.is_dir() {
        bail!("路径不存在: {:?}", path);
    }

    let mut sources = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("遍历目录失败: {:?}", path))?;
        let file = entry.path();
        if !entry.file_type().is_file() || file.extension().is_none_or(|ext| ext != EXTENSION) {
            continue;
        }
        let name = dialogue_name(path, file)?;
        debug!(file = ?file, dialogue = %name, "读取对话文件");
        sources.push(Source {
            name,
            text: read(file)?,
        });
    }
    sources.sort_by(|a, b| a.name.cmp(&b.name));
    info!(count = sources.len(), root = ?path, "收集对话文件");
    Ok(sources)
}

fn read(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("读取文件失败: {:?}", file))
}

/// 把源码解析为项目
pub fn load_project(sources: &[Source]) -> Result<Project, ProjectErrors> {
    parse_project(sources.iter().map(|s| (s.name.as_str(), s.text.as_str())))
}

/// 解析单个源码（不检查外部引用）
pub fn load_dialogue(source: &Source) -> Result<Dialogue, ParseErrors> {
    Parser::new().parse(&source.name, &source.text)
}

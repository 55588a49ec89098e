//! # 项目解析
//!
//! 解析一组对话源码，并检查外部节点指针引用的对话都在这一组中。

use tracing::info;

use super::Parser;
use crate::error::{ParseError, ProjectErrors};
use crate::script::ast::Project;

/// 解析一组对话
///
/// # 参数
///
/// - `sources`: (对话名, 源码) 序列
///
/// # 返回
///
/// 所有对话都解析成功且外部引用完整时返回 `Project`，否则返回按对话名分组的错误。
/// 外部引用只在所有对话都解析成功后检查。
pub fn parse_project<I, N, T>(sources: I) -> Result<Project, ProjectErrors>
where
    I: IntoIterator<Item = (N, T)>,
    N: Into<String>,
    T: AsRef<str>,
{
    let mut parser = Parser::new();
    let mut project = Project::new();
    let mut errors = ProjectErrors::default();
    for (name, text) in sources {
        let name = name.into();
        match parser.parse(&name, text.as_ref()) {
            Ok(dialogue) => project.insert(dialogue),
            Err(e) => errors.extend(name, e),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    for dialogue in project.dialogues() {
        for referenced in dialogue.dialogues_referenced() {
            if !project.contains(&referenced) {
                errors.push(
                    dialogue.name(),
                    ParseError::UnknownDialogue {
                        dialogue: dialogue.name().to_string(),
                        referenced,
                    },
                );
            }
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    info!(dialogues = project.len(), "项目解析完成");
    Ok(project)
}

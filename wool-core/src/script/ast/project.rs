//! # 项目
//!
//! 一起加载的一组对话，外部节点指针只能指向同一项目中的对话。

use std::collections::BTreeMap;

use super::dialogue::Dialogue;

/// 对话项目，按对话名排序
#[derive(Debug, Clone, Default)]
pub struct Project {
    dialogues: BTreeMap<String, Dialogue>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加对话，同名对话被替换
    pub fn insert(&mut self, dialogue: Dialogue) {
        self.dialogues.insert(dialogue.name().to_string(), dialogue);
    }

    pub fn dialogue(&self, name: &str) -> Option<&Dialogue> {
        self.dialogues.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dialogues.contains_key(name)
    }

    pub fn dialogues(&self) -> impl Iterator<Item = &Dialogue> {
        self.dialogues.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dialogues.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.dialogues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogues.is_empty()
    }
}

impl FromIterator<Dialogue> for Project {
    fn from_iter<I: IntoIterator<Item = Dialogue>>(iter: I) -> Self {
        let mut project = Project::new();
        for dialogue in iter {
            project.insert(dialogue);
        }
        project
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        let project: Project = ["b/two", "a/one"].into_iter().map(Dialogue::new).collect();
        assert_eq!(project.len(), 2);
        assert!(project.contains("a/one"));
        assert!(project.dialogue("one").is_none());
        let names: Vec<_> = project.names().collect();
        assert_eq!(names, ["a/one", "b/two"]);
    }
}

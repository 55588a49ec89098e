//! # 变量存储
//!
//! 一个用户的变量表：变量名 → (取值, 最后更新时间)。对话执行时读写这里的变量，
//! 外部持久化层通过变更通知同步。
//!
//! ## 设计原则
//!
//! - 读写都在同一把锁内完成，读者不会看到只应用了一半的批量写入
//! - 监听器在变更提交并释放锁之后同步调用，监听器里可以再次访问存储
//! - 锁中毒后继续使用内部数据，出错的监听器不会卡死存储
//!
//! ## 使用示例
//!
//! ```ignore
//! let store = Arc::new(VariableStore::new());
//! store.add_listener(|change: &StoreChange| println!("{change:?}"));
//! store.set_value("name", "Ava".into(), &WriteOptions::new(time));
//!
//! let mut vars = store.live_map(WriteOptions::new(time));
//! evaluate(&expr, &mut vars)?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::script::expr::EvalContext;
use crate::value::Value;

/// 事件时间，带有用户所在时区的偏移
pub type EventTime = DateTime<FixedOffset>;

/// 当前时刻
///
/// # 参数
///
/// - `utc_offset_minutes`: 相对 UTC 的偏移（分钟），超出范围时按 UTC 处理
pub fn event_time_now(utc_offset_minutes: i32) -> EventTime {
    let offset = utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or(Utc.fix());
    Utc::now().with_timezone(&offset)
}

/// 存储中的一个变量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVariable {
    pub name: String,
    pub value: Value,
    /// 最后更新时间
    pub updated: EventTime,
}

/// 变更来源，只用于通知的分发
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    #[default]
    Unknown,
    /// 对话执行
    Dialogue,
    /// 外部同步任务
    ExternalSync,
}

/// 一次写操作的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteOptions {
    /// 事件时间
    pub time: EventTime,
    pub source: ChangeSource,
    /// 是否通知监听器
    pub notify: bool,
}

impl WriteOptions {
    pub fn new(time: EventTime) -> Self {
        Self {
            time,
            source: ChangeSource::Unknown,
            notify: true,
        }
    }

    pub fn with_source(mut self, source: ChangeSource) -> Self {
        self.source = source;
        self
    }

    /// 不通知监听器（例如从持久化层加载）
    pub fn silent(mut self) -> Self {
        self.notify = false;
        self
    }
}

/// 变更描述
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// 新增或更新的变量
    Put {
        variables: Vec<StoredVariable>,
        source: ChangeSource,
    },
    /// 删除的变量
    Remove {
        names: Vec<String>,
        time: EventTime,
        source: ChangeSource,
    },
    /// 全部清空
    Clear {
        time: EventTime,
        source: ChangeSource,
    },
}

impl StoreChange {
    pub fn source(&self) -> ChangeSource {
        match self {
            StoreChange::Put { source, .. }
            | StoreChange::Remove { source, .. }
            | StoreChange::Clear { source, .. } => *source,
        }
    }
}

/// 变更监听器
pub trait StoreListener: Send + Sync {
    fn on_change(&self, change: &StoreChange);
}

impl<F> StoreListener for F
where
    F: Fn(&StoreChange) + Send + Sync,
{
    fn on_change(&self, change: &StoreChange) {
        self(change)
    }
}

/// 监听器句柄，用于移除监听器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// 变量存储
#[derive(Default)]
pub struct VariableStore {
    data: Mutex<HashMap<String, StoredVariable>>,
    listeners: Mutex<Vec<(ListenerHandle, Arc<dyn StoreListener>)>>,
    next_handle: AtomicU64,
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore")
            .field("variables", &self.len())
            .finish()
    }
}

/// 加锁，锁中毒时继续使用内部数据
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        warn!("变量存储的锁已中毒，继续使用内部数据");
        poisoned.into_inner()
    })
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 变量当前值
    pub fn get_value(&self, name: &str) -> Option<Value> {
        lock(&self.data).get(name).map(|v| v.value.clone())
    }

    /// 变量当前值与更新时间
    pub fn get(&self, name: &str) -> Option<StoredVariable> {
        lock(&self.data).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.data).contains_key(name)
    }

    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.data).is_empty()
    }

    /// 全部变量，按名称排序
    pub fn variables(&self) -> Vec<StoredVariable> {
        let mut variables: Vec<_> = lock(&self.data).values().cloned().collect();
        variables.sort_by(|a, b| a.name.cmp(&b.name));
        variables
    }

    /// 当前取值的快照，用于无副作用的执行
    pub fn snapshot(&self) -> HashMap<String, Value> {
        lock(&self.data)
            .iter()
            .map(|(name, v)| (name.clone(), v.value.clone()))
            .collect()
    }

    /// 设置一个变量
    pub fn set_value(&self, name: &str, value: Value, options: &WriteOptions) {
        self.put_all([(name.to_string(), value)], options);
    }

    /// 批量设置变量，所有变量在同一次加锁内写入
    ///
    /// # 参数
    ///
    /// - `variables`: (变量名, 取值) 序列
    /// - `options`: 事件时间、来源以及是否通知
    pub fn put_all<I>(&self, variables: I, options: &WriteOptions)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let variables: Vec<StoredVariable> = variables
            .into_iter()
            .map(|(name, value)| StoredVariable {
                name,
                value,
                updated: options.time,
            })
            .collect();
        if variables.is_empty() {
            return;
        }
        {
            let mut data = lock(&self.data);
            for variable in &variables {
                data.insert(variable.name.clone(), variable.clone());
            }
        }
        debug!(count = variables.len(), source = ?options.source, "写入变量");
        if options.notify {
            self.notify(&StoreChange::Put {
                variables,
                source: options.source,
            });
        }
    }

    /// 删除变量，返回删除前的值
    pub fn remove(&self, name: &str, options: &WriteOptions) -> Option<Value> {
        let removed = lock(&self.data).remove(name)?;
        if options.notify {
            self.notify(&StoreChange::Remove {
                names: vec![name.to_string()],
                time: options.time,
                source: options.source,
            });
        }
        Some(removed.value)
    }

    /// 清空全部变量
    pub fn clear(&self, options: &WriteOptions) {
        lock(&self.data).clear();
        if options.notify {
            self.notify(&StoreChange::Clear {
                time: options.time,
                source: options.source,
            });
        }
    }

    /// 注册监听器
    pub fn add_listener(&self, listener: impl StoreListener + 'static) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((handle, Arc::new(listener)));
        handle
    }

    /// 移除监听器，返回是否存在
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        listeners.len() != before
    }

    /// 写入都通过存储本身完成的映射视图
    pub fn live_map(&self, options: WriteOptions) -> LiveMap<'_> {
        LiveMap {
            store: self,
            options,
        }
    }

    fn notify(&self, change: &StoreChange) {
        let listeners: Vec<_> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.on_change(change);
        }
    }
}

/// 存储的映射视图
///
/// 表达式求值只需要按名称读写变量，写入会经过存储的加锁与通知路径。
pub struct LiveMap<'a> {
    store: &'a VariableStore,
    options: WriteOptions,
}

impl LiveMap<'_> {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.store.get_value(name)
    }

    pub fn put(&mut self, name: &str, value: Value) {
        self.store.set_value(name, value, &self.options);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.store.remove(name, &self.options)
    }

    /// (变量名, 取值) 列表，按名称排序
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.store
            .variables()
            .into_iter()
            .map(|v| (v.name, v.value))
            .collect()
    }
}

impl EvalContext for LiveMap<'_> {
    fn get_var(&self, name: &str) -> Option<Value> {
        self.get(name)
    }

    fn set_var(&mut self, name: &str, value: Value) {
        self.put(name, value);
    }
}

//! # 对话流程集成测试
//!
//! 测试 解析 → 执行 → 变量存储 → 会话记录 的完整链路。
//! 所有测试使用固定的事件时间和随机种子。

use std::sync::{Arc, Mutex};

use chrono::{FixedOffset, TimeZone};
use rand::SeedableRng;
use rand::rngs::StdRng;
use wool_core::script::ast::ActionType;
use wool_core::{
    ActiveDialogue, ChangeSource, ClientMessage, DialogueOutcome, DialogueSession, EventTime,
    NodePointer, Parser, RuntimeError, StoreChange, Value, VariableStore, WriteOptions,
    analyze_project, from_project_errors, parse_project,
};

fn time() -> EventTime {
    FixedOffset::east_opt(2 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 5, 20, 14, 0, 0)
        .unwrap()
}

fn store_with(vars: &[(&str, Value)]) -> Arc<VariableStore> {
    let store = Arc::new(VariableStore::new());
    store.put_all(
        vars.iter().map(|(name, value)| (name.to_string(), value.clone())),
        &WriteOptions::new(time()).silent(),
    );
    store
}

const GREETING: &str = "\
title: Start
speaker: Bot
---
Hello $name
<<if $age >= 18>>
You may enter.
<<endif>>
[[Bye|End]]
===
";

/// 测试最基本的对话：插值、条件与结束
#[test]
fn test_greeting_dialogue() {
    let dialogue = Parser::new().parse("greeting", GREETING).unwrap();
    let store = store_with(&[("name", "Ava".into()), ("age", 20.into())]);
    let mut active = ActiveDialogue::with_rng(&dialogue, store, StdRng::seed_from_u64(1));

    // 1. 开始对话
    let node = active.start(None, time()).unwrap();
    assert_eq!(node.speaker(), Some("Bot"));
    assert_eq!(node.body.plain_text(), "Hello Ava\nYou may enter.");

    // 2. 选择唯一的回复
    let selected = active.process_reply(1, time()).unwrap();
    assert_eq!(selected.pointer, NodePointer::End);
    assert!(selected.actions.is_empty());

    // 3. 指向 End，对话结束
    assert!(active.continue_to(&selected.pointer, time()).unwrap().is_none());
    assert!(active.is_finished());
}

/// 未成年时条件分支不输出
#[test]
fn test_condition_false() {
    let dialogue = Parser::new().parse("greeting", GREETING).unwrap();
    let store = store_with(&[("name", "Ben".into()), ("age", 12.into())]);
    let mut active = ActiveDialogue::with_rng(&dialogue, store, StdRng::seed_from_u64(1));

    let node = active.start(None, time()).unwrap();
    assert_eq!(node.body.plain_text(), "Hello Ben");
}

const GREETING_INLINE: &str = "\
title: Start
speaker: Bot
---
Hello $name<<if $age >= 18>>You may enter.<<else>>Sorry.<<endif>>[[Bye|End]]
===
";

/// 同一行中的文本与子句正文直接相连，不插入换行
#[test]
fn test_greeting_on_one_line() {
    let dialogue = Parser::new().parse("greeting", GREETING_INLINE).unwrap();
    let enter = |age: i64| {
        let store = store_with(&[("name", "Ava".into()), ("age", age.into())]);
        let mut active = ActiveDialogue::with_rng(&dialogue, store, StdRng::seed_from_u64(1));
        active.start(None, time()).unwrap()
    };

    let node = enter(20);
    assert_eq!(node.body.plain_text(), "Hello AvaYou may enter.");
    let message = ClientMessage::from_node(&node);
    assert_eq!(message.replies.len(), 1);
    assert_eq!(message.replies[0].text(), "Bye");
    assert!(!message.replies[0].auto_forward);
    assert_eq!(node.body.replies()[0].pointer, NodePointer::End);

    assert_eq!(enter(12).body.plain_text(), "Hello AvaSorry.");
}

/// 回复命令写入变量，监听器收到来源为对话的变更
#[test]
fn test_reply_commands_notify_listeners() {
    let text = "\
title: Start
speaker: Bot
---
Ready?
[[Yes|Next|<<set $ready = true>><<action type=\"generic\" value=\"ding.mp3\">>]]
===
title: Next
speaker: Bot
---
<<if $ready>>Let's go.<<endif>>
===
";
    let dialogue = Parser::new().parse("ready", text).unwrap();
    let store = Arc::new(VariableStore::new());
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    store.add_listener(move |change: &StoreChange| sink.lock().unwrap().push(change.clone()));

    let mut active = ActiveDialogue::with_rng(&dialogue, Arc::clone(&store), StdRng::seed_from_u64(1));
    active.start(None, time()).unwrap();
    let selected = active.process_reply(1, time()).unwrap();
    assert_eq!(selected.actions.len(), 1);
    assert_eq!(selected.actions[0].action_type, ActionType::Generic);
    assert_eq!(selected.actions[0].value.to_raw_string(), "ding.mp3");

    let next = active.continue_to(&selected.pointer, time()).unwrap().unwrap();
    assert_eq!(next.body.plain_text(), "Let's go.");
    assert_eq!(store.get_value("ready"), Some(Value::Bool(true)));

    let changes = changes.lock().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].source(), ChangeSource::Dialogue);
}

/// 未知回复返回错误，状态不变
#[test]
fn test_unknown_reply() {
    let dialogue = Parser::new().parse("greeting", GREETING).unwrap();
    let mut active = ActiveDialogue::with_rng(&dialogue, store_with(&[]), StdRng::seed_from_u64(1));
    active.start(None, time()).unwrap();

    let err = active.process_reply(9, time()).unwrap_err();
    assert!(matches!(err, RuntimeError::ReplyNotFound { reply_id: 9, .. }));
    assert!(!active.is_finished());
}

/// 未被选中的分支中的回复不能选择
#[test]
fn test_reply_in_skipped_branch() {
    let text = "\
title: Start
speaker: Bot
---
<<random>>[[Left|End]]<<or>>[[Right|End]]<<endrandom>>
===
";
    let coin = Parser::new().parse("coin", text).unwrap();
    let mut active = ActiveDialogue::with_rng(&coin, store_with(&[]), StdRng::seed_from_u64(5));
    let node = active.start(None, time()).unwrap();
    assert_eq!(node.body.replies().len(), 1);
    let shown = node.body.replies()[0].id;
    let hidden = if shown == 1 { 2 } else { 1 };
    assert!(matches!(
        active.process_reply(hidden, time()),
        Err(RuntimeError::ReplyNotFound { reply_id, .. }) if reply_id == hidden
    ));
    assert!(active.process_reply(shown, time()).is_ok());

    // if 分支同理
    let text = "\
title: Start
speaker: Bot
---
<<if $age >= 18>>[[Enter|End]]<<else>>[[Leave|End]]<<endif>>
===
";
    let gate = Parser::new().parse("gate", text).unwrap();
    let store = store_with(&[("age", 12.into())]);
    let mut active = ActiveDialogue::with_rng(&gate, store, StdRng::seed_from_u64(1));
    active.start(None, time()).unwrap();
    assert_eq!(active.offered_replies(), [2]);
    assert!(matches!(
        active.user_statement(1),
        Err(RuntimeError::ReplyNotFound { reply_id: 1, .. })
    ));
    assert_eq!(active.user_statement(2).unwrap(), "Leave");
}

/// 外部指针指向不存在的节点时，会话停留在原节点
#[test]
fn test_session_recovers_from_missing_node() {
    let broken = "\
title: Start
speaker: Host
---
Pick a room.
[[Library|rooms/library.Attic]]
[[Library|rooms/library.Start]]
===
";
    let project = parse_project([("lobby", broken), ("rooms/library", LIBRARY)]).unwrap();
    let store = store_with(&[("name", "Ava".into())]);
    let mut session = DialogueSession::with_rng(&project, store, StdRng::seed_from_u64(3));
    session.start("lobby", None, time()).unwrap();

    assert!(matches!(
        session.progress(1, time()),
        Err(RuntimeError::NodeNotFound { node, .. }) if node == "Attic"
    ));
    assert_eq!(session.log().len(), 1);
    assert_eq!(session.log().dialogues().len(), 1);
    assert_eq!(session.active().unwrap().dialogue().name(), "lobby");

    let library = session.progress(2, time()).unwrap().node.unwrap();
    assert_eq!(library.body.plain_text(), "Quiet please, Ava.");
    let outcomes: Vec<_> = session.log().dialogues().iter().map(|d| d.outcome).collect();
    assert_eq!(outcomes, [DialogueOutcome::Completed, DialogueOutcome::Active]);
}

/// 相同种子的随机分支结果相同
#[test]
fn test_random_is_reproducible() {
    let text = "\
title: Start
speaker: Bot
---
<<random weight=\"1\">>A<<or weight=\"1\">>B<<or weight=\"1\">>C<<endrandom>>
===
";
    let dialogue = Parser::new().parse("dice", text).unwrap();
    let roll = |seed: u64| {
        let mut active =
            ActiveDialogue::with_rng(&dialogue, store_with(&[]), StdRng::seed_from_u64(seed));
        active.start(None, time()).unwrap().body.plain_text()
    };
    for seed in 0..8 {
        let first = roll(seed);
        assert!(["A", "B", "C"].contains(&first.as_str()));
        assert_eq!(first, roll(seed));
    }
}

const LOBBY: &str = "\
title: Start
speaker: Host
---
Welcome, $name.
[[Show me around|Tour]]
===
title: Tour
speaker: Host
---
Pick a room.
[[Library|rooms/library.Start|<<set $visited = \"library\">>]]
===
";

const LIBRARY: &str = "\
title: Start
speaker: Librarian
---
Quiet please, $name.
[[Leave|End]]
===
";

/// 会话跨对话前进，客户端消息与交互记录保持一致
#[test]
fn test_session_across_dialogues() {
    let project = parse_project([("lobby", LOBBY), ("rooms/library", LIBRARY)]).unwrap();
    let store = store_with(&[("name", "Ava".into())]);
    let mut session = DialogueSession::with_rng(&project, store, StdRng::seed_from_u64(3));

    // 1. 开始，展示第一条消息
    let node = session.start("lobby", None, time()).unwrap();
    let message = ClientMessage::from_node(&node);
    assert_eq!(message.text(), "Welcome, Ava.");
    assert_eq!(message.replies[0].text(), "Show me around");

    // 2. 前进到 Tour，再跟随外部指针进入图书馆
    session.progress(1, time()).unwrap();
    let progress = session.progress(1, time()).unwrap();
    let library = progress.node.unwrap();
    assert_eq!(library.speaker(), Some("Librarian"));
    assert_eq!(library.body.plain_text(), "Quiet please, Ava.");
    assert_eq!(session.store().get_value("visited"), Some("library".into()));

    // 3. 结束
    assert!(session.progress(1, time()).unwrap().node.is_none());
    assert!(session.is_finished());

    let log = session.log();
    let outcomes: Vec<_> = log.dialogues().iter().map(|d| (d.dialogue.as_str(), d.outcome)).collect();
    assert_eq!(
        outcomes,
        [
            ("lobby", DialogueOutcome::Completed),
            ("rooms/library", DialogueOutcome::Completed),
        ]
    );
    assert_eq!(log.agent_count(), 3);
    assert_eq!(log.len(), 6);
    let statements: Vec<_> = log
        .interactions()
        .iter()
        .filter(|i| !i.is_agent())
        .map(|i| i.statement.as_str())
        .collect();
    assert_eq!(statements, ["Show me around", "Library", "Leave"]);
}

/// 项目中的错误与诊断
#[test]
fn test_project_diagnostics() {
    let errors = parse_project([
        ("lobby", LOBBY),
        ("broken", "title: Start\nspeaker: Bot\n---\n<<if $a>>open\n===\n"),
    ])
    .unwrap_err();
    // 外部引用检查只在所有对话解析成功后进行
    assert_eq!(errors.dialogue_count(), 1);
    let diagnostics = from_project_errors(&errors);
    assert!(diagnostics.has_errors());
    assert!(diagnostics.diagnostics.iter().all(|d| d.dialogue == "broken"));

    let errors = parse_project([("lobby", LOBBY)]).unwrap_err();
    assert!(errors.get("lobby").unwrap().contains_message("rooms/library"));

    let project = parse_project([("lobby", LOBBY), ("rooms/library", LIBRARY)]).unwrap();
    let result = analyze_project(&project);
    assert!(!result.has_errors());
    assert_eq!(result.warn_count(), 0);
    assert!(result.diagnostics.iter().any(|d| d.message.contains("$name")));
}

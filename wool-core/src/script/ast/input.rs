//! # 输入命令
//!
//! `<<input type="...">>` 只能出现在回复的陈述部分，让用户在选择回复时输入内容。
//!
//! ## 子类型
//!
//! - `text` / `longtext`：自由文本，可限制长度、字符类别并给出大写提示
//! - `email`：邮箱地址
//! - `numeric`：整数，可限制范围
//! - `set`：一组可勾选的选项，每个选项对应一个布尔变量
//! - `time`：时刻，可指定粒度和上下限

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};

use super::vstring::VariableString;
use crate::script::expr::EvalContext;
use crate::value::Value;

/// 时间输入中表示“当前时刻”的取值
pub const TIME_NOW: &str = "now";

/// 文本输入（`text` 与 `longtext` 共用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextInput {
    /// 目标变量名
    pub variable: String,
    /// 最小长度
    pub min: Option<i64>,
    /// 最大长度
    pub max: Option<i64>,
    pub allow_numbers: bool,
    pub allow_special_characters: bool,
    pub allow_spaces: bool,
    pub cap_characters: bool,
    pub cap_words: bool,
    pub cap_sentences: bool,
    pub force_cap_characters: bool,
    pub force_cap_words: bool,
    pub force_cap_sentences: bool,
}

impl TextInput {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            min: None,
            max: None,
            allow_numbers: true,
            allow_special_characters: true,
            allow_spaces: true,
            cap_characters: false,
            cap_words: false,
            cap_sentences: false,
            force_cap_characters: false,
            force_cap_words: false,
            force_cap_sentences: false,
        }
    }

    /// 布尔选项：(属性名, 当前值, 默认值)
    fn flags(&self) -> [(&'static str, bool, bool); 9] {
        [
            ("allowNumbers", self.allow_numbers, true),
            ("allowSpecialCharacters", self.allow_special_characters, true),
            ("allowSpaces", self.allow_spaces, true),
            ("capCharacters", self.cap_characters, false),
            ("capWords", self.cap_words, false),
            ("capSentences", self.cap_sentences, false),
            ("forceCapCharacters", self.force_cap_characters, false),
            ("forceCapWords", self.force_cap_words, false),
            ("forceCapSentences", self.force_cap_sentences, false),
        ]
    }
}

/// 邮箱输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailInput {
    pub variable: String,
}

/// 数字输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericInput {
    pub variable: String,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

/// 选项集合中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetOption {
    /// 勾选状态写入的变量
    pub variable: String,
    /// 选项文本
    pub text: VariableString,
}

/// 选项集合输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetInput {
    pub options: Vec<SetOption>,
}

/// 时间输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeInput {
    pub variable: String,
    /// 可选时刻的粒度（分钟），至少为 1
    pub granularity_minutes: i64,
    pub start_time: Option<VariableString>,
    pub min_time: Option<VariableString>,
    pub max_time: Option<VariableString>,
}

impl TimeInput {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            granularity_minutes: 1,
            start_time: None,
            min_time: None,
            max_time: None,
        }
    }

    fn bounds(&self) -> [(&'static str, Option<&VariableString>); 3] {
        [
            ("startTime", self.start_time.as_ref()),
            ("minTime", self.min_time.as_ref()),
            ("maxTime", self.max_time.as_ref()),
        ]
    }
}

/// 输入命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputCommand {
    Text(TextInput),
    Longtext(TextInput),
    Email(EmailInput),
    Numeric(NumericInput),
    Set(SetInput),
    Time(TimeInput),
}

impl InputCommand {
    /// `type` 属性的取值
    pub fn input_type(&self) -> &'static str {
        match self {
            InputCommand::Text(_) => "text",
            InputCommand::Longtext(_) => "longtext",
            InputCommand::Email(_) => "email",
            InputCommand::Numeric(_) => "numeric",
            InputCommand::Set(_) => "set",
            InputCommand::Time(_) => "time",
        }
    }

    /// 提供给客户端的参数
    ///
    /// 变量引用按原样输出；执行后的命令中所有字符串都已解析。
    pub fn parameters(&self) -> JsonValue {
        let mut params = Map::new();
        match self {
            InputCommand::Text(input) | InputCommand::Longtext(input) => {
                params.insert("variableName".into(), json!(input.variable));
                if let Some(min) = input.min {
                    params.insert("min".into(), json!(min));
                }
                if let Some(max) = input.max {
                    params.insert("max".into(), json!(max));
                }
                for (name, value, _) in input.flags() {
                    params.insert(name.into(), json!(value));
                }
            }
            InputCommand::Email(input) => {
                params.insert("variableName".into(), json!(input.variable));
            }
            InputCommand::Numeric(input) => {
                params.insert("variableName".into(), json!(input.variable));
                params.insert("min".into(), json!(input.min));
                params.insert("max".into(), json!(input.max));
            }
            InputCommand::Set(input) => {
                let options: Vec<JsonValue> = input
                    .options
                    .iter()
                    .map(|option| {
                        json!({
                            "variableName": option.variable,
                            "text": option.text.to_raw_string(),
                        })
                    })
                    .collect();
                params.insert("options".into(), JsonValue::Array(options));
            }
            InputCommand::Time(input) => {
                params.insert("variableName".into(), json!(input.variable));
                params.insert(
                    "granularityMinutes".into(),
                    json!(input.granularity_minutes),
                );
                for (name, bound) in input.bounds() {
                    if let Some(bound) = bound {
                        params.insert(name.into(), json!(bound.to_raw_string()));
                    }
                }
            }
        }
        JsonValue::Object(params)
    }

    /// 用户输入后在对话记录中显示的文本
    ///
    /// `set` 输出所有已勾选选项文本组成的 JSON 数组，其他类型输出变量当前值。
    pub fn statement_log<C: EvalContext + ?Sized>(&self, ctx: &C) -> String {
        let current = |name: &str| ctx.get_var(name).unwrap_or(Value::Null);
        match self {
            InputCommand::Text(TextInput { variable, .. })
            | InputCommand::Longtext(TextInput { variable, .. })
            | InputCommand::Email(EmailInput { variable })
            | InputCommand::Numeric(NumericInput { variable, .. })
            | InputCommand::Time(TimeInput { variable, .. }) => current(variable).to_string(),
            InputCommand::Set(input) => {
                let checked: Vec<String> = input
                    .options
                    .iter()
                    .filter(|option| current(&option.variable).is_truthy())
                    .map(|option| option.text.resolve(ctx))
                    .collect();
                JsonValue::from(checked).to_string()
            }
        }
    }

    /// 收集读取的变量
    pub fn collect_read_variables(&self, names: &mut BTreeSet<String>) {
        match self {
            InputCommand::Set(input) => {
                for option in &input.options {
                    option.text.collect_variables(names);
                }
            }
            InputCommand::Time(input) => {
                for bound in input.bounds().into_iter().filter_map(|(_, b)| b) {
                    bound.collect_variables(names);
                }
            }
            _ => {}
        }
    }

    /// 收集写入的变量
    pub fn collect_write_variables(&self, names: &mut BTreeSet<String>) {
        match self {
            InputCommand::Text(TextInput { variable, .. })
            | InputCommand::Longtext(TextInput { variable, .. })
            | InputCommand::Email(EmailInput { variable })
            | InputCommand::Numeric(NumericInput { variable, .. })
            | InputCommand::Time(TimeInput { variable, .. }) => {
                names.insert(variable.clone());
            }
            InputCommand::Set(input) => {
                names.extend(input.options.iter().map(|o| o.variable.clone()));
            }
        }
    }
}

/// 规范化时间取值
///
/// `now`（不区分大小写）保持为 `now`，其余按 ISO 本地时间解析并格式化为 `HH:MM`。
///
/// # 返回
///
/// 无法解析时返回 `None`
pub fn evaluate_time(text: &str) -> Option<String> {
    if text.eq_ignore_ascii_case(TIME_NOW) {
        return Some(TIME_NOW.to_string());
    }
    ["%H:%M:%S%.f", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
        .map(|time| time.format("%H:%M").to_string())
}

impl fmt::Display for InputCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<<input type=\"{}\"", self.input_type())?;
        match self {
            InputCommand::Text(input) | InputCommand::Longtext(input) => {
                write!(f, " value=\"${}\"", input.variable)?;
                if let Some(min) = input.min {
                    write!(f, " min=\"{min}\"")?;
                }
                if let Some(max) = input.max {
                    write!(f, " max=\"{max}\"")?;
                }
                for (name, value, default) in input.flags() {
                    if value != default {
                        write!(f, " {name}=\"{value}\"")?;
                    }
                }
            }
            InputCommand::Email(input) => write!(f, " value=\"${}\"", input.variable)?,
            InputCommand::Numeric(input) => {
                write!(f, " value=\"${}\"", input.variable)?;
                if let Some(min) = input.min {
                    write!(f, " min=\"{min}\"")?;
                }
                if let Some(max) = input.max {
                    write!(f, " max=\"{max}\"")?;
                }
            }
            InputCommand::Set(input) => {
                for (i, option) in input.options.iter().enumerate() {
                    write!(
                        f,
                        " value{n}=\"${}\" option{n}=\"{}\"",
                        option.variable,
                        option.text.to_quoted_code(),
                        n = i + 1
                    )?;
                }
            }
            InputCommand::Time(input) => {
                write!(f, " value=\"${}\"", input.variable)?;
                write!(f, " granularityMinutes=\"{}\"", input.granularity_minutes)?;
                for (name, bound) in input.bounds() {
                    if let Some(bound) = bound {
                        write!(f, " {name}=\"{}\"", bound.to_quoted_code())?;
                    }
                }
            }
        }
        f.write_str(">>")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_evaluate_time() {
        assert_eq!(evaluate_time("NOW").as_deref(), Some("now"));
        assert_eq!(evaluate_time("09:05").as_deref(), Some("09:05"));
        assert_eq!(evaluate_time("21:30:15").as_deref(), Some("21:30"));
        assert_eq!(evaluate_time("25:00"), None);
        assert_eq!(evaluate_time("noon"), None);
    }

    #[test]
    fn test_text_display_omits_defaults() {
        let mut input = TextInput::new("answer");
        input.max = Some(40);
        input.allow_spaces = false;
        input.cap_words = true;
        assert_eq!(
            InputCommand::Text(input).to_string(),
            r#"<<input type="text" value="$answer" max="40" allowSpaces="false" capWords="true">>"#
        );
    }

    #[test]
    fn test_text_parameters() {
        let input = InputCommand::Longtext(TextInput::new("story"));
        let params = input.parameters();
        assert_eq!(params["variableName"], "story");
        assert_eq!(params["allowNumbers"], true);
        assert_eq!(params["forceCapSentences"], false);
        assert!(params.get("min").is_none());
    }

    #[test]
    fn test_set_statement_log_lists_checked_labels() {
        let input = InputCommand::Set(SetInput {
            options: vec![
                SetOption {
                    variable: "likesTea".into(),
                    text: VariableString::from_text("Tea"),
                },
                SetOption {
                    variable: "likesCoffee".into(),
                    text: VariableString::from_text("Coffee"),
                },
            ],
        });
        let mut vars = HashMap::new();
        vars.insert("likesCoffee".to_string(), Value::Bool(true));
        vars.insert("likesTea".to_string(), Value::Bool(false));
        assert_eq!(input.statement_log(&vars), r#"["Coffee"]"#);

        let mut written = BTreeSet::new();
        input.collect_write_variables(&mut written);
        assert_eq!(written.len(), 2);
    }

    #[test]
    fn test_time_display_and_reads() {
        let mut time = TimeInput::new("wake");
        time.granularity_minutes = 15;
        let mut min = VariableString::new();
        min.push_variable("earliest");
        time.min_time = Some(min);
        time.max_time = Some(VariableString::from_text("12:00"));
        let input = InputCommand::Time(time);
        assert_eq!(
            input.to_string(),
            r#"<<input type="time" value="$wake" granularityMinutes="15" minTime="$earliest" maxTime="12:00">>"#
        );
        let mut read = BTreeSet::new();
        input.collect_read_variables(&mut read);
        assert!(read.contains("earliest"));

        let mut vars = HashMap::new();
        vars.insert("wake".to_string(), Value::from("07:30"));
        assert_eq!(input.statement_log(&vars), "07:30");
    }
}

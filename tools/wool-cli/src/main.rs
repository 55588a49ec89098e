//! # WOOL CLI
//!
//! WOOL 对话脚本工具：检查、汇总与交互式试玩。
//!
//! ## 用法
//!
//! ```bash
//! # 检查目录下的全部对话（默认目录来自 wool.json 的 dialogues_root）
//! wool check
//! wool check dialogues --verbose
//!
//! # 输出单个对话的概要
//! wool summary dialogues/intro.wool
//!
//! # 在终端中试玩
//! wool run dialogues/intro.wool
//! wool run dialogues --dialogue chapters/one --seed 42 --vars vars.json
//! ```

mod config;
mod loader;
mod play;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wool_core::{
    DiagnosticLevel, DiagnosticResult, DialogueSession, Project, VariableStore, WriteOptions,
    analyze_dialogue, analyze_project, event_time_now, from_parse_errors, from_project_errors,
};

use config::{ConfigOverrides, WoolConfig};
use loader::{Source, collect_sources, load_dialogue, load_project};
use play::{PlayOutcome, Player};

#[derive(Parser)]
#[command(name = "wool")]
#[command(about = "WOOL 对话脚本工具 - 检查、汇总与交互式试玩")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件（默认：wool.json）
    #[arg(short, long, default_value = "wool.json", global = true)]
    config: PathBuf,

    /// 日志级别，覆盖配置文件
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 检查对话文件或目录
    Check {
        /// `.wool` 文件或目录（默认：配置中的 dialogues_root）
        path: Option<PathBuf>,

        /// 同时输出 INFO 级别的诊断
        #[arg(short, long)]
        verbose: bool,
    },

    /// 输出单个对话的概要
    Summary {
        /// `.wool` 文件
        file: PathBuf,
    },

    /// 在终端中试玩对话
    Run {
        /// `.wool` 文件或目录（默认：配置中的 dialogues_root）
        path: Option<PathBuf>,

        /// 对话名（目录模式下必需）
        #[arg(short, long)]
        dialogue: Option<String>,

        /// 起始节点
        #[arg(short, long)]
        node: Option<String>,

        /// 随机种子
        #[arg(long)]
        seed: Option<u64>,

        /// 初始变量文件（JSON 对象）
        #[arg(long)]
        vars: Option<PathBuf>,

        /// 事件时间的 UTC 偏移（分钟）
        #[arg(long)]
        utc_offset: Option<i32>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match WoolConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = config.with_overrides(overrides(&cli));
    init_logging(&config.log_level);

    let result = match cli.command {
        Commands::Check { path, verbose } => check(&resolve(path, &config), verbose),
        Commands::Summary { file } => summary(&file),
        Commands::Run { path, dialogue, .. } => run(&resolve(path, &config), dialogue, &config),
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn overrides(cli: &Cli) -> ConfigOverrides {
    let mut overrides = ConfigOverrides {
        log_level: cli.log_level.clone(),
        ..ConfigOverrides::default()
    };
    if let Commands::Run {
        node,
        seed,
        vars,
        utc_offset,
        ..
    } = &cli.command
    {
        overrides.start_node = node.clone();
        overrides.seed = *seed;
        overrides.variables_file = vars.clone();
        overrides.utc_offset_minutes = *utc_offset;
    }
    overrides
}

/// `RUST_LOG` 优先于配置的日志级别
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn resolve(path: Option<PathBuf>, config: &WoolConfig) -> PathBuf {
    path.unwrap_or_else(|| config.dialogues_root.clone())
}

fn print_diagnostics(result: &DiagnosticResult, min_level: DiagnosticLevel) {
    for diagnostic in result.filter_by_level(min_level) {
        println!("{}", diagnostic);
    }
}

/// 解析并分析对话，返回是否没有错误
fn check(path: &Path, verbose: bool) -> Result<bool> {
    let sources = collect_sources(path)?;
    if sources.is_empty() {
        bail!("{:?} 中没有 .wool 文件", path);
    }
    let min_level = if verbose {
        DiagnosticLevel::Info
    } else {
        DiagnosticLevel::Warn
    };

    let project = match load_project(&sources) {
        Ok(project) => project,
        Err(errors) => {
            let result = from_project_errors(&errors);
            print_diagnostics(&result, min_level);
            println!(
                "❌ {} 个对话中共 {} 个错误",
                errors.dialogue_count(),
                result.error_count()
            );
            return Ok(false);
        }
    };

    let result = analyze_project(&project);
    print_diagnostics(&result, min_level);
    println!(
        "✅ {} 个对话检查通过（{} 个警告）",
        project.len(),
        result.warn_count()
    );
    Ok(true)
}

fn summary(file: &Path) -> Result<bool> {
    let sources = collect_sources(file)?;
    let Some(source) = sources.first() else {
        bail!("{:?} 中没有 .wool 文件", file);
    };
    match load_dialogue(source) {
        Ok(dialogue) => {
            print!("{}", dialogue.summary());
            print_diagnostics(&analyze_dialogue(&dialogue), DiagnosticLevel::Warn);
            Ok(true)
        }
        Err(errors) => {
            print_diagnostics(&from_parse_errors(&source.name, &errors), DiagnosticLevel::Error);
            Ok(false)
        }
    }
}

fn run(path: &Path, dialogue: Option<String>, config: &WoolConfig) -> Result<bool> {
    let sources = collect_sources(path)?;
    let dialogue = match (dialogue, path.is_file()) {
        (Some(name), _) => name,
        (None, true) => sources
            .first()
            .map(|source: &Source| source.name.clone())
            .context("没有可试玩的对话")?,
        (None, false) => bail!("目录模式下必须用 --dialogue 指定对话名"),
    };

    let project: Project = match load_project(&sources) {
        Ok(project) => project,
        Err(errors) => {
            print_diagnostics(&from_project_errors(&errors), DiagnosticLevel::Error);
            return Ok(false);
        }
    };

    let store = Arc::new(VariableStore::new());
    let variables = config.initial_variables()?;
    if !variables.is_empty() {
        info!(count = variables.len(), "加载初始变量");
    }
    store.put_all(
        variables,
        &WriteOptions::new(event_time_now(config.utc_offset_minutes)).silent(),
    );

    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let session = DialogueSession::with_rng(&project, store, rng);
    let stdin = io::stdin();
    let mut player = Player::new(session, stdin.lock(), io::stdout(), config.utc_offset_minutes);
    let outcome = player.play(&dialogue, Some(config.start_node.as_str()))?;
    info!(?outcome, interactions = player.session().log().len(), "试玩结束");
    Ok(outcome == PlayOutcome::Finished)
}

//! Voice Command - 语音指令控制台
//!
//! 入口：初始化日志、创建编排器，从标准输入读取指令驱动状态机，并打印每次状态变化。
//! 平台语音识别不可用时，用 /listen、/hear、/end 模拟采集事件。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use voice_command::core::shutdown::{
    run_with_graceful_shutdown, OrchestratorCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};
use voice_command::speech::ManualCapture;
use voice_command::{create_orchestrator, observability, CommandHandle, CommandSnapshot};

const HELP: &str = "\
Commands:
  <text>              submit text as a voice command
  /open               reset the console
  /listen             start speech capture
  /hear <text>        deliver a transcript to the active capture
  /mic-error <code>   deliver a capture error code (e.g. not-allowed)
  /end                end the active capture (platform onend)
  /stop               stop capture and submit the transcript
  /cancel             cancel polling and return to idle
  /close              close the console
  /quit               exit";

/// 控制台输入
#[derive(Debug, PartialEq)]
enum ConsoleInput {
    Text(String),
    Open,
    Listen,
    Hear(String),
    MicError(String),
    End,
    Stop,
    Cancel,
    Close,
    Help,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> ConsoleInput {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return ConsoleInput::Text(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim().to_string()),
        None => (rest, String::new()),
    };
    match name {
        "open" => ConsoleInput::Open,
        "listen" => ConsoleInput::Listen,
        "hear" => ConsoleInput::Hear(arg),
        "mic-error" => ConsoleInput::MicError(arg),
        "end" => ConsoleInput::End,
        "stop" => ConsoleInput::Stop,
        "cancel" => ConsoleInput::Cancel,
        "close" => ConsoleInput::Close,
        "help" => ConsoleInput::Help,
        "quit" | "exit" => ConsoleInput::Quit,
        other => ConsoleInput::Unknown(other.to_string()),
    }
}

fn print_snapshot(s: &CommandSnapshot) {
    let mut line = format!("[{:?}]", s.state);
    if !s.transcribed_text.is_empty() {
        line.push_str(&format!(" \"{}\"", s.transcribed_text));
    }
    if s.is_polling {
        line.push_str(&format!(" polling attempt {}", s.polling_attempts));
    }
    if let Some(progress) = &s.progress_message {
        line.push_str(&format!(" - {progress}"));
    }
    if let Some(url) = s.result.as_ref().and_then(|r| r.file_url.as_deref()) {
        line.push_str(&format!(" report: {url}"));
    }
    if let Some(error) = &s.error {
        line.push_str(&format!(" error: {error}"));
    }
    println!("{line}");
    if let Some(details) = &s.error_details {
        for (field, messages) in details {
            println!("    {field}: {}", messages.join("; "));
        }
    }
}

async fn run_console(
    handle: CommandHandle,
    capture: Arc<ManualCapture>,
    shutdown: Arc<ShutdownManager>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let result = match parse_input(&line) {
            ConsoleInput::Text(text) => handle.process_text(text).await,
            ConsoleInput::Open => handle.open().await,
            ConsoleInput::Listen => handle.start_capture().await,
            ConsoleInput::Hear(text) => {
                if !capture.transcript(text, true) {
                    println!("No active capture, use /listen first");
                }
                Ok(())
            }
            ConsoleInput::MicError(code) => {
                capture.error(&code);
                Ok(())
            }
            ConsoleInput::End => {
                capture.end();
                Ok(())
            }
            ConsoleInput::Stop => handle.stop_capture().await,
            ConsoleInput::Cancel => handle.cancel_polling().await,
            ConsoleInput::Close => handle.close().await,
            ConsoleInput::Help => {
                println!("{HELP}");
                Ok(())
            }
            ConsoleInput::Quit => break,
            ConsoleInput::Unknown(name) => {
                println!("Unknown command /{name}, try /help");
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::debug!("Command rejected: {}", e);
        }
    }

    shutdown.shutdown(ShutdownReason::UserInitiated);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let capture = Arc::new(ManualCapture::new());
    let handle = create_orchestrator(config_path, capture.clone());
    handle
        .open()
        .await
        .context("Failed to open voice command console")?;

    let mut state_rx = handle.subscribe();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let snapshot = state_rx.borrow_and_update().clone();
            print_snapshot(&snapshot);
        }
    });

    let shutdown = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(OrchestratorCleanup::new(handle.clone()));

    let console = run_console(handle, capture, shutdown.clone());
    run_with_graceful_shutdown(
        shutdown.clone(),
        async {
            if let Err(e) = console.await {
                tracing::error!("Console stopped: {:#}", e);
            }
        },
        move || async move { coordinator.run_cleanup().await },
    )
    .await;

    tracing::info!("Voice command console exited ({:?})", shutdown.reason());
    Ok(())
}

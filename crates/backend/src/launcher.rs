//! Agent child-process launching shared by the new and continue paths.
//!
//! The command template runs inside the user's interactive login shell so
//! aliases and environment from the shell config apply; the prompt and
//! session id are quoted to survive the shell re-parse.

use std::{process::Stdio, sync::Arc, time::Duration};

use {
    tokio::{io::AsyncReadExt, process::Command, time::timeout},
    tracing::{error, info, warn},
};

use larkin_protocol::rpc::{LaunchResponse, LaunchStatus};

use crate::state::BackendState;

/// How long the synchronous startup check waits before handing off.
const STARTUP_CHECK: Duration = Duration::from_secs(2);
/// Hard deadline for the detached waiter.
const WAITER_TIMEOUT: Duration = Duration::from_secs(600);
/// Caps on echoed child output.
const MAX_OUTPUT_CHARS: usize = 1000;
const MAX_NOTIFICATION_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    New,
    Resume,
}

/// Build the agent command line for one launch.
fn build_command_line(
    claude_command: &str,
    prompt: &str,
    session_id: &str,
    mode: SessionMode,
) -> String {
    let prompt = shell_words::quote(prompt);
    let session = shell_words::quote(session_id);
    match mode {
        SessionMode::New => format!("{claude_command} -p {prompt} --session-id {session}"),
        SessionMode::Resume => format!("{claude_command} -p {prompt} --resume {session}"),
    }
}

/// Pick the shell flags that load the user's interactive configuration.
///
/// zsh wants `-ic` (aliases live in ~/.zshrc), fish loads config on any `-c`,
/// everything else gets a login shell via `-lc`.
fn shell_invocation(shell: &str, command_line: &str) -> (String, Vec<String>) {
    let shell_name = shell.rsplit('/').next().unwrap_or(shell);
    let flag = match shell_name {
        "zsh" => "-ic",
        "fish" => "-c",
        _ => "-lc",
    };
    (shell.to_string(), vec![flag.into(), command_line.into()])
}

fn user_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".into())
}

/// Spawn the agent and report within the startup window.
///
/// - exited 0 → `completed` with (truncated) stdout
/// - exited non-zero → `Err` with stderr (or stdout, or the exit code)
/// - still running → `processing`; a detached waiter owns the child and
///   notifies the chat on abnormal exit or the 10-minute deadline
pub async fn launch(
    state: Arc<BackendState>,
    mode: SessionMode,
    session_id: &str,
    project_dir: &str,
    prompt: &str,
    chat_id: Option<String>,
    claude_command: &str,
) -> Result<LaunchResponse, String> {
    let command_line = build_command_line(claude_command, prompt, session_id, mode);
    let (program, args) = shell_invocation(&user_shell(), &command_line);

    info!(
        session_id,
        project_dir,
        command = claude_command,
        mode = ?mode,
        "launching agent"
    );

    let mut child = Command::new(&program)
        .args(&args)
        .current_dir(project_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            error!(error = %e, program, "failed to start agent process");
            e.to_string()
        })?;

    match timeout(STARTUP_CHECK, child.wait()).await {
        Ok(Ok(status)) => {
            let (stdout, stderr) = drain_output(&mut child).await;
            if status.success() {
                info!(session_id, "agent command completed quickly");
                Ok(LaunchResponse {
                    status: LaunchStatus::Completed,
                    output: Some(truncate(&stdout, MAX_OUTPUT_CHARS)),
                    session_id: Some(session_id.to_string()),
                })
            } else {
                let code = status.code().unwrap_or(-1);
                let mut message = truncate(stderr.trim(), MAX_NOTIFICATION_CHARS);
                if message.is_empty() {
                    message = truncate(stdout.trim(), MAX_NOTIFICATION_CHARS);
                }
                if message.is_empty() {
                    message = format!("命令执行失败，退出码: {code}");
                }
                warn!(session_id, code, "agent command failed at startup");
                Err(message)
            }
        },
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => {
            info!(session_id, "agent running, handing off to background waiter");
            spawn_waiter(state, child, session_id.to_string(), chat_id);
            Ok(LaunchResponse {
                status: LaunchStatus::Processing,
                output: None,
                session_id: Some(session_id.to_string()),
            })
        },
    }
}

fn spawn_waiter(
    state: Arc<BackendState>,
    child: tokio::process::Child,
    session_id: String,
    chat_id: Option<String>,
) {
    tokio::spawn(async move {
        match timeout(WAITER_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if output.status.success() {
                    info!(session_id, "agent command completed");
                    return;
                }
                let stderr = String::from_utf8_lossy(&output.stderr);
                let summary = truncate(stderr.trim(), MAX_NOTIFICATION_CHARS);
                warn!(
                    session_id,
                    code = output.status.code().unwrap_or(-1),
                    error = %summary,
                    "agent command failed"
                );
                if let Some(chat_id) = chat_id.filter(|_| !stderr.is_empty()) {
                    state
                        .notifier
                        .send_text(&chat_id, &format!("❌ Claude 执行异常:\n{summary}"))
                        .await;
                }
            },
            Ok(Err(e)) => error!(session_id, error = %e, "agent wait failed"),
            Err(_) => {
                // kill_on_drop reaps the child when the elapsed future drops it.
                error!(session_id, "agent command timed out after 10 minutes");
                if let Some(chat_id) = chat_id {
                    state
                        .notifier
                        .send_text(&chat_id, "❌ Claude 执行异常:\n执行超时（超过 10 分钟）")
                        .await;
                }
            },
        }
    });
}

async fn drain_output(child: &mut tokio::process::Child) -> (String, String) {
    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stdout.take() {
        let _ = pipe.read_to_string(&mut stdout).await;
    }
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_string(&mut stderr).await;
    }
    (stdout, stderr)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> (Arc<BackendState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = larkin_config::from_env();
        config.data_dir = dir.path().to_path_buf();
        (Arc::new(BackendState::new(config).unwrap()), dir)
    }

    #[test]
    fn test_command_line_quotes_prompt() {
        let line = build_command_line("claude", "fix the 'auth' bug; rm", "s1", SessionMode::New);
        assert!(line.starts_with("claude -p "));
        assert!(line.contains("--session-id s1"));
        // The prompt must survive a shell re-parse as a single word.
        let words = shell_words::split(&line).unwrap();
        assert!(words.contains(&"fix the 'auth' bug; rm".to_string()));
    }

    #[test]
    fn test_resume_uses_resume_flag() {
        let line = build_command_line("claude", "hi", "s1", SessionMode::Resume);
        assert!(line.contains("--resume s1"));
        assert!(!line.contains("--session-id"));
    }

    #[test]
    fn test_shell_invocation_flags() {
        assert_eq!(shell_invocation("/bin/zsh", "x").1[0], "-ic");
        assert_eq!(shell_invocation("/usr/bin/fish", "x").1[0], "-c");
        assert_eq!(shell_invocation("/bin/bash", "x").1[0], "-lc");
        assert_eq!(shell_invocation("/bin/dash", "x").1[0], "-lc");
    }

    #[tokio::test]
    async fn test_fast_exit_reports_completed() {
        let (state, dir) = test_state();
        let resp = launch(
            state,
            SessionMode::New,
            "s1",
            dir.path().to_str().unwrap(),
            "hello",
            None,
            "echo",
        )
        .await
        .unwrap();
        assert_eq!(resp.status, LaunchStatus::Completed);
        assert!(resp.output.unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn test_failing_command_reports_error() {
        let (state, dir) = test_state();
        let err = launch(
            state,
            SessionMode::New,
            "s1",
            dir.path().to_str().unwrap(),
            "hello",
            None,
            "false && echo",
        )
        .await
        .unwrap_err();
        assert!(!err.is_empty());
    }

    #[tokio::test]
    async fn test_slow_command_reports_processing() {
        let (state, dir) = test_state();
        let resp = launch(
            state,
            SessionMode::Resume,
            "s1",
            dir.path().to_str().unwrap(),
            "hello",
            None,
            "sleep 30; true",
        )
        .await
        .unwrap();
        assert_eq!(resp.status, LaunchStatus::Processing);
        assert_eq!(resp.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_missing_project_dir_fails_spawn() {
        let (state, _dir) = test_state();
        let result = launch(
            state,
            SessionMode::New,
            "s1",
            "/definitely/not/here",
            "hello",
            None,
            "echo",
        )
        .await;
        assert!(result.is_err());
    }
}

//! Interactive console session.
//!
//! [`Session::run`] prints the banner and a greeting turn, then reads one
//! line per turn until the exit command or end of input. Lines come from a
//! [`LineSource`]: on the console that is [`StdinLines`], a reader thread
//! feeding a channel, so the async loop can race input against Ctrl-C.
//!
//! [`TeardownGuard`] deletes the persisted index when the session ends,
//! whether the session returns normally, fails, or unwinds. [`run_guarded`]
//! races a whole chat run against an interrupt and settles the guard.

use std::collections::VecDeque;
use std::future::Future;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::agent::Agent;
use crate::config::UiConfig;
use crate::error::{single_line, BuddyError, Result};
use crate::index::destroy_index;
use crate::models::ChatMessage;

const RULE_WIDTH: usize = 50;

/// Conversation history for one process.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    messages: Vec<ChatMessage>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The last `n` messages.
    pub fn recent(&self, n: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Append a completed exchange.
    pub fn record_turn(&mut self, user: &str, answer: &str) {
        self.messages.push(ChatMessage::user(user));
        self.messages.push(ChatMessage::assistant(answer));
    }
}

/// Supplies user input one line at a time. `None` means end of input.
#[async_trait]
pub trait LineSource: Send {
    async fn next_line(&mut self) -> Option<String>;
}

/// Lines read from stdin on a dedicated thread.
pub struct StdinLines {
    rx: mpsc::Receiver<String>,
}

impl StdinLines {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(1);
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.blocking_send(line.clone()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self { rx }
    }
}

#[async_trait]
impl LineSource for StdinLines {
    async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// A fixed list of lines, then end of input.
pub struct ScriptedLines {
    lines: VecDeque<String>,
}

impl ScriptedLines {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl LineSource for ScriptedLines {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

/// Why [`Session::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ExitCommand,
    EndOfInput,
}

pub struct Session<W: Write> {
    agent: Agent,
    ui: UiConfig,
    context: SessionContext,
    out: W,
}

impl<W: Write> Session<W> {
    pub fn new(agent: Agent, ui: UiConfig, out: W) -> Self {
        Self {
            agent,
            ui,
            context: SessionContext::new(),
            out,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Whether `line` is the exit command, ignoring case.
    pub fn is_exit(&self, line: &str) -> bool {
        line.trim().to_uppercase() == self.ui.exit_command.trim().to_uppercase()
    }

    /// Greet, then answer lines until the exit command or end of input.
    ///
    /// Turn failures are printed and the loop continues; only output errors
    /// end the session early.
    pub async fn run(&mut self, input: &mut dyn LineSource) -> Result<SessionEnd> {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(self.out, "\n{}", rule)?;
        let greeting = self.agent.greet(&mut self.context).await;
        self.print_outcome(greeting)?;
        writeln!(self.out, "{}", rule)?;
        writeln!(self.out, "\n{}\n", self.ui.exit_hint)?;
        writeln!(self.out, "{}\n", rule)?;

        let end = loop {
            write!(self.out, "{}", self.ui.user_prompt)?;
            self.out.flush()?;

            let Some(line) = input.next_line().await else {
                writeln!(self.out)?;
                break SessionEnd::EndOfInput;
            };
            let line = line.trim();
            writeln!(self.out)?;

            if self.is_exit(line) {
                break SessionEnd::ExitCommand;
            }
            if line.is_empty() {
                continue;
            }

            let outcome = self.agent.run(line, &mut self.context).await;
            self.print_outcome(outcome)?;
            writeln!(self.out)?;
        };

        writeln!(self.out, "\n{}", self.ui.goodbye)?;
        self.out.flush()?;
        tracing::info!(?end, turns = self.context.len() / 2, "session ended");
        Ok(end)
    }

    fn print_outcome(&mut self, outcome: Result<String>) -> Result<()> {
        match outcome {
            Ok(answer) => writeln!(self.out, "{} : {}", self.agent.policy().name, answer)?,
            Err(err) => {
                tracing::warn!(error = %err, turn_level = err.is_turn_level(), "turn failed");
                let message = single_line(&err.to_string());
                writeln!(self.out, "{} : {}", self.ui.error_label, message)?;
            }
        }
        Ok(())
    }
}

/// Deletes the index directory when dropped, unless disarmed.
pub struct TeardownGuard {
    dir: PathBuf,
    armed: bool,
}

impl TeardownGuard {
    /// A guard for `dir`; `enabled = false` yields a disarmed guard.
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            armed: enabled,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Keep the index after all.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Delete the index now. Returns whether anything was removed.
    pub fn teardown(mut self) -> Result<bool> {
        if !self.armed {
            return Ok(false);
        }
        self.armed = false;
        destroy_index(&self.dir)
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = destroy_index(&self.dir) {
                tracing::warn!(dir = %self.dir.display(), error = %e, "index teardown failed");
            }
        }
    }
}

/// How a guarded chat run ended.
#[derive(Debug)]
pub struct GuardedRun {
    /// The interrupt fired before the chat finished.
    pub interrupted: bool,
    /// The index directory was deleted.
    pub torn_down: bool,
    /// Result of the chat itself; `Ok` when interrupted.
    pub outcome: anyhow::Result<()>,
}

/// Run `chat` until it finishes or `interrupt` fires, then settle `guard`.
///
/// A [`BuddyError::CorruptIndex`] failure disarms the guard so the index
/// stays on disk for inspection. In every other case an armed guard deletes
/// the index before this returns.
pub async fn run_guarded<C, I>(
    mut guard: TeardownGuard,
    chat: C,
    interrupt: I,
) -> Result<GuardedRun>
where
    C: Future<Output = anyhow::Result<()>>,
    I: Future<Output = ()>,
{
    let (interrupted, outcome) = tokio::select! {
        result = chat => (false, result),
        _ = interrupt => (true, Ok(())),
    };

    if let Err(err) = &outcome {
        if matches!(
            err.downcast_ref::<BuddyError>(),
            Some(BuddyError::CorruptIndex { .. })
        ) {
            tracing::warn!(dir = %guard.dir.display(), "keeping corrupt index for inspection");
            guard.disarm();
        }
    }

    let torn_down = guard.teardown()?;
    Ok(GuardedRun {
        interrupted,
        torn_down,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_recent_window() {
        let mut ctx = SessionContext::new();
        ctx.record_turn("a", "b");
        ctx.record_turn("c", "d");
        assert_eq!(ctx.len(), 4);
        assert_eq!(ctx.recent(3).len(), 3);
        assert_eq!(ctx.recent(3)[0].content, "b");
        assert_eq!(ctx.recent(10).len(), 4);
        assert!(ctx.recent(0).is_empty());
    }

    #[test]
    fn test_guard_drop_removes_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("storage");
        std::fs::create_dir_all(&dir).unwrap();
        {
            let _guard = TeardownGuard::new(&dir, true);
        }
        assert!(!dir.exists());
    }

    #[test]
    fn test_disarmed_guard_keeps_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("storage");
        std::fs::create_dir_all(&dir).unwrap();
        let mut guard = TeardownGuard::new(&dir, true);
        guard.disarm();
        drop(guard);
        assert!(dir.exists());
        assert!(!TeardownGuard::new(&dir, false).teardown().unwrap());
        assert!(dir.exists());
    }

    #[test]
    fn test_explicit_teardown_reports_removal() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("storage");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(TeardownGuard::new(&dir, true).teardown().unwrap());
        assert!(!TeardownGuard::new(&dir, true).teardown().unwrap());
    }

    #[tokio::test]
    async fn test_scripted_lines_then_eof() {
        let mut lines = ScriptedLines::new(["a", "b"]);
        assert_eq!(lines.next_line().await.as_deref(), Some("a"));
        assert_eq!(lines.next_line().await.as_deref(), Some("b"));
        assert!(lines.next_line().await.is_none());
    }

    fn index_dir(tmp: &TempDir) -> PathBuf {
        let dir = tmp.path().join("storage");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.sqlite"), b"x").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_guarded_interrupt_tears_down() {
        let tmp = TempDir::new().unwrap();
        let dir = index_dir(&tmp);

        let run = run_guarded(
            TeardownGuard::new(&dir, true),
            std::future::pending::<anyhow::Result<()>>(),
            async {},
        )
        .await
        .unwrap();
        assert!(run.interrupted);
        assert!(run.torn_down);
        assert!(run.outcome.is_ok());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_guarded_failure_tears_down() {
        let tmp = TempDir::new().unwrap();
        let dir = index_dir(&tmp);

        let run = run_guarded(
            TeardownGuard::new(&dir, true),
            async { Err::<(), _>(anyhow::Error::from(BuddyError::provider("ollama", "refused"))) },
            std::future::pending::<()>(),
        )
        .await
        .unwrap();
        assert!(!run.interrupted);
        assert!(run.torn_down);
        assert!(run.outcome.is_err());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_guarded_corrupt_index_is_kept() {
        let tmp = TempDir::new().unwrap();
        let dir = index_dir(&tmp);

        let run = run_guarded(
            TeardownGuard::new(&dir, true),
            async {
                let err = BuddyError::corrupt("storage", "bad schema");
                Err::<(), _>(anyhow::Error::from(err))
            },
            std::future::pending::<()>(),
        )
        .await
        .unwrap();
        assert!(!run.torn_down);
        assert!(run.outcome.is_err());
        assert!(dir.join("index.sqlite").exists());
    }
}

#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity
#![cfg(unix)]

//! End-to-end tests for the relay engine.
//!
//! Each test wires a real `Router` to a fake `claude` shell script, a
//! recording chat transport and, where needed, a scripted tmux.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use backchannel_core::SessionMode;
use backchannel_core::config::{PollConfig, RelayBackend, TerminalConfig};
use backchannel_core::AccessPolicy;
use backchannel_daemon::relay::{Responder, Router, RouterParts};
use backchannel_daemon::session::{SessionDirectory, SessionState};
use backchannel_daemon::subprocess::{PermissionStrategy, ProcessInvoker};
use backchannel_daemon::terminal::{TerminalBridge, TerminalError, TmuxExec, TmuxOutput};
use backchannel_daemon::transport::{ChatTransport, InboundMessage, TransportError};

const OPERATOR: &str = "42";
const CHANNEL: &str = "100";
const SESSION_ID: &str = "0b9c6c7e-1111-4a2b-9c3d-aaaaaaaaaaaa";

const ECHO_ARGS: &str = r#"printf '%s\n' "$@" > args.txt
printf 'hi there\n'"#;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<String>>,
    typing: AtomicUsize,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), TransportError> {
        assert_eq!(channel_id, CHANNEL);
        self.sent.lock().unwrap().push(content.to_string());
        Ok(())
    }

    async fn trigger_typing(&self, _channel_id: &str) -> Result<(), TransportError> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// tmux double: answers `list-sessions` from a fixed listing and
/// `capture-pane` from a queue whose last entry repeats. A growing pane
/// gains a line on every capture instead.
struct ScriptedTmux {
    sessions: String,
    captures: Mutex<Vec<String>>,
    calls: Mutex<Vec<Vec<String>>>,
    growing: bool,
    ticks: AtomicUsize,
    enter_delay: Duration,
}

impl ScriptedTmux {
    fn new(sessions: &str, captures: &[&str]) -> Self {
        Self {
            sessions: sessions.to_string(),
            captures: Mutex::new(captures.iter().map(ToString::to_string).collect()),
            calls: Mutex::new(Vec::new()),
            growing: false,
            ticks: AtomicUsize::new(0),
            enter_delay: Duration::ZERO,
        }
    }

    fn growing(sessions: &str) -> Self {
        Self {
            growing: true,
            ..Self::new(sessions, &[])
        }
    }

    fn pressed_interrupt(&self) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .any(|call| call.contains(&"C-c".to_string()))
    }
}

#[async_trait]
impl TmuxExec for ScriptedTmux {
    async fn run(&self, args: &[String]) -> Result<TmuxOutput, TerminalError> {
        self.calls.lock().unwrap().push(args.to_vec());
        if args.last().map(String::as_str) == Some("Enter") && !self.enter_delay.is_zero() {
            tokio::time::sleep(self.enter_delay).await;
        }
        let stdout = match args.first().map(String::as_str) {
            Some("list-sessions") => self.sessions.clone(),
            Some("capture-pane") if self.growing => {
                let n = self.ticks.fetch_add(1, Ordering::SeqCst);
                let mut pane = "$ hello".to_string();
                for i in 0..n {
                    pane.push_str(&format!("\nworking {i}"));
                }
                pane
            }
            Some("capture-pane") => {
                let mut captures = self.captures.lock().unwrap();
                if captures.len() > 1 {
                    captures.remove(0)
                } else {
                    captures.first().cloned().unwrap_or_default()
                }
            }
            Some("display-message") => "claude:0\n".to_string(),
            _ => String::new(),
        };
        Ok(TmuxOutput {
            success: true,
            stdout,
            stderr: String::new(),
        })
    }
}

struct Harness {
    dir: TempDir,
    workdir: PathBuf,
    router: Arc<Router>,
    transport: Arc<RecordingTransport>,
}

impl Harness {
    fn args(&self) -> Option<String> {
        std::fs::read_to_string(self.workdir.join("args.txt")).ok()
    }

    fn store_dir(&self) -> PathBuf {
        SessionDirectory::with_root(self.dir.path().join("projects"), self.workdir.clone())
            .store_dir()
    }

    async fn say(&self, content: &str) {
        self.router.handle(message(OPERATOR, content)).await;
    }
}

fn fake_claude(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("claude");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn terminal_config() -> TerminalConfig {
    TerminalConfig {
        session_name: "claude".to_string(),
        pane: "0".to_string(),
        tmux_bin: PathBuf::from("tmux"),
        capture_lines: 100,
        poll: PollConfig {
            interval: Duration::from_millis(5),
            quiet_period: Duration::from_millis(20),
            ceiling: Duration::from_secs(5),
        },
    }
}

fn harness_with(
    script: &str,
    tmux: Option<Arc<ScriptedTmux>>,
    backend: RelayBackend,
) -> Harness {
    harness_with_terminal(script, tmux, backend, &terminal_config())
}

fn harness_with_terminal(
    script: &str,
    tmux: Option<Arc<ScriptedTmux>>,
    backend: RelayBackend,
    terminal: &TerminalConfig,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let workdir = dir.path().join("work");
    std::fs::create_dir_all(&workdir).unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let bridge = tmux.map(|exec| {
        let exec: Arc<dyn TmuxExec> = exec;
        Arc::new(TerminalBridge::new(exec, terminal))
    });

    let router = Arc::new(Router::new(RouterParts {
        access: AccessPolicy::new(Some(OPERATOR.to_string()), None),
        state: Arc::new(SessionState::default()),
        directory: SessionDirectory::with_root(dir.path().join("projects"), workdir.clone()),
        invoker: ProcessInvoker::new(
            fake_claude(dir.path(), script),
            PermissionStrategy::AssistantDefault,
            64 * 1024,
        ),
        bridge,
        responder: Responder::new(transport.clone(), 1900),
        backend,
        working_dir: workdir.clone(),
    }));

    Harness {
        dir,
        workdir,
        router,
        transport,
    }
}

fn harness(script: &str) -> Harness {
    harness_with(script, None, RelayBackend::Print)
}

fn message(author: &str, content: &str) -> InboundMessage {
    InboundMessage {
        channel_id: CHANNEL.to_string(),
        author_id: author.to_string(),
        content: content.to_string(),
        automated: false,
    }
}

#[tokio::test]
async fn prompt_under_continue_delivers_one_unwrapped_chunk() {
    let h = harness(ECHO_ARGS);
    h.say("hello").await;

    assert_eq!(h.transport.sent(), vec!["hi there".to_string()]);
    assert_eq!(h.args().unwrap(), "-p\n--continue\nhello\n");
    assert!(h.transport.typing.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn failed_resume_reports_stderr_tail_only() {
    let h = harness(
        r#"printf '%s\n' "$@" > args.txt
printf 'partial output\n'
echo 'no such session' >&2
exit 1"#,
    );
    h.router
        .state()
        .set_mode(SessionMode::Resume("abc-123".to_string()));
    h.say("hello").await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("no such session"));
    assert!(sent[0].contains("code 1"));
    assert!(!sent[0].contains("partial output"));
    assert_eq!(h.args().unwrap(), "-p\n--resume\nabc-123\nhello\n");
}

#[tokio::test]
async fn unauthorized_sender_gets_no_invocation_and_no_response() {
    let h = harness(ECHO_ARGS);
    h.router.handle(message("7", "hello")).await;
    h.router
        .handle(InboundMessage {
            automated: true,
            ..message(OPERATOR, "hello")
        })
        .await;

    assert!(h.args().is_none());
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.transport.typing.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn busy_relay_rejects_then_recovers() {
    let h = harness(ECHO_ARGS);

    let guard = h.router.state().try_acquire().unwrap();
    h.say("hello").await;
    assert!(h.args().is_none());
    assert_eq!(h.transport.sent().len(), 1);
    assert!(h.transport.sent()[0].contains("Still working"));

    drop(guard);
    h.say("hello").await;
    assert_eq!(h.transport.sent()[1], "hi there");
    assert!(!h.router.state().is_busy());
}

#[tokio::test]
async fn session_fresh_drops_continuation_flags() {
    let h = harness(ECHO_ARGS);
    h.say("!session fresh").await;
    assert!(h.transport.sent()[0].contains("`fresh`"));

    h.say("hello").await;
    assert_eq!(h.args().unwrap(), "-p\nhello\n");
}

#[tokio::test]
async fn session_listing_and_selection_by_index() {
    let h = harness(ECHO_ARGS);
    std::fs::create_dir_all(h.store_dir()).unwrap();
    std::fs::write(
        h.store_dir().join(format!("{SESSION_ID}.jsonl")),
        r#"{"type":"user","message":{"content":"fix the flaky test"}}"#,
    )
    .unwrap();

    h.say("!session").await;
    let listing = &h.transport.sent()[0];
    assert!(listing.contains("**Current mode:** `continue`"));
    assert!(listing.contains(SESSION_ID));
    assert!(listing.contains("fix the flaky test"));

    h.say("!session 1").await;
    assert_eq!(
        h.router.state().mode(),
        SessionMode::Resume(SESSION_ID.to_string())
    );

    h.say("!session 5").await;
    assert!(h.transport.sent()[2].contains("No session #5"));

    h.say("!session not-a-uuid").await;
    assert!(h.transport.sent()[3].contains("is not a session id"));
    assert_eq!(
        h.router.state().mode(),
        SessionMode::Resume(SESSION_ID.to_string())
    );

    h.say("hello").await;
    assert_eq!(
        h.args().unwrap(),
        format!("-p\n--resume\n{SESSION_ID}\nhello\n")
    );
}

#[tokio::test]
async fn unknown_uuid_is_accepted_with_note() {
    let h = harness(ECHO_ARGS);
    let id = "0b9c6c7e-9999-4a2b-9c3d-dddddddddddd";
    h.say(&format!("!session {id}")).await;

    assert_eq!(h.router.state().mode(), SessionMode::Resume(id.to_string()));
    assert!(h.transport.sent()[0].contains("Claude will validate it"));
}

#[tokio::test]
async fn unknown_command_is_reported_without_invoking() {
    let h = harness(ECHO_ARGS);
    h.say("!deploy now").await;

    assert!(h.args().is_none());
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Unknown command: `!deploy`"));
}

#[tokio::test]
async fn control_commands_need_a_bridge() {
    let h = harness(ECHO_ARGS);
    h.say("!status").await;
    h.say("!interrupt").await;
    h.say("!raw list-windows").await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|m| m.contains("Terminal bridge unavailable")));
}

#[tokio::test]
async fn status_reports_attached_session() {
    let tmux = Arc::new(ScriptedTmux::new("other:0\nclaude:1\n", &[]));
    let h = harness_with(ECHO_ARGS, Some(tmux), RelayBackend::Print);
    h.say("!status").await;

    let sent = h.transport.sent();
    assert!(sent[0].contains("`claude` is running (attached)"));
    assert!(sent[0].contains("Relay: idle"));
}

#[tokio::test]
async fn interrupt_requires_live_session() {
    let tmux = Arc::new(ScriptedTmux::new("other:1\n", &[]));
    let h = harness_with(ECHO_ARGS, Some(tmux.clone()), RelayBackend::Print);
    h.say("!interrupt").await;

    assert!(h.transport.sent()[0].contains("tmux session `claude` not found"));
    assert!(!tmux.pressed_interrupt());
}

#[tokio::test]
async fn raw_output_is_wrapped_in_a_block() {
    let tmux = Arc::new(ScriptedTmux::new("claude:0\n", &[]));
    let h = harness_with(ECHO_ARGS, Some(tmux.clone()), RelayBackend::Print);
    h.say("!raw display-message -p '#S:#P'").await;

    assert_eq!(h.transport.sent(), vec!["```\nclaude:0\n```".to_string()]);
    assert_eq!(
        tmux.calls.lock().unwrap()[0],
        vec!["display-message", "-p", "#S:#P"]
    );
}

#[tokio::test]
async fn terminal_backend_polls_until_stable() {
    let tmux = Arc::new(ScriptedTmux::new(
        "claude:1\n",
        &["$", "$ hello\nthinking", "$ hello\nthinking\nanswer", "$ hello\nthinking\nanswer"],
    ));
    let h = harness_with(ECHO_ARGS, Some(tmux.clone()), RelayBackend::Terminal);
    h.say("hello").await;

    assert!(h.args().is_none());
    assert_eq!(
        h.transport.sent(),
        vec!["```\n hello\nthinking\nanswer\n```".to_string()]
    );
    let calls = tmux.calls.lock().unwrap();
    assert!(calls.iter().any(|call| call.last().map(String::as_str) == Some("Enter")));
}

#[tokio::test]
async fn stdout_is_the_payload_even_with_stderr() {
    let h = harness(
        r#"printf '    indented code\nnext\n'
printf 'warning: slow\n' >&2"#,
    );
    h.say("hello").await;

    assert_eq!(h.transport.sent(), vec!["    indented code\nnext".to_string()]);
}

#[tokio::test]
async fn stderr_is_delivered_when_stdout_is_empty() {
    let h = harness("printf 'only diagnostics\n' >&2");
    h.say("hello").await;

    assert_eq!(h.transport.sent(), vec!["only diagnostics".to_string()]);
}

#[tokio::test]
async fn mode_change_during_invocation_applies_to_the_next_prompt() {
    let h = harness(
        r#"printf '%s\n' "$@" > args.txt
sleep 0.3
printf 'done\n'"#,
    );
    let in_flight = h.router.dispatch(message(OPERATOR, "hello"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.say("!session fresh").await;
    in_flight.await.unwrap();

    assert_eq!(h.args().unwrap(), "-p\n--continue\nhello\n");
    assert!(h.transport.sent().contains(&"done".to_string()));

    h.say("again").await;
    assert_eq!(h.args().unwrap(), "-p\nagain\n");
}

#[tokio::test]
async fn terminal_backend_marks_partial_output() {
    let tmux = Arc::new(ScriptedTmux::growing("claude:1\n"));
    let mut terminal = terminal_config();
    terminal.poll = PollConfig {
        interval: Duration::from_millis(5),
        quiet_period: Duration::from_secs(1),
        ceiling: Duration::from_millis(100),
    };
    let h = harness_with_terminal(ECHO_ARGS, Some(tmux), RelayBackend::Terminal, &terminal);
    h.say("hello").await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].starts_with("```\nworking 0"));
    assert!(sent[1].contains("still producing output"));
    assert!(!h.router.state().is_busy());
}

#[tokio::test]
async fn interrupt_stops_a_terminal_relay_mid_poll() {
    let tmux = Arc::new(ScriptedTmux::growing("claude:1\n"));
    let h = harness_with(ECHO_ARGS, Some(tmux.clone()), RelayBackend::Terminal);

    let relay = h.router.dispatch(message(OPERATOR, "hello"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.say("!interrupt").await;
    tokio::time::timeout(Duration::from_secs(3), relay)
        .await
        .unwrap()
        .unwrap();

    let sent = h.transport.sent();
    assert!(sent.iter().any(|m| m.contains("Sent interrupt to `claude:0`")));
    assert!(sent.contains(&"⏹️ (interrupted)".to_string()));
    assert!(tmux.pressed_interrupt());
    assert!(!h.router.state().is_busy());
}

#[tokio::test]
async fn interrupt_before_polling_still_stops_the_relay() {
    let tmux = Arc::new(ScriptedTmux {
        enter_delay: Duration::from_millis(200),
        ..ScriptedTmux::growing("claude:1\n")
    });
    let h = harness_with(ECHO_ARGS, Some(tmux.clone()), RelayBackend::Terminal);

    let relay = h.router.dispatch(message(OPERATOR, "hello"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.say("!interrupt").await;
    tokio::time::timeout(Duration::from_secs(3), relay)
        .await
        .unwrap()
        .unwrap();

    let sent = h.transport.sent();
    assert!(sent.iter().any(|m| m.contains("Sent interrupt")));
    assert!(sent.contains(&"⏹️ (interrupted)".to_string()));
    assert!(!h.router.state().is_busy());
}

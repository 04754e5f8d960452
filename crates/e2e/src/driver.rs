//! Playwright browser automation
//!
//! The browser lives in a Node.js process running a generated driver
//! script. Rust sends one JSON command per line on its stdin and reads
//! replies and page events from its stdout. Replies are matched to
//! commands by id; events are fanned out on a broadcast channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::error::{E2eError, E2eResult};

/// Events buffered per subscriber before it starts lagging
const EVENT_BUFFER: usize = 4096;

const DRIVER_SCRIPT: &str = include_str!("driver.js");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> E2eResult<Self> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::Driver(format!("unknown browser: {}", other))),
        }
    }
}

/// Configuration for the Playwright driver process
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Node.js executable
    pub node_binary: PathBuf,

    /// Directory whose node_modules provides `playwright`
    pub project_dir: PathBuf,

    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub ignore_https_errors: bool,

    /// Default timeout for page actions (select, click)
    pub action_timeout: Duration,

    pub navigation_timeout: Duration,

    /// Record a Playwright trace per page (kept only for failed tests)
    pub tracing: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            project_dir: PathBuf::from("."),
            browser: Browser::Chromium,
            headless: false,
            viewport_width: 1600,
            viewport_height: 900,
            ignore_https_errors: true,
            action_timeout: Duration::from_secs(15),
            navigation_timeout: Duration::from_secs(120),
            tracing: true,
        }
    }
}

/// Page event families a subscriber can listen to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Request,
    Response,
}

/// Events pushed by the driver
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DriverEvent {
    Request {
        subscription: u64,
        url: String,
    },
    Response {
        subscription: u64,
        url: String,
        status: u16,
        response: u64,
    },
    /// Last event of a subscription
    Unsubscribed {
        subscription: u64,
    },
    Log {
        message: String,
    },
    /// The driver's stdout reached EOF
    #[serde(skip)]
    Closed,
}

impl DriverEvent {
    pub fn subscription(&self) -> Option<u64> {
        match self {
            DriverEvent::Request { subscription, .. }
            | DriverEvent::Response { subscription, .. }
            | DriverEvent::Unsubscribed { subscription } => Some(*subscription),
            DriverEvent::Log { .. } | DriverEvent::Closed => None,
        }
    }
}

/// Commands understood by the driver script
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    NewPage,
    Goto {
        url: String,
        wait_until: WaitUntil,
        timeout_ms: u64,
    },
    WaitVisible {
        selector: String,
        timeout_ms: u64,
    },
    SelectOption {
        selector: String,
        value: String,
    },
    Subscribe {
        kind: EventKind,
        /// Substrings a URL must all contain to be reported
        url_contains: Vec<String>,
    },
    Unsubscribe {
        subscription: u64,
    },
    ResponseBody {
        response: u64,
    },
    Screenshot {
        path: String,
        full_page: bool,
    },
    ClosePage {
        trace_path: Option<String>,
    },
    Shutdown,
}

impl Command {
    fn name(&self) -> String {
        match self {
            Command::NewPage => "new_page".to_string(),
            Command::Goto { url, .. } => format!("goto:{}", url),
            Command::WaitVisible { selector, .. } => format!("wait_visible:{}", selector),
            Command::SelectOption { selector, value } => format!("select:{}={}", selector, value),
            Command::Subscribe { kind, .. } => format!("subscribe:{:?}", kind),
            Command::Unsubscribe { subscription } => format!("unsubscribe:{}", subscription),
            Command::ResponseBody { response } => format!("response_body:{}", response),
            Command::Screenshot { path, .. } => format!("screenshot:{}", path),
            Command::ClosePage { .. } => "close_page".to_string(),
            Command::Shutdown => "shutdown".to_string(),
        }
    }

    fn failure(&self, reason: String, timed_out: bool) -> E2eError {
        match self {
            _ if timed_out => E2eError::Timeout(format!("{} ({})", self.name(), reason)),
            Command::Goto { url, .. } => E2eError::Navigation {
                url: url.clone(),
                reason,
            },
            Command::WaitVisible { .. }
            | Command::SelectOption { .. }
            | Command::Screenshot { .. } => E2eError::ActionFailed {
                action: self.name(),
                reason,
            },
            _ => E2eError::Driver(format!("{}: {}", self.name(), reason)),
        }
    }
}

/// `waitUntil` condition for navigation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[default]
    NetworkIdle,
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    command: &'a Command,
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    timeout: bool,
}

/// A live event subscription on the current page
pub struct Subscription {
    pub id: u64,
    pub events: broadcast::Receiver<DriverEvent>,
}

struct PendingReplies {
    closed: bool,
    waiting: HashMap<u64, oneshot::Sender<Reply>>,
}

struct DriverProcess {
    child: Child,
    // Keeps the generated script alive for the process lifetime
    _script_dir: tempfile::TempDir,
}

impl DriverProcess {
    fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        let _ = self.child.start_kill();
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

struct DriverInner {
    commands: mpsc::UnboundedSender<String>,
    pending: Mutex<PendingReplies>,
    next_id: AtomicU64,
    events: broadcast::Sender<DriverEvent>,
    process: Mutex<Option<DriverProcess>>,
}

/// Handle to a running Playwright driver. Cheap to clone.
#[derive(Clone)]
pub struct DriverClient {
    inner: Arc<DriverInner>,
}

impl DriverClient {
    /// Spawn Node.js running the generated driver script
    pub async fn spawn(config: &DriverConfig) -> E2eResult<Self> {
        Self::check_playwright_installed(config).await?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(&script_path, build_driver_script(config))?;

        debug!("Running Playwright driver: {}", script_path.display());

        let mut child = TokioCommand::new(&config.node_binary)
            .arg(&script_path)
            .current_dir(&config.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                E2eError::Driver(format!(
                    "Failed to spawn {}: {}",
                    config.node_binary.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Driver("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Driver("driver stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "playwright", "{}", line);
                }
            });
        }

        let client = Self::from_io(stdout, stdin);
        *client.inner.process.lock() = Some(DriverProcess {
            child,
            _script_dir: script_dir,
        });

        info!(
            "Playwright driver started ({}, headless: {})",
            config.browser.as_str(),
            config.headless
        );
        Ok(client)
    }

    /// Attach to a driver speaking the protocol over an arbitrary stream pair
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let inner = Arc::new(DriverInner {
            commands,
            pending: Mutex::new(PendingReplies {
                closed: false,
                waiting: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            events,
            process: Mutex::new(None),
        });

        tokio::spawn(write_commands(writer, command_rx));
        tokio::spawn(read_messages(reader, Arc::downgrade(&inner)));

        Self { inner }
    }

    /// Check that node can resolve the `playwright` package
    async fn check_playwright_installed(config: &DriverConfig) -> E2eResult<()> {
        let status = TokioCommand::new(&config.node_binary)
            .args(["-e", "require.resolve('playwright')"])
            .current_dir(&config.project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Send a command and wait for its reply
    pub async fn call(&self, command: Command) -> E2eResult<serde_json::Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock();
            if pending.closed {
                return Err(E2eError::DriverClosed);
            }
            pending.waiting.insert(id, tx);
        }

        let line = serde_json::to_string(&Envelope { id, command: &command })?;
        trace!("Driver command: {}", line);

        if self.inner.commands.send(line).is_err() {
            self.inner.pending.lock().waiting.remove(&id);
            return Err(E2eError::DriverClosed);
        }

        let reply = rx.await.map_err(|_| E2eError::DriverClosed)?;
        if reply.ok {
            Ok(reply.result)
        } else {
            let reason = reply.error.unwrap_or_else(|| "unknown error".to_string());
            Err(command.failure(reason, reply.timeout))
        }
    }

    /// Receive every event emitted from now on
    pub fn events(&self) -> broadcast::Receiver<DriverEvent> {
        self.inner.events.subscribe()
    }

    /// Open a fresh browser context and page, closing any previous one
    pub async fn new_page(&self) -> E2eResult<()> {
        self.call(Command::NewPage).await.map(|_| ())
    }

    pub async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> E2eResult<()> {
        self.call(Command::Goto {
            url: url.to_string(),
            wait_until,
            timeout_ms: timeout.as_millis() as u64,
        })
        .await
        .map(|_| ())
    }

    pub async fn wait_visible(&self, selector: &str, timeout: Duration) -> E2eResult<()> {
        self.call(Command::WaitVisible {
            selector: selector.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
        .await
        .map(|_| ())
    }

    pub async fn select_option(&self, selector: &str, value: &str) -> E2eResult<()> {
        self.call(Command::SelectOption {
            selector: selector.to_string(),
            value: value.to_string(),
        })
        .await
        .map(|_| ())
    }

    /// Register a page listener reporting URLs that contain every string
    /// in `url_contains`. The receiver is attached before the listener
    /// exists, so no event of the subscription is missed.
    pub async fn subscribe(
        &self,
        kind: EventKind,
        url_contains: Vec<String>,
    ) -> E2eResult<Subscription> {
        let events = self.events();
        let result = self.call(Command::Subscribe { kind, url_contains }).await?;
        let id = result
            .get("subscription")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                E2eError::Driver("subscribe reply without subscription id".to_string())
            })?;

        trace!("Subscribed to {:?} events as #{}", kind, id);
        Ok(Subscription { id, events })
    }

    pub async fn unsubscribe(&self, subscription: u64) -> E2eResult<()> {
        self.call(Command::Unsubscribe { subscription }).await.map(|_| ())
    }

    /// Deregister a listener without waiting for the reply
    pub fn unsubscribe_detached(&self, subscription: u64) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let command = Command::Unsubscribe { subscription };
        match serde_json::to_string(&Envelope { id, command: &command }) {
            Ok(line) => {
                if self.inner.commands.send(line).is_err() {
                    debug!("Driver gone, listener #{} already released", subscription);
                }
            }
            Err(e) => warn!("Failed to encode unsubscribe for #{}: {}", subscription, e),
        }
    }

    /// Fetch the body of an observed response
    pub async fn response_body(&self, response: u64) -> E2eResult<Bytes> {
        let result = self.call(Command::ResponseBody { response }).await?;
        let encoded = result
            .get("body")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| E2eError::Driver(format!("response {} has no body", response)))?;

        let body = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        Ok(Bytes::from(body))
    }

    pub async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()> {
        self.call(Command::Screenshot {
            path: path.to_string_lossy().to_string(),
            full_page,
        })
        .await
        .map(|_| ())
    }

    /// Close the current page, saving its trace when a path is given
    pub async fn close_page(&self, trace_path: Option<&Path>) -> E2eResult<()> {
        self.call(Command::ClosePage {
            trace_path: trace_path.map(|p| p.to_string_lossy().to_string()),
        })
        .await
        .map(|_| ())
    }

    /// Close the browser and stop the driver process
    pub async fn shutdown(&self) -> E2eResult<()> {
        let result =
            tokio::time::timeout(Duration::from_secs(10), self.call(Command::Shutdown)).await;
        match result {
            Ok(Ok(_)) | Ok(Err(E2eError::DriverClosed)) => {}
            Ok(Err(e)) => warn!("Driver shutdown failed: {}", e),
            Err(_) => warn!("Driver did not acknowledge shutdown"),
        }

        let process = self.inner.process.lock().take();
        if let Some(mut process) = process {
            info!("Stopping Playwright driver (pid: {:?})", process.child.id());
            match tokio::time::timeout(Duration::from_millis(500), process.child.wait()).await {
                Ok(_) => {}
                Err(_) => process.terminate(),
            }
        }

        Ok(())
    }
}

/// Build the driver script for a configuration
pub fn build_driver_script(config: &DriverConfig) -> String {
    let options = serde_json::json!({
        "browser": config.browser.as_str(),
        "headless": config.headless,
        "viewport": {
            "width": config.viewport_width,
            "height": config.viewport_height,
        },
        "ignoreHTTPSErrors": config.ignore_https_errors,
        "actionTimeout": config.action_timeout.as_millis() as u64,
        "navigationTimeout": config.navigation_timeout.as_millis() as u64,
        "tracing": config.tracing,
    });

    format!("const OPTIONS = {};\n\n{}", options, DRIVER_SCRIPT)
}

async fn write_commands<W>(mut writer: W, mut commands: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = commands.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!("Failed to write to Playwright driver: {}", e);
            break;
        }
    }
}

// Holds only a weak reference so that dropping the last client drops the
// process, which closes stdout and ends this task.
async fn read_messages<R>(reader: R, inner: Weak<DriverInner>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match inner.upgrade() {
                Some(inner) => dispatch(&inner, &line),
                None => return,
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read from Playwright driver: {}", e);
                break;
            }
        }
    }

    debug!("Playwright driver output closed");
    let Some(inner) = inner.upgrade() else {
        return;
    };
    {
        let mut pending = inner.pending.lock();
        pending.closed = true;
        // Dropping the senders fails every waiting command
        pending.waiting.clear();
    }
    let _ = inner.events.send(DriverEvent::Closed);
}

fn dispatch(inner: &DriverInner, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    trace!("Driver message: {}", line);

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!("Unparseable driver output ({}): {}", e, line);
            return;
        }
    };

    if value.get("event").is_some() {
        match serde_json::from_value::<DriverEvent>(value) {
            Ok(DriverEvent::Log { message }) => debug!(target: "playwright", "{}", message),
            Ok(event) => {
                // No receivers is fine: nobody is observing right now
                let _ = inner.events.send(event);
            }
            Err(e) => warn!("Malformed driver event ({}): {}", e, line),
        }
        return;
    }

    match serde_json::from_value::<Reply>(value) {
        Ok(reply) => {
            let waiting = inner.pending.lock().waiting.remove(&reply.id);
            match waiting {
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => trace!("Reply for detached command #{}", reply.id),
            }
        }
        Err(e) => warn!("Malformed driver reply ({}): {}", e, line),
    }
}

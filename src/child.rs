//! Child process lifecycle (spec §4.1): spawn, handshake, catalog discovery,
//! call forwarding, and teardown for one tool-server subprocess.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child as OsChild, Command};
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::tokenize_command_line;
use crate::error::{BrokerError, Result};
use crate::health::{ErrorRateTracker, HealthState, StderrBuffer};
use crate::multiplex::Multiplexer;
use crate::protocol::{CallToolResult, PromptDescriptor, ResourceDescriptor, ToolDescriptor};

/// Capacity of the rolling per-child stderr buffer (spec §9 supplemental).
const STDERR_BUFFER_LINES: usize = 100;
/// Sliding window over which per-child error rate is computed (spec §9 supplemental).
const ERROR_RATE_WINDOW: Duration = Duration::from_secs(60);

/// A child's lifecycle state. Transitions are forward-only within one
/// incarnation (spec §3): `Spawning -> Initializing -> Ready -> Draining ->
/// Terminated`, never skipping forward and never moving backward. Restart
/// on crash (spec §9 supplemental) does not reanimate a terminated handle —
/// it replaces the registry's entry with a freshly spawned `ChildHandle`
/// under the same name, so this invariant holds per-instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Spawning,
    Initializing,
    Ready,
    Draining,
    Terminated,
}

impl ChildState {
    fn rank(self) -> u8 {
        match self {
            ChildState::Spawning => 0,
            ChildState::Initializing => 1,
            ChildState::Ready => 2,
            ChildState::Draining => 3,
            ChildState::Terminated => 4,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward (or
    /// no-op) transition.
    pub fn can_transition_to(self, next: ChildState) -> bool {
        next.rank() >= self.rank()
    }
}

/// Handle to one supervised child process: its multiplexer, cached
/// catalogs, health signal, and the `tokio::process::Child` needed for
/// teardown.
pub struct ChildHandle {
    pub name: Arc<str>,
    command_line: String,
    handshake_timeout: Duration,
    state_tx: watch::Sender<ChildState>,
    state_rx: watch::Receiver<ChildState>,
    tools: RwLock<Vec<ToolDescriptor>>,
    resources: RwLock<Vec<ResourceDescriptor>>,
    prompts: RwLock<Vec<PromptDescriptor>>,
    health: Mutex<ErrorRateTracker>,
    stderr: Arc<Mutex<StderrBuffer>>,
    process: Mutex<Option<OsChild>>,
    /// `None` for a child that never completed its handshake — a stub entry
    /// kept in the registry so `/status` can still report it (spec §8
    /// scenario 4), with every call forwarding to it failing as terminated.
    mux: Option<Multiplexer>,
}

impl ChildHandle {
    pub fn state(&self) -> ChildState {
        *self.state_rx.borrow()
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// The handshake timeout this incarnation was spawned with (spec §2.3
    /// per-child override), reused by the restart supervisor on respawn.
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub async fn health_state(&self) -> HealthState {
        self.health.lock().await.health_state()
    }

    pub async fn stderr_lines(&self) -> Vec<String> {
        self.stderr.lock().await.lines().iter().cloned().collect()
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().await.clone()
    }

    pub async fn resources(&self) -> Vec<ResourceDescriptor> {
        self.resources.read().await.clone()
    }

    pub async fn prompts(&self) -> Vec<PromptDescriptor> {
        self.prompts.read().await.clone()
    }

    fn set_state(&self, next: ChildState) {
        let current = self.state();
        if current.can_transition_to(next) {
            let _ = self.state_tx.send(next);
        } else {
            tracing::warn!(
                child = %self.name,
                from = ?current,
                to = ?next,
                "refusing illegal backward child-state transition"
            );
        }
    }

    /// Forward a `tools/call` to the child, recording the outcome in the
    /// health tracker (spec §9 supplemental).
    pub async fn call_tool(&self, tool_name: &str, arguments: Value, deadline: Duration) -> Result<CallToolResult> {
        let Some(mux) = &self.mux else {
            return Err(BrokerError::ChildTerminated(self.name.to_string()));
        };
        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let result = mux.call("tools/call", Some(params), deadline).await;
        {
            let mut tracker = self.health.lock().await;
            match &result {
                Ok(_) => tracker.record_success(),
                Err(_) => tracker.record_error(),
            }
        }
        let value = result?;
        serde_json::from_value(value)
            .map_err(|e| BrokerError::InvalidArguments(format!("malformed tools/call result: {e}")))
    }

    /// Forward a `resources/read` to the child (spec §6.1 optional method).
    pub async fn read_resource(&self, uri: &str, deadline: Duration) -> Result<CallToolResult> {
        let Some(mux) = &self.mux else {
            return Err(BrokerError::ChildTerminated(self.name.to_string()));
        };
        let params = serde_json::json!({ "uri": uri });
        let result = mux.call("resources/read", Some(params), deadline).await;
        {
            let mut tracker = self.health.lock().await;
            match &result {
                Ok(_) => tracker.record_success(),
                Err(_) => tracker.record_error(),
            }
        }
        let value = result?;
        serde_json::from_value(value)
            .map_err(|e| BrokerError::InvalidArguments(format!("malformed resources/read result: {e}")))
    }

    /// Forward a `prompts/get` to the child (spec §4.4 "Routing": prompts
    /// follow the same forward-to-child pattern as `resources/read`). The
    /// child renders the template itself; we return its result verbatim.
    pub async fn get_prompt(&self, prompt_name: &str, arguments: Value, deadline: Duration) -> Result<Value> {
        let Some(mux) = &self.mux else {
            return Err(BrokerError::ChildTerminated(self.name.to_string()));
        };
        let params = serde_json::json!({ "name": prompt_name, "arguments": arguments });
        let result = mux.call("prompts/get", Some(params), deadline).await;
        {
            let mut tracker = self.health.lock().await;
            match &result {
                Ok(_) => tracker.record_success(),
                Err(_) => tracker.record_error(),
            }
        }
        result
    }

    /// Tear down this child: close stdin (drop the multiplexer's writer by
    /// dropping the child's stdin handle happens implicitly when `process`
    /// is killed), wait up to `grace` for natural exit, then kill.
    pub async fn teardown(&self, grace: Duration) {
        self.set_state(ChildState::Draining);
        let mut guard = self.process.lock().await;
        if let Some(child) = guard.as_mut() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(child = %self.name, "child did not exit within grace period, killing");
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }
        self.set_state(ChildState::Terminated);
    }

    /// Resolve once the underlying process is known to have exited, either
    /// because the reader observed EOF on stdout or the OS process itself
    /// exited. Used by the restart supervisor (broker.rs) to detect crashes.
    /// Returns immediately for a stub handle that never had a multiplexer.
    pub async fn wait_dead(&self) {
        match &self.mux {
            Some(mux) => mux.wait_dead().await,
            None => {}
        }
    }

    /// Build a placeholder handle for a child that failed to start (spec §8
    /// scenario 4: a crashed child is still reported by `/status`, just with
    /// an empty catalog and every call failing as terminated).
    pub fn terminated_stub(
        name: impl Into<Arc<str>>,
        command_line: &str,
        handshake_timeout: Duration,
        reason: &str,
    ) -> Self {
        let name: Arc<str> = name.into();
        let (state_tx, state_rx) = watch::channel(ChildState::Terminated);
        let mut stderr = StderrBuffer::new(STDERR_BUFFER_LINES);
        stderr.push(reason.to_string());
        Self {
            name,
            command_line: command_line.to_string(),
            handshake_timeout,
            state_tx,
            state_rx,
            mux: None,
            tools: RwLock::new(Vec::new()),
            resources: RwLock::new(Vec::new()),
            prompts: RwLock::new(Vec::new()),
            health: Mutex::new(ErrorRateTracker::new(ERROR_RATE_WINDOW)),
            stderr: Arc::new(Mutex::new(stderr)),
            process: Mutex::new(None),
        }
    }
}

/// Spawn one child, perform the handshake and initial catalog discovery,
/// and return its handle. Failure in tokenizing, spawning, or the
/// `initialize` handshake aborts this child entirely (spec §4.1 "Failure
/// policy"); failures listing tools/resources/prompts are non-fatal and
/// leave the child `Ready` with a partial (possibly empty) catalog.
pub async fn spawn_child(
    name: impl Into<Arc<str>>,
    command_line: &str,
    handshake_timeout: Duration,
    cancel: CancellationToken,
) -> Result<ChildHandle> {
    let name: Arc<str> = name.into();
    let (state_tx, state_rx) = watch::channel(ChildState::Spawning);

    let tokens = tokenize_command_line(command_line)?;
    let (program, args) = tokens
        .split_first()
        .ok_or_else(|| BrokerError::Config(format!("empty command for child '{name}'")))?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| BrokerError::Spawn(name.to_string(), e.to_string()))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| BrokerError::Spawn(name.to_string(), "failed to open stdin pipe".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BrokerError::Spawn(name.to_string(), "failed to open stdout pipe".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BrokerError::Spawn(name.to_string(), "failed to open stderr pipe".into()))?;

    let stderr_buf = Arc::new(Mutex::new(StderrBuffer::new(STDERR_BUFFER_LINES)));
    start_stderr_drain(stderr, name.clone(), stderr_buf.clone(), cancel.clone());

    let _ = state_tx.send(ChildState::Initializing);
    let mux = Multiplexer::spawn(name.clone(), stdin, stdout);

    let init_params = serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {},
        "clientInfo": { "name": "toolbroker", "version": env!("CARGO_PKG_VERSION") },
    });
    mux.call("initialize", Some(init_params), handshake_timeout)
        .await
        .map_err(|e| BrokerError::Handshake(name.to_string(), e.to_string()))?;

    // One-way, no reply expected (spec §4.1 step 4).
    let _ = mux.notify("notifications/initialized", None).await;

    let tools = list_catalog::<ToolDescriptor>(&mux, "tools/list", "tools", &name, handshake_timeout).await;
    let resources =
        list_catalog::<ResourceDescriptor>(&mux, "resources/list", "resources", &name, handshake_timeout).await;
    let prompts =
        list_catalog::<PromptDescriptor>(&mux, "prompts/list", "prompts", &name, handshake_timeout).await;

    let _ = state_tx.send(ChildState::Ready);
    tracing::info!(
        child = %name,
        tool_count = tools.len(),
        resource_count = resources.len(),
        prompt_count = prompts.len(),
        "child ready"
    );

    Ok(ChildHandle {
        name,
        command_line: command_line.to_string(),
        handshake_timeout,
        state_tx,
        state_rx,
        mux: Some(mux),
        tools: RwLock::new(tools),
        resources: RwLock::new(resources),
        prompts: RwLock::new(prompts),
        health: Mutex::new(ErrorRateTracker::new(ERROR_RATE_WINDOW)),
        stderr: stderr_buf,
        process: Mutex::new(Some(child)),
    })
}

async fn list_catalog<T>(
    mux: &Multiplexer,
    method: &str,
    key: &str,
    name: &Arc<str>,
    deadline: Duration,
) -> Vec<T>
where
    T: serde::de::DeserializeOwned,
{
    match mux.call(method, None, deadline).await {
        Ok(value) => value
            .get(key)
            .and_then(|v| serde_json::from_value::<Vec<T>>(v.clone()).ok())
            .unwrap_or_default(),
        Err(e) => {
            tracing::warn!(child = %name, method, error = %e, "catalog listing failed, defaulting to empty");
            Vec::new()
        }
    }
}

fn start_stderr_drain(
    stderr: tokio::process::ChildStderr,
    name: Arc<str>,
    buf: Arc<Mutex<StderrBuffer>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            tracing::debug!(child = %name, line = %line, "child stderr");
                            buf.lock().await.push(line);
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });
}

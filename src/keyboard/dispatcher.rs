use super::{Control, Event, Handler, Operation, Stack};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long [`Dispatcher::run`] waits for handlers to exit by default.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_BUFFER: usize = 16;
const CONTROL_BUFFER: usize = 64;
const CTRL_C: u8 = 0x03;

/// A key press read from the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress(pub String);

impl From<char> for KeyPress {
    fn from(key: char) -> Self {
        Self(key.to_string())
    }
}

/// One line of the rendered menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub key: String,
    pub label: String,
    pub enabled: bool,
    /// A `Set` event is in flight; further presses of this key are dropped.
    pub busy: bool,
}

/// Outcome of the handler join at the end of [`Dispatcher::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Keys of handlers that were still running at the deadline and got aborted.
    pub aborted: Vec<String>,
}

impl ShutdownReport {
    pub fn completed(&self) -> bool {
        self.aborted.is_empty()
    }
}

struct HandlerState {
    handler: Arc<dyn Handler>,
    events: Option<mpsc::Sender<Event>>,
    awaiting_ack: bool,
    enabled: bool,
    task: JoinHandle<()>,
}

impl HandlerState {
    fn key(&self) -> &str {
        self.handler.key()
    }

    fn menu_item(&self) -> MenuItem {
        MenuItem {
            key: self.key().to_string(),
            label: self.handler.label(self.enabled),
            enabled: self.enabled,
            busy: self.awaiting_ack,
        }
    }
}

/// Routes key presses and stack updates to handlers.
///
/// Each handler runs on its own task. A handler has at most one `Set` event
/// in flight; a press of its key before it acks is dropped. Stack updates go
/// to every handler without waiting for acks.
pub struct Dispatcher {
    handlers: Vec<Arc<dyn Handler>>,
    shutdown_timeout: Duration,
    menu: watch::Sender<Vec<MenuItem>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (menu, _) = watch::channel(Vec::new());
        Self {
            handlers: Vec::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            menu,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bind `handler` to its key. Each key may be bound once.
    pub fn register(&mut self, handler: impl Handler) -> Result<()> {
        if self.handlers.iter().any(|h| h.key() == handler.key()) {
            return Err(Error::DuplicateKeyHandler {
                key: handler.key().to_string(),
            });
        }
        self.menu.send_modify(|items| {
            items.push(MenuItem {
                key: handler.key().to_string(),
                label: handler.label(false),
                enabled: false,
                busy: false,
            })
        });
        self.handlers.push(Arc::new(handler));
        Ok(())
    }

    /// The rendered menu, updated whenever a label or busy state changes.
    pub fn menu(&self) -> watch::Receiver<Vec<MenuItem>> {
        self.menu.subscribe()
    }

    /// Run until `cancel` fires, then close every handler and join them.
    ///
    /// The join is bounded by the shutdown timeout; handlers still running
    /// after it are aborted and listed in the report.
    pub async fn run(
        self,
        mut stack_updates: mpsc::Receiver<Stack>,
        mut keys: mpsc::Receiver<KeyPress>,
        cancel: CancellationToken,
    ) -> ShutdownReport {
        let (control_tx, mut control_rx) = mpsc::channel(CONTROL_BUFFER);
        let mut states: Vec<HandlerState> = self
            .handlers
            .into_iter()
            .map(|handler| {
                let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
                let control = control_tx.clone();
                let task_handler = Arc::clone(&handler);
                let task = tokio::spawn(async move { task_handler.handle(events_rx, control).await });
                HandlerState {
                    handler,
                    events: Some(events_tx),
                    awaiting_ack: false,
                    enabled: false,
                    task,
                }
            })
            .collect();

        let mut stack = Arc::new(Stack::default());
        publish(&self.menu, &states);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(update) = stack_updates.recv() => {
                    stack = Arc::new(update);
                    fan_out(&states, &stack);
                }
                Some(KeyPress(key)) = keys.recv() => {
                    if press(&mut states, &key, &stack) {
                        publish(&self.menu, &states);
                    }
                }
                Some(control) = control_rx.recv() => {
                    if apply(&mut states, control) {
                        publish(&self.menu, &states);
                    }
                }
            }
        }

        tracing::debug!(handlers = states.len(), "Stopping keyboard dispatcher");

        // Handlers may still be sending acks while they wind down; keep
        // receiving until every sender is gone.
        drop(control_tx);
        let drain = tokio::spawn(async move { while control_rx.recv().await.is_some() {} });

        for state in &mut states {
            state.events = None;
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut report = ShutdownReport::default();
        for state in &mut states {
            match tokio::time::timeout_at(deadline, &mut state.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(key = state.key(), error = %e, "Handler task failed"),
                Err(_) => {
                    tracing::warn!(key = state.key(), timeout = ?self.shutdown_timeout, "Handler did not exit in time, aborting");
                    state.task.abort();
                    report.aborted.push(state.key().to_string());
                }
            }
        }

        // Aborted tasks drop their senders once cancelled; the drain then ends.
        let _ = drain.await;
        report
    }
}

fn publish(menu: &watch::Sender<Vec<MenuItem>>, states: &[HandlerState]) {
    menu.send_replace(states.iter().map(HandlerState::menu_item).collect());
}

fn fan_out(states: &[HandlerState], stack: &Arc<Stack>) {
    for state in states {
        let Some(events) = &state.events else { continue };
        let event = Event {
            operation: Operation::StackUpdate,
            stack: Arc::clone(stack),
        };
        if events.try_send(event).is_err() {
            tracing::debug!(key = state.key(), "Handler backlog full, dropping stack update");
        }
    }
}

/// Returns true if a `Set` event was delivered.
fn press(states: &mut [HandlerState], key: &str, stack: &Arc<Stack>) -> bool {
    let Some(state) = states.iter_mut().find(|s| s.key() == key) else {
        tracing::debug!(key, "No handler bound to key");
        return false;
    };
    if state.awaiting_ack {
        tracing::debug!(key, "Handler busy, dropping key press");
        return false;
    }
    let Some(events) = &state.events else {
        return false;
    };
    let event = Event {
        operation: Operation::Set,
        stack: Arc::clone(stack),
    };
    match events.try_send(event) {
        Ok(()) => {
            state.awaiting_ack = true;
            true
        }
        Err(e) => {
            tracing::debug!(key, error = %e, "Could not deliver key press");
            false
        }
    }
}

/// Returns true if the menu changed.
fn apply(states: &mut [HandlerState], control: Control) -> bool {
    match control {
        Control::Ack { key } => match states.iter_mut().find(|s| s.key() == key) {
            Some(state) => {
                tracing::debug!(key = %key, "Handler acked");
                state.awaiting_ack = false;
                true
            }
            None => false,
        },
        Control::Enabled { key, enabled } => match states.iter_mut().find(|s| s.key() == key) {
            Some(state) => {
                state.enabled = enabled;
                true
            }
            None => false,
        },
    }
}

/// Forward printable bytes from `reader` as key presses until EOF.
///
/// Ctrl-C cancels `cancel` and stops reading.
pub async fn keys_from_reader<R>(
    mut reader: R,
    keys: mpsc::Sender<KeyPress>,
    cancel: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(());
        }
        for &byte in &buf[..n] {
            if byte == CTRL_C {
                tracing::debug!("Ctrl-C pressed");
                cancel.cancel();
                return Ok(());
            }
            if byte.is_ascii_graphic() && keys.send(KeyPress::from(byte as char)).await.is_err() {
                return Ok(());
            }
        }
    }
}

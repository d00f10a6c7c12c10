use async_trait::async_trait;
use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::mpsc;

/// What an [`Event`] asks the handler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    /// The handler's key was pressed. Must be answered with [`Control::Ack`].
    Set,
    /// The stack changed. Informational, no ack.
    StackUpdate,
}

/// The environment the terminal is attached to, as last reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stack {
    pub name: String,
    pub services: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub operation: Operation,
    pub stack: Arc<Stack>,
}

/// Messages from handlers back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// The handler finished its `Set` event and can take another.
    Ack { key: String },
    /// The handler's toggle changed; its menu label is re-rendered.
    Enabled { key: String, enabled: bool },
}

/// A single-key feature of the terminal UI.
///
/// `handle` runs on its own task. It receives events until the dispatcher
/// closes `events`, and must return once that happens.
///
/// # Example
///
/// ```rust,ignore
/// struct Logs;
///
/// #[async_trait]
/// impl Handler for Logs {
///     fn key(&self) -> &str { "l" }
///
///     fn label(&self, enabled: bool) -> String {
///         if enabled { "hide logs".into() } else { "show logs".into() }
///     }
///
///     async fn handle(&self, mut events: mpsc::Receiver<Event>, control: mpsc::Sender<Control>) {
///         let mut enabled = false;
///         while let Some(event) = events.recv().await {
///             if event.operation == Operation::Set {
///                 enabled = !enabled;
///                 let _ = control.send(Control::Enabled { key: "l".into(), enabled }).await;
///                 let _ = control.send(Control::Ack { key: "l".into() }).await;
///             }
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    fn key(&self) -> &str;

    fn label(&self, enabled: bool) -> String;

    async fn handle(&self, events: mpsc::Receiver<Event>, control: mpsc::Sender<Control>);
}

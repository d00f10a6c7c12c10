use servecore::keyboard::{Control, Event, Handler, Operation, Stack};
use servecore::prelude::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

const KEY: &str = "s";

/// Logs the current stack when `s` is pressed.
pub struct StatusHandler;

#[async_trait]
impl Handler for StatusHandler {
    fn key(&self) -> &str {
        KEY
    }

    fn label(&self, _enabled: bool) -> String {
        "show status".to_string()
    }

    async fn handle(&self, mut events: mpsc::Receiver<Event>, control: mpsc::Sender<Control>) {
        let mut stack = Arc::new(Stack::default());
        while let Some(event) = events.recv().await {
            stack = event.stack;
            if event.operation == Operation::Set {
                tracing::info!(stack = %stack.name, services = ?stack.services, "Status");
                if control.send(Control::Ack { key: KEY.to_string() }).await.is_err() {
                    break;
                }
            }
        }
        tracing::debug!(last_stack = %stack.name, "Status handler stopped");
    }
}

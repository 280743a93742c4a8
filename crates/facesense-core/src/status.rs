//! The single, overwriting status message shown to the operator.

use tokio::sync::watch;
use uuid::Uuid;

pub struct StatusLine {
    tx: watch::Sender<String>,
    session: Uuid,
}

impl StatusLine {
    pub fn new(session: Uuid) -> Self {
        let (tx, _) = watch::channel(String::new());
        Self { tx, session }
    }

    /// Replace the current message.
    pub fn set(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(session = %self.session, status = %message, "status");
        self.tx.send_replace(message);
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

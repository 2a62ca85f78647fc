//! Presentation collaborator
//!
//! The core never renders anything. It hands notifications to a
//! [`Presenter`] supplied by the host.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

/// Something the user should be told about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// The offline queue drained completely
    SyncComplete { replayed: usize },
    /// A failed mutating request was queued for replay
    OperationQueued { id: String, method: String, url: String },
    /// The user reached a location bound to an automation rule
    AutomationTriggered {
        rule_id: String,
        name: String,
        action: String,
    },
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::SyncComplete { replayed } => {
                write!(f, "Sincronização concluída: {} operação(ões) enviada(s)", replayed)
            }
            Notification::OperationQueued { method, url, .. } => {
                write!(f, "Sem conexão: {} {} será reenviada", method, url)
            }
            Notification::AutomationTriggered { name, action, .. } => {
                write!(f, "Automação '{}': {}", name, action)
            }
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Presenter: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn notify(&self, notification: Notification) {
        info!("{}", notification);
    }
}

/// Forwards notifications to a channel the host drains
#[derive(Debug, Clone)]
pub struct ChannelPresenter {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelPresenter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Presenter for ChannelPresenter {
    fn notify(&self, notification: Notification) {
        // Receiver gone means nobody is listening
        let _ = self.tx.send(notification);
    }
}

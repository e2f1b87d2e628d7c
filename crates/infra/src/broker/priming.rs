//! Close-signal handoff between the connector and the supervisor.
//!
//! A [`CloseSignal`] is a one-shot tied to one physical connection: it either
//! delivers the error that killed the connection or is dropped along with it.
//! Right after a successful connect the connector wraps the signal in a
//! [`Priming`] and places it in a single-slot channel, so the supervisor always
//! picks up the handle of the connection it just opened.

use core::fmt;

use tokio::sync::{mpsc, oneshot};

use super::BrokerError;

/// Why a connection is considered dead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The connection reported an error before going away.
    Error(String),
    /// The notifier went away without reporting anything.
    Dropped,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Error(reason) => write!(f, "connection error: {reason}"),
            CloseReason::Dropped => f.write_str("close notifier dropped"),
        }
    }
}

/// Producer half of a close signal, owned by the transport.
#[derive(Debug)]
pub struct CloseNotifier {
    tx: oneshot::Sender<String>,
}

impl CloseNotifier {
    /// Report the error that closed the connection. Consumes the notifier.
    pub fn fire(self, reason: impl Into<String>) {
        let _ = self.tx.send(reason.into());
    }
}

/// Consumer half of a close signal, watched by the supervisor.
#[derive(Debug)]
pub struct CloseSignal {
    rx: oneshot::Receiver<String>,
}

impl CloseSignal {
    /// Resolve once the connection is gone. A delivered error and a dropped
    /// notifier both mean the same thing.
    pub async fn closed(self) -> CloseReason {
        match self.rx.await {
            Ok(reason) => CloseReason::Error(reason),
            Err(_) => CloseReason::Dropped,
        }
    }
}

/// Create a linked notifier/signal pair for one connection.
pub fn close_signal() -> (CloseNotifier, CloseSignal) {
    let (tx, rx) = oneshot::channel();
    (CloseNotifier { tx }, CloseSignal { rx })
}

/// Wrapper used solely to move a fresh [`CloseSignal`] to the supervisor.
#[derive(Debug)]
pub struct Priming {
    signal: CloseSignal,
}

impl Priming {
    pub fn into_signal(self) -> CloseSignal {
        self.signal
    }
}

/// Connector side of the priming channel.
#[derive(Debug, Clone)]
pub struct PrimingSender {
    tx: mpsc::Sender<Priming>,
}

impl PrimingSender {
    /// Hand over the close signal of a connection that was just established.
    ///
    /// Never waits: if the previous priming has not been collected yet the
    /// supervisor is out of step and the attempt is treated as failed.
    pub fn prime(&self, signal: CloseSignal) -> Result<(), BrokerError> {
        self.tx
            .try_send(Priming { signal })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    BrokerError::Priming("previous close signal not yet collected".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    BrokerError::Priming("supervisor is gone".to_string())
                }
            })
    }
}

/// Supervisor side of the priming channel.
#[derive(Debug)]
pub struct PrimingReceiver {
    rx: mpsc::Receiver<Priming>,
}

impl PrimingReceiver {
    /// Wait for the next priming. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Priming> {
        self.rx.recv().await
    }
}

/// Single-slot channel carrying [`Priming`] messages.
pub fn priming_channel() -> (PrimingSender, PrimingReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (PrimingSender { tx }, PrimingReceiver { rx })
}

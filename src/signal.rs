//! Stop signals and the channel that carries them.
//!
//! Anything that decides the process should stop (the OS, or an HTTP request
//! through [`terminate_handler`](crate::terminate_handler)) sends a [`Signal`]
//! on a stop channel. Exactly one shutdown coordinator consumes it.

use std::fmt;
use std::io;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::debug;

/// A process stop request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Signal {
    /// SIGINT, or Ctrl-C on every platform.
    Interrupt,
    /// SIGTERM. What Kubernetes and `kill` send.
    Terminate,
    /// SIGHUP.
    Hangup,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup    => "SIGHUP",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Creates a stop channel.
///
/// `capacity` is clamped to at least 1: an unbuffered stop channel would block
/// the request task of a terminate endpoint until the coordinator runs.
pub fn channel(capacity: usize) -> (mpsc::Sender<Signal>, mpsc::Receiver<Signal>) {
    mpsc::channel(capacity.max(1))
}

/// Relays SIGINT and SIGTERM into `tx` until the receiver goes away.
///
/// Delivery never blocks. If the channel is full a stop is already pending
/// and the new signal is dropped.
///
/// Must be called from within a tokio runtime.
#[cfg(unix)]
pub fn notify(tx: mpsc::Sender<Signal>) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let caught = tokio::select! {
                Some(()) = interrupt.recv() => Signal::Interrupt,
                Some(()) = terminate.recv() => Signal::Terminate,
                else => break,
            };
            if !relay(&tx, caught) {
                break;
            }
        }
    }))
}

/// Relays Ctrl-C into `tx` until the receiver goes away.
#[cfg(not(unix))]
pub fn notify(tx: mpsc::Sender<Signal>) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !relay(&tx, Signal::Interrupt) {
                break;
            }
        }
    }))
}

/// Returns `false` once nobody is listening.
fn relay(tx: &mpsc::Sender<Signal>, caught: Signal) -> bool {
    match tx.try_send(caught) {
        Ok(()) => {
            debug!(signal = %caught, "stop signal relayed");
            true
        }
        Err(TrySendError::Full(_)) => {
            debug!(signal = %caught, "stop already pending, signal dropped");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(Signal::Interrupt.name(), "SIGINT");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
        assert_eq!(Signal::Hangup.name(), "SIGHUP");
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let (tx, mut rx) = channel(0);
        tx.try_send(Signal::Terminate).unwrap();
        assert_eq!(rx.recv().await, Some(Signal::Terminate));
    }

    #[tokio::test]
    async fn relay_drops_when_full_and_stops_when_closed() {
        let (tx, mut rx) = channel(1);
        assert!(relay(&tx, Signal::Interrupt));
        assert!(relay(&tx, Signal::Terminate));
        assert_eq!(rx.recv().await, Some(Signal::Interrupt));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!relay(&tx, Signal::Interrupt));
    }
}

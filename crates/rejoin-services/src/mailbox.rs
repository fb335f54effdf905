//! The transport contract the receive loop consumes.
//!
//! `Ok(Some(msg))` is a data message, `Ok(None)` is orderly closure and
//! `Err` is abnormal closure of the transport.

use std::future::Future;
use std::io;

use tokio::sync::mpsc;

use rejoin_core::RejoinDataMessage;

pub trait Mailbox: Send {
    /// Wait for the next message. Implementations must be cancel-safe: the
    /// receive loop races this against its shutdown signal.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<RejoinDataMessage>>> + Send;
}

/// Create an in-process mailbox and its sending half.
pub fn channel() -> (MailboxSender, ChannelMailbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MailboxSender { tx }, ChannelMailbox { rx })
}

/// Sending half of a [`ChannelMailbox`]. The mailbox closes in order once
/// every sender is dropped.
#[derive(Clone)]
pub struct MailboxSender {
    tx: mpsc::UnboundedSender<io::Result<RejoinDataMessage>>,
}

impl MailboxSender {
    pub fn send(&self, msg: RejoinDataMessage) -> Result<(), MailboxClosed> {
        self.tx.send(Ok(msg)).map_err(|_| MailboxClosed)
    }

    /// Deliver a transport failure to the receiving side.
    pub fn fail(&self, err: io::Error) -> Result<(), MailboxClosed> {
        self.tx.send(Err(err)).map_err(|_| MailboxClosed)
    }
}

pub struct ChannelMailbox {
    rx: mpsc::UnboundedReceiver<io::Result<RejoinDataMessage>>,
}

impl Mailbox for ChannelMailbox {
    async fn recv(&mut self) -> io::Result<Option<RejoinDataMessage>> {
        self.rx.recv().await.transpose()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("mailbox receiver dropped")]
pub struct MailboxClosed;

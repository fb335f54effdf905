//! TCP mailbox — accepts sender connections and decodes framed data
//! messages from each.
//!
//! One reader task per connection forwards messages into a single ordered,
//! bounded channel. While the channel is full the readers stop reading their
//! sockets, so a receive loop stalled on the buffer pool pushes back on
//! senders through TCP flow control.
//!
//! A framing or I/O error on any connection is delivered as a transport
//! failure. When a connection ends, the tracking rows of the stream pairs it
//! carried are evicted once the receive loop has consumed everything it sent,
//! unless another live connection is still carrying the same pair.

use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};

use rejoin_core::wire::{DataMessageHeader, DATA_HEADER_LEN};
use rejoin_core::{RejoinDataMessage, StreamPair};

use crate::mailbox::Mailbox;
use crate::tracking::TransferTracking;

/// State for one accepted sender connection.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub peer: SocketAddr,
    pub connected_at: Instant,
    pub messages: u64,
    pub bytes: u64,
    /// Every stream pair seen on this connection.
    pub pairs: BTreeSet<StreamPair>,
}

impl ConnectionMeta {
    fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            connected_at: Instant::now(),
            messages: 0,
            bytes: 0,
            pairs: BTreeSet::new(),
        }
    }
}

/// Live connections, shared with status reporting.
pub type ConnectionTable = Arc<DashMap<SocketAddr, ConnectionMeta>>;

enum Inbound {
    Data(RejoinDataMessage),
    Closed {
        peer: SocketAddr,
        pairs: BTreeSet<StreamPair>,
    },
    Failed(io::Error),
}

pub struct TcpMailbox {
    rx: mpsc::Receiver<Inbound>,
    local_addr: SocketAddr,
    connections: ConnectionTable,
    tracking: TransferTracking,
}

impl TcpMailbox {
    /// Bind the listener and start accepting. At most `backlog` frames wait
    /// between the readers and `recv`. The listener and every reader stop on
    /// `shutdown`; once they have, `recv` reports orderly closure.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        backlog: usize,
        tracking: TransferTracking,
        shutdown: broadcast::Receiver<()>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let connections: ConnectionTable = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::channel(backlog.max(1));

        tracing::info!(addr = %local_addr, backlog, "rejoin data listener bound");
        tokio::spawn(accept_loop(listener, tx, connections.clone(), shutdown));

        Ok(Self {
            rx,
            local_addr,
            connections,
            tracking,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connections(&self) -> ConnectionTable {
        self.connections.clone()
    }
}

impl TcpMailbox {
    fn carried_elsewhere(&self, pair: &StreamPair) -> bool {
        self.connections.iter().any(|c| c.pairs.contains(pair))
    }
}

impl Mailbox for TcpMailbox {
    async fn recv(&mut self) -> io::Result<Option<RejoinDataMessage>> {
        loop {
            match self.rx.recv().await {
                Some(Inbound::Data(msg)) => return Ok(Some(msg)),
                Some(Inbound::Failed(e)) => return Err(e),
                Some(Inbound::Closed { peer, pairs }) => {
                    let mut evicted = 0usize;
                    for pair in &pairs {
                        if self.carried_elsewhere(pair) {
                            continue;
                        }
                        if self.tracking.forget(pair).is_some() {
                            evicted += 1;
                        }
                    }
                    tracing::debug!(%peer, evicted, "evicted tracking rows for closed connection");
                }
                None => return Ok(None),
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Inbound>,
    connections: ConnectionTable,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("rejoin data listener shutting down");
                return;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!(%peer, "sender connected");
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                        }
                        tokio::spawn(read_connection(
                            stream,
                            peer,
                            tx.clone(),
                            connections.clone(),
                            shutdown.resubscribe(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

async fn read_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<Inbound>,
    connections: ConnectionTable,
    mut shutdown: broadcast::Receiver<()>,
) {
    connections.insert(peer, ConnectionMeta::new(peer));
    let mut reader = BufReader::new(stream);

    let result = loop {
        tokio::select! {
            _ = shutdown.recv() => break Ok(()),

            frame = read_frame(&mut reader) => {
                match frame {
                    Ok(Some(msg)) => {
                        if let Some(mut meta) = connections.get_mut(&peer) {
                            meta.messages += 1;
                            meta.bytes += msg.data.len() as u64;
                            meta.pairs.insert(msg.pair());
                        }
                        // No socket reads while the receive loop is behind.
                        tokio::select! {
                            _ = shutdown.recv() => break Ok(()),
                            sent = tx.send(Inbound::Data(msg)) => {
                                if sent.is_err() {
                                    break Ok(());
                                }
                            }
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }
        }
    };

    let meta = connections.remove(&peer).map(|(_, meta)| meta);
    let (messages, bytes, pairs) = meta
        .map(|m| (m.messages, m.bytes, m.pairs))
        .unwrap_or_default();

    match result {
        Ok(()) => {
            tracing::info!(%peer, messages, bytes, "sender disconnected");
        }
        Err(e) => {
            tracing::warn!(%peer, error = %e, "sender connection failed");
            let _ = tx.send(Inbound::Failed(e)).await;
        }
    }
    let _ = tx.send(Inbound::Closed { peer, pairs }).await;
}

/// Read one framed message. `Ok(None)` on clean end of stream at a frame
/// boundary; a stream that ends mid-frame is an error.
pub async fn read_frame<R>(reader: &mut BufReader<R>) -> io::Result<Option<RejoinDataMessage>>
where
    R: AsyncRead + Unpin,
{
    if reader.fill_buf().await?.is_empty() {
        return Ok(None);
    }

    let mut header_buf = [0u8; DATA_HEADER_LEN];
    reader.read_exact(&mut header_buf).await?;
    let header = DataMessageHeader::parse(&header_buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut payload = vec![0u8; header.payload_len()];
    reader.read_exact(&mut payload).await?;

    Ok(Some(RejoinDataMessage::new(
        header.source(),
        header.target(),
        Bytes::from(payload),
    )))
}

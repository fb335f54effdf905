//! The receiving half of the rejoin snapshot stream.
//!
//! Compressed chunks arrive through a [`Mailbox`], are decompressed into
//! pooled buffers, tracked per stream pair, and handed to the consumer
//! through the decoded-chunk queue of a [`SnapshotDataReceiver`].

pub mod buffer_pool;
pub mod chunk_queue;
pub mod mailbox;
pub mod receiver;
pub mod tracking;
pub mod transport;
pub mod watchdog;

pub use buffer_pool::{BufferPool, PoolError, PooledBuffer, SizeClass};
pub use chunk_queue::{ChunkQueue, DecodedChunk};
pub use mailbox::{channel, ChannelMailbox, Mailbox, MailboxClosed, MailboxSender};
pub use receiver::{DecodeError, ReceiveError, ReceiverStats, SnapshotDataReceiver};
pub use tracking::{TrackingEntry, TrackingSnapshot, TransferTracking};
pub use transport::{ConnectionMeta, ConnectionTable, TcpMailbox};
pub use watchdog::{Watchdog, WatchdogHandle, WatchdogReport};

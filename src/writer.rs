//! Dedicated writer task for outbound packets.
//!
//! All sends on a connection go through an mpsc channel to a single task
//! owning the write half, so concurrent callers never interleave partial
//! packets on the wire and no send path ever holds a lock across I/O.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};

/// Channel capacity for the outbound packet queue.
const CHANNEL_CAPACITY: usize = 1024;

/// Maximum packets drained per write/flush cycle.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for queueing packets to the writer task. Cheaply cloneable.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue one fully-encoded packet for sending.
    ///
    /// Fails with [`RpcError::ConnectionClosed`] once the writer task has
    /// stopped.
    pub async fn send(&self, packet: Bytes) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| RpcError::ConnectionClosed)
    }
}

/// Spawn the writer task and return a handle for queueing packets.
pub(crate) fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Receive packets and write them out, batching whatever is already queued
/// into a single flush.
async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(packet) => packet,
            None => return Ok(()), // all handles dropped, clean shutdown
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(packet) => batch.push(packet),
                Err(_) => break,
            }
        }

        for packet in &batch {
            writer.write_all(packet).await?;
        }
        writer.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_send_reaches_the_wire() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client);

        handle.send(Bytes::from_static(b"hello")).await.unwrap();

        let mut buf = [0u8; 16];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_packets_arrive_in_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client);

        for i in 0..10u8 {
            handle.send(Bytes::copy_from_slice(&[i])).await.unwrap();
        }

        let mut buf = [0u8; 10];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_writer_stops_when_handles_drop() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client);

        task.abort();
        let _ = task.await;

        let result = handle.send(Bytes::from_static(b"late")).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
    }
}

//! Per-connection handling.
//!
//! Each accepted client gets its own task running the loop below: read
//! bytes into a buffer, decode one request, execute it through the command
//! table, forward it to the persistence log when it mutated something, send
//! the reply. TCP is a stream, so the buffer may hold half a request or
//! several; the decoder's incomplete/complete/error contract drives the
//! loop.
//!
//! Request handling rules at this layer:
//!
//! - a request that is not an array, or is an empty array, is logged and
//!   ignored — no reply, connection stays open
//! - an unknown command is answered with an empty simple string and the
//!   connection continues
//! - a decode error or reply-write failure is fatal to this connection only

use crate::commands::table::{command_parts, lookup};
use crate::persistence::AofLog;
use crate::protocol::{DecodeError, Decoder, Value};
use crate::storage::Store;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Hard cap on buffered, undecoded request bytes (64 KB).
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial read-buffer capacity.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Shared connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// State for one client connection.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    decoder: Decoder,
    store: Arc<Store>,
    log: Arc<AofLog>,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        store: Arc<Store>,
        log: Arc<AofLog>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            decoder: Decoder::new(),
            store,
            log,
            stats,
        }
    }

    /// Runs the connection to completion.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "client disconnected"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(request) = self.try_decode()? {
                self.stats.command_processed();
                self.handle_request(request).await?;
            }
            self.read_more().await?;
        }
    }

    /// Executes one decoded request and sends its reply, if any.
    async fn handle_request(&mut self, request: Value) -> Result<(), ConnectionError> {
        let Some((name, args)) = command_parts(&request) else {
            info!(client = %self.addr, "ignoring request that is not a command array");
            return Ok(());
        };

        let Some(spec) = lookup(&name) else {
            info!(client = %self.addr, command = %name, "unknown command");
            return self.send_reply(&Value::simple("")).await;
        };

        let reply = (spec.handler)(&self.store, args);

        // a rejected command mutated nothing, so there is nothing to log
        if spec.mutating && !reply.is_error() {
            if let Err(e) = self.log.append(&request) {
                error!(client = %self.addr, error = %e, "append to persistence log failed");
            }
        }

        self.send_reply(&reply).await
    }

    /// Pulls one complete request off the front of the buffer, if present.
    fn try_decode(&mut self) -> Result<Option<Value>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.decoder.decode(&self.buffer) {
            Ok(Some((value, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "decoded request"
                );
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "protocol violation");
                Err(ConnectionError::Decode(e))
            }
        }
    }

    async fn read_more(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "request buffer limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.add_bytes_read(n);
        trace!(client = %self.addr, bytes = n, "read data");
        Ok(())
    }

    async fn send_reply(&mut self, reply: &Value) -> Result<(), ConnectionError> {
        let bytes = reply.encode();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.add_bytes_written(bytes.len());
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Decode(#[from] DecodeError),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("request buffer limit exceeded")]
    BufferFull,
}

/// Runs one client connection to completion, swallowing the error cases
/// that are ordinary disconnects.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    store: Arc<Store>,
    log: Arc<AofLog>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, store, log, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::dispatch;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct TestServer {
        addr: SocketAddr,
        store: Arc<Store>,
        log: Arc<AofLog>,
        stats: Arc<ConnectionStats>,
        _dir: tempfile::TempDir,
    }

    async fn start_test_server() -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(Store::new());
        let log = Arc::new(AofLog::open(dir.path().join("server.aof")).unwrap());
        let stats = Arc::new(ConnectionStats::new());

        let accept_store = Arc::clone(&store);
        let accept_log = Arc::clone(&log);
        let accept_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    Arc::clone(&accept_store),
                    Arc::clone(&accept_log),
                    Arc::clone(&accept_stats),
                ));
            }
        });

        TestServer {
            addr,
            store,
            log,
            stats,
            _dir: dir,
        }
    }

    async fn roundtrip(client: &mut TcpStream, request: &[u8]) -> Vec<u8> {
        client.write_all(request).await.unwrap();
        let mut buf = [0u8; 512];
        let n = client.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn ping_pong() {
        let server = start_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        let reply = roundtrip(&mut client, b"*1\r\n$4\r\nPING\r\n").await;
        assert_eq!(reply, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn set_then_get_over_the_wire() {
        let server = start_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        let reply = roundtrip(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
        )
        .await;
        assert_eq!(reply, b"+OK\r\n");

        let reply = roundtrip(&mut client, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
        assert_eq!(reply, b"$3\r\nbar\r\n");
    }

    #[tokio::test]
    async fn list_scenario_over_the_wire() {
        let server = start_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        let reply = roundtrip(
            &mut client,
            b"*5\r\n$5\r\nRPUSH\r\n$6\r\nmylist\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
        )
        .await;
        assert_eq!(reply, b":3\r\n");

        let reply = roundtrip(
            &mut client,
            b"*4\r\n$6\r\nLRANGE\r\n$6\r\nmylist\r\n$1\r\n0\r\n$2\r\n-1\r\n",
        )
        .await;
        assert_eq!(reply, b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n");

        let reply = roundtrip(
            &mut client,
            b"*3\r\n$4\r\nLPOP\r\n$6\r\nmylist\r\n$1\r\n2\r\n",
        )
        .await;
        assert_eq!(reply, b"*2\r\n$1\r\na\r\n$1\r\nb\r\n");
    }

    #[tokio::test]
    async fn hash_scenario_over_the_wire() {
        let server = start_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        let reply = roundtrip(
            &mut client,
            b"*6\r\n$4\r\nHSET\r\n$1\r\nh\r\n$2\r\nf1\r\n$2\r\nv1\r\n$2\r\nf2\r\n$2\r\nv2\r\n",
        )
        .await;
        assert_eq!(reply, b":2\r\n");

        // HGETALL order is unspecified, so just check the shape
        let reply = roundtrip(&mut client, b"*2\r\n$7\r\nHGETALL\r\n$1\r\nh\r\n").await;
        assert!(reply.starts_with(b"*4\r\n"));

        let reply = roundtrip(&mut client, b"*3\r\n$4\r\nHDEL\r\n$1\r\nh\r\n$2\r\nf1\r\n").await;
        assert_eq!(reply, b":1\r\n");

        let reply = roundtrip(
            &mut client,
            b"*3\r\n$7\r\nHEXISTS\r\n$1\r\nh\r\n$2\r\nf1\r\n",
        )
        .await;
        assert_eq!(reply, b":0\r\n");
    }

    #[tokio::test]
    async fn unknown_command_gets_empty_simple_string() {
        let server = start_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        let reply = roundtrip(&mut client, b"*1\r\n$7\r\nNOTACMD\r\n").await;
        assert_eq!(reply, b"+\r\n");

        // the connection is still healthy
        let reply = roundtrip(&mut client, b"*1\r\n$4\r\nPING\r\n").await;
        assert_eq!(reply, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn non_array_request_is_ignored_without_reply() {
        let server = start_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        // a bare simple string is not a command array: no reply, no close
        client.write_all(b"+hello\r\n*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");
    }

    #[tokio::test]
    async fn protocol_violation_drops_the_connection() {
        let server = start_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"@garbage\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "server should close on an unknown type tag");
    }

    #[tokio::test]
    async fn mutating_commands_land_in_the_log() {
        let server = start_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        roundtrip(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
        )
        .await;
        roundtrip(&mut client, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
        roundtrip(&mut client, b"*2\r\n$4\r\nINCR\r\n$1\r\nn\r\n").await;
        // arity error: must not be logged
        roundtrip(&mut client, b"*2\r\n$3\r\nSET\r\n$1\r\nk\r\n").await;

        let mut records = Vec::new();
        server.log.replay(|req| records.push(req)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            Value::array(vec![Value::bulk("SET"), Value::bulk("foo"), Value::bulk("bar")])
        );
        assert_eq!(
            records[1],
            Value::array(vec![Value::bulk("INCR"), Value::bulk("n")])
        );
    }

    #[tokio::test]
    async fn restart_from_log_alone_restores_state() {
        let server = start_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        roundtrip(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
        )
        .await;

        // "restart": a fresh store fed only by the log
        let restored = Store::new();
        server
            .log
            .replay(|req| {
                dispatch(&restored, &req);
            })
            .unwrap();

        let get = Value::array(vec![Value::bulk("GET"), Value::bulk("foo")]);
        assert_eq!(dispatch(&restored, &get), Some(Value::bulk("bar")));
        assert_eq!(dispatch(&server.store, &get), Some(Value::bulk("bar")));
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let server = start_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(
                b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n\
                  *3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk1\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk2\r\n",
            )
            .await
            .unwrap();

        // +OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n = 26 bytes
        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(2);
        let mut buf = [0u8; 256];
        while collected.len() < 26 && tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(
                tokio::time::Duration::from_millis(100),
                client.read(&mut buf),
            )
            .await
            {
                Ok(Ok(n)) if n > 0 => collected.extend_from_slice(&buf[..n]),
                _ => break,
            }
        }

        assert_eq!(collected, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n");
    }

    #[tokio::test]
    async fn stats_track_the_connection_lifecycle() {
        let server = start_test_server().await;

        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(server.addr).await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(server.stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 1);

        roundtrip(&mut client, b"*1\r\n$4\r\nPING\r\n").await;
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert!(server.stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(server.stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(server.stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);
    }
}

//! UDP ingestion and flush orchestration
//!
//! A [`Server`] owns the worker handles, a shared buffer pool, and N reader
//! tasks. Each reader has its own socket bound to the same address with
//! `SO_REUSEPORT`, so the kernel spreads incoming datagrams across them;
//! scaling the read path is independent of worker sharding.
//!
//! Buffer discipline: a reader borrows a buffer from the pool for exactly
//! one datagram. The decoder copies every field out of the buffer, so by
//! the time `handle_packet` returns no sample aliases it and it can go
//! straight back to the pool, error paths included.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::framer::SplitBytes;
use crate::metric::{parse_metric, FlushedMetric, ParseError};
use crate::router::worker_index;
use crate::worker::{spawn_worker, WorkerHandle};

/// Errors that prevent the server from starting at all.
#[derive(Debug)]
pub enum ServerError {
    /// Socket construction or bind failed. Fatal: if the process cannot
    /// listen it cannot serve its purpose.
    Bind(std::io::Error),
    /// Configuration rejected (zero workers or readers).
    Config(&'static str),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(e) => write!(f, "failed to bind UDP socket: {}", e),
            ServerError::Config(msg) => write!(f, "invalid server config: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Bind(e)
    }
}

/// Fixed-size pool of read buffers, shared by every reader task.
///
/// Concurrent acquire/release is safe; the queue is lock-free. When the
/// pool runs dry a fresh buffer is allocated rather than blocking a read.
pub struct PacketBufferPool {
    pool: ArrayQueue<BytesMut>,
    buffer_size: usize,
}

impl PacketBufferPool {
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let pool = ArrayQueue::new(count.max(1));
        for _ in 0..count {
            let _ = pool.push(BytesMut::zeroed(buffer_size));
        }
        PacketBufferPool { pool, buffer_size }
    }

    /// Borrow a buffer, fully initialized to `buffer_size` bytes.
    pub fn acquire(&self) -> BytesMut {
        let mut buf = self
            .pool
            .pop()
            .unwrap_or_else(|| BytesMut::zeroed(self.buffer_size));
        buf.resize(self.buffer_size, 0);
        buf
    }

    /// Return a buffer once nothing derived from it is still borrowed.
    pub fn release(&self, buf: BytesMut) {
        let _ = self.pool.push(buf);
    }
}

/// The ingestion pipeline: reader tasks feeding sharded workers.
#[derive(Clone)]
pub struct Server {
    workers: Arc<Vec<WorkerHandle>>,
    pool: Arc<PacketBufferPool>,
    diagnostics: Diagnostics,
    local_addr: SocketAddr,
}

impl Server {
    /// Spawn workers and reader tasks per `config`. The worker count is
    /// frozen here for the process lifetime; see [`crate::router`].
    pub fn start(config: &Config, diagnostics: Diagnostics) -> Result<Server, ServerError> {
        if config.num_workers == 0 {
            return Err(ServerError::Config("num_workers must be at least 1"));
        }
        if config.num_readers == 0 {
            return Err(ServerError::Config("num_readers must be at least 1"));
        }

        info!(workers = config.num_workers, "starting aggregation workers");
        let workers: Vec<WorkerHandle> = (0..config.num_workers)
            .map(|id| {
                spawn_worker(
                    id,
                    config.worker_queue_size,
                    config.worker_config(),
                    diagnostics.clone(),
                )
            })
            .collect();

        // each reader gets its own socket; with SO_REUSEPORT the kernel
        // load-balances datagrams across them. The first bind resolves an
        // ephemeral port (if configured) for the rest.
        let mut sockets = Vec::with_capacity(config.num_readers);
        let mut bound_addr = config.udp_addr;
        for _ in 0..config.num_readers {
            let socket = bind_udp(bound_addr, config.recv_buffer_bytes)?;
            bound_addr = socket.local_addr()?;
            sockets.push(socket);
        }

        let server = Server {
            workers: Arc::new(workers),
            pool: Arc::new(PacketBufferPool::new(
                config.buffer_pool_size,
                config.read_buffer_size,
            )),
            diagnostics,
            local_addr: bound_addr,
        };

        for (reader, socket) in sockets.into_iter().enumerate() {
            info!(reader, address = %bound_addr, "UDP reader listening");
            let server = server.clone();
            tokio::spawn(async move {
                server.read_socket(reader, socket).await;
            });
        }

        Ok(server)
    }

    /// Read datagrams forever. A failed read is logged and skipped; one bad
    /// read must not stop ingestion.
    async fn read_socket(&self, reader: usize, socket: UdpSocket) {
        loop {
            let mut buf = self.pool.acquire();
            match socket.recv_from(&mut buf).await {
                Ok((n, _from)) => {
                    self.diagnostics.packet_read(n);
                    self.handle_packet(&buf[..n]).await;
                }
                Err(e) => {
                    self.diagnostics.read_error();
                    error!(reader, error = %e, "error reading from UDP socket");
                }
            }
            // every sample decoded from this buffer owns its storage now
            self.pool.release(buf);
        }
    }

    /// Frame one datagram, decode each chunk, and route the results.
    pub async fn handle_packet(&self, packet: &[u8]) {
        let mut split = SplitBytes::new(packet, b'\n');
        while split.next() {
            let chunk = split.chunk();
            match parse_metric(chunk) {
                Ok(metric) => match worker_index(metric.digest, self.workers.len()) {
                    Ok(idx) => {
                        self.workers[idx].send(metric).await;
                        self.diagnostics.sample_routed();
                    }
                    Err(_) => {
                        // start() rejects zero workers; this cannot happen
                        debug_assert!(false, "routing with zero workers");
                    }
                },
                Err(ParseError::Empty) => {
                    // trailing-newline artifact from the framer; counted,
                    // not worth a log line per packet
                    self.diagnostics.empty_chunk();
                }
                Err(e) => {
                    self.diagnostics.parse_error();
                    warn!(
                        error = %e,
                        chunk = %String::from_utf8_lossy(chunk),
                        "could not parse sample"
                    );
                }
            }
        }
    }

    /// Flush every worker once and combine the batches. Callers drive this
    /// on a fixed period and must not overlap calls.
    pub async fn flush(&self, interval: Duration) -> Vec<FlushedMetric> {
        let mut points = Vec::new();
        for worker in self.workers.iter() {
            points.extend(worker.flush(interval).await);
        }
        debug!(points = points.len(), "flush complete");
        points
    }

    /// Run the flush timer, handing each interval's batch to `deliver`.
    pub async fn run_flush_loop<F>(&self, period: Duration, mut deliver: F)
    where
        F: FnMut(Vec<FlushedMetric>) + Send,
    {
        let mut ticker = tokio::time::interval(period);
        // the first tick fires immediately; skip it so the first interval
        // gets a full period of data
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let points = self.flush(period).await;
            if !points.is_empty() {
                deliver(points);
            }
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// The address the readers actually bound (resolves an ephemeral port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Build a UDP socket with SO_REUSEPORT (so multiple readers can bind the
/// same address) and an enlarged kernel receive buffer.
fn bind_udp(addr: SocketAddr, recv_buffer_bytes: usize) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    if recv_buffer_bytes > 0 {
        socket.set_recv_buffer_size(recv_buffer_bytes)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

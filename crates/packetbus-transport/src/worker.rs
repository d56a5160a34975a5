//! Transport engine: channel drivers, bounded dispatch queue, worker pool.
//!
//! A `Worker` owns one driver task per registered channel and a fixed pool of
//! dispatch tasks. Drivers drain datagrams into pooled buffers and push
//! decode jobs onto a bounded queue; dispatch tasks pull jobs, run the
//! codec/plugin/handler pipeline, flush the session's reply, and recycle the
//! buffers.
//!
//! # Flow control
//!
//! The dispatch queue is the transport's sole flow-control mechanism. When it
//! is full, the driver that produced the job stops draining its socket and
//! waits for capacity - the in-flight packet is held, never dropped. Kernel
//! socket buffers absorb the burst in the meantime.
//!
//! # Failure scoping
//!
//! Decode and process failures are scoped to a single datagram: they are
//! counted, surfaced through `Handler::state_event`, and the rest of that
//! datagram is dropped. The driver and dispatch tasks keep running. Socket
//! receive errors are logged and retried after a short pause; a driver never
//! silently stops servicing its channel.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use packetbus_core::{
    BufferPagePool, Codec, Handler, Monitor, Plugin, Session, TransportConfig, TransportError,
    TransportEvent, TransportResult, VirtualBuf,
};

use crate::channel::UdpChannel;
use crate::session::UdpSession;

/// Pause before retrying after a socket receive error.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// One received datagram on its way to the dispatch pool.
struct DispatchJob {
    buf: VirtualBuf,
    remote: SocketAddr,
    channel: UdpChannel,
}

/// Atomic counters over the receive and dispatch paths.
///
/// All counters are monotonic and updated with relaxed ordering; read them
/// for monitoring, not for synchronization.
#[derive(Debug, Default)]
pub struct WorkerStats {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    packets_dispatched: AtomicU64,
    messages_processed: AtomicU64,
    decode_failures: AtomicU64,
    process_failures: AtomicU64,
    backpressure_events: AtomicU64,
    receive_errors: AtomicU64,
}

impl WorkerStats {
    /// Datagrams pulled off the sockets.
    #[must_use]
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Payload bytes pulled off the sockets.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Datagrams handed to the dispatch pool.
    #[must_use]
    pub fn packets_dispatched(&self) -> u64 {
        self.packets_dispatched.load(Ordering::Relaxed)
    }

    /// Messages that completed `Handler::process`.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Datagrams dropped because the codec could not decode them.
    #[must_use]
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Messages whose handler returned an error.
    #[must_use]
    pub fn process_failures(&self) -> u64 {
        self.process_failures.load(Ordering::Relaxed)
    }

    /// Times a driver found the dispatch queue full and paused draining.
    #[must_use]
    pub fn backpressure_events(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }

    /// Socket receive or readiness errors (retried, never fatal).
    #[must_use]
    pub fn receive_errors(&self) -> u64 {
        self.receive_errors.load(Ordering::Relaxed)
    }
}

struct WorkerInner<C, H>
where
    C: Codec,
    H: Handler<Message = C::Message>,
{
    config: TransportConfig,
    codec: C,
    handler: H,
    monitors: Vec<Arc<dyn Monitor>>,
    plugins: Vec<Arc<dyn Plugin<Message = C::Message>>>,
    /// Receive-side buffer arena
    recv_pool: BufferPagePool,
    /// Session reply-buffer arena
    write_pool: BufferPagePool,
    /// Taken at shutdown so the queue closes once drivers drop their clones
    queue_tx: StdMutex<Option<mpsc::Sender<DispatchJob>>>,
    shutdown_tx: broadcast::Sender<()>,
    stats: WorkerStats,
    closed: AtomicBool,
}

impl<C, H> WorkerInner<C, H>
where
    C: Codec,
    H: Handler<Message = C::Message>,
{
    /// Run one datagram through the decode/process/flush cycle.
    ///
    /// The receive lease and the session's reply lease are both recycled on
    /// every exit path: the reply lease on `retire`, the receive lease when
    /// `buf` drops at the end of this function (including unwinds).
    async fn dispatch(&self, job: DispatchJob) {
        let DispatchJob {
            mut buf,
            remote,
            channel,
        } = job;

        let write_buf = match self.write_pool.allocate(self.config.write_buffer_size) {
            Ok(lease) => lease,
            Err(e) => {
                // Unreachable with a validated config; drop the datagram
                error!(error = %e, "reply buffer allocation failed, dropping datagram");
                return;
            }
        };
        let session = UdpSession::new(remote, channel, write_buf);
        let received = buf.remaining();

        for monitor in &self.monitors {
            monitor.before_read(&session);
        }
        for plugin in &self.plugins {
            plugin.before_read(&session);
        }

        while buf.remaining() > 0 {
            let unread = buf.remaining();
            match self.codec.decode(&mut buf, &session) {
                Ok(Some(message)) => {
                    if buf.remaining() == unread {
                        // A codec that consumes nothing would spin here
                        self.report_decode_failure(
                            &session,
                            &TransportError::Decode("codec consumed no bytes".to_string()),
                        );
                        break;
                    }
                    if !self
                        .plugins
                        .iter()
                        .all(|plugin| plugin.preprocess(&session, &message))
                    {
                        // Filtered by a plugin; not an error
                        continue;
                    }
                    if let Err(e) = self.handler.process(&session, message).await {
                        self.stats.process_failures.fetch_add(1, Ordering::Relaxed);
                        self.handler.state_event(
                            Some(&session as &dyn Session),
                            TransportEvent::ProcessFailure,
                            Some(&e),
                        );
                        break;
                    }
                    self.stats.messages_processed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => {
                    self.report_decode_failure(
                        &session,
                        &TransportError::Decode(
                            "datagram did not contain a complete message".to_string(),
                        ),
                    );
                    break;
                }
                Err(e) => {
                    self.report_decode_failure(&session, &e);
                    break;
                }
            }
        }

        for monitor in &self.monitors {
            monitor.after_read(&session, received);
        }
        for plugin in &self.plugins {
            plugin.after_read(&session, received);
        }

        if let Err(e) = session.flush().await {
            if !matches!(e, TransportError::Closed) {
                warn!(remote = %remote, error = %e, "session flush failed");
            }
        }
        session.retire();
        self.handler.state_event(
            Some(&session as &dyn Session),
            TransportEvent::SessionClosed,
            None,
        );

        buf.clean();
    }

    fn report_decode_failure(&self, session: &UdpSession, cause: &TransportError) {
        self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
        debug!(
            remote = %session.remote_addr(),
            error = %cause,
            "decode failed, dropping remainder of datagram"
        );
        self.handler.state_event(
            Some(session as &dyn Session),
            TransportEvent::DecodeFailure,
            Some(cause),
        );
    }
}

/// Drain up to `recv_batch` datagrams from a ready channel.
///
/// Returns `false` when the dispatch queue has closed and the driver should
/// exit. A standby lease is kept pre-allocated one receive ahead so a filled
/// packet is dispatched without waiting on the allocator.
async fn drain_ready<C, H>(
    inner: &Arc<WorkerInner<C, H>>,
    channel: &UdpChannel,
    tx: &mpsc::Sender<DispatchJob>,
    standby: &mut Option<VirtualBuf>,
) -> bool
where
    C: Codec,
    H: Handler<Message = C::Message>,
{
    for _ in 0..inner.config.recv_batch {
        let mut buf = match standby.take() {
            Some(lease) => lease,
            None => match inner.recv_pool.allocate(inner.config.read_buffer_size) {
                Ok(lease) => lease,
                Err(e) => {
                    // Unreachable with a validated config
                    error!(error = %e, "receive buffer allocation failed");
                    return true;
                }
            },
        };

        match channel.try_recv_from(buf.writable()) {
            Ok((len, remote)) => {
                buf.commit(len);
                *standby = inner.recv_pool.allocate(inner.config.read_buffer_size).ok();
                inner.stats.packets_received.fetch_add(1, Ordering::Relaxed);
                inner
                    .stats
                    .bytes_received
                    .fetch_add(len as u64, Ordering::Relaxed);

                let job = DispatchJob {
                    buf,
                    remote,
                    channel: channel.clone(),
                };
                match tx.try_send(job) {
                    Ok(()) => {
                        inner.stats.packets_dispatched.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(job)) => {
                        inner
                            .stats
                            .backpressure_events
                            .fetch_add(1, Ordering::Relaxed);
                        trace!(
                            channel = %channel.local_addr(),
                            "dispatch queue full, pausing channel drain"
                        );
                        // Hold the packet until the pool catches up
                        if tx.send(job).await.is_err() {
                            return false;
                        }
                        inner.stats.packets_dispatched.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Closed(_)) => return false,
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // Socket drained; keep the lease for the next wakeup
                buf.reset();
                *standby = Some(buf);
                return true;
            }
            Err(e) => {
                inner.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                error!(channel = %channel.local_addr(), error = %e, "datagram receive failed");
                buf.reset();
                *standby = Some(buf);
                // A failed receive does not consume readiness, so pace the
                // retry here or a persistent socket error spins the driver
                tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                return true;
            }
        }
    }
    true
}

/// Receive loop for one registered channel.
async fn drive<C, H>(
    inner: Arc<WorkerInner<C, H>>,
    channel: UdpChannel,
    tx: mpsc::Sender<DispatchJob>,
    mut shutdown: broadcast::Receiver<()>,
) where
    C: Codec,
    H: Handler<Message = C::Message>,
{
    debug!(channel = %channel.local_addr(), "channel driver started");
    let mut standby: Option<VirtualBuf> = None;

    loop {
        if inner.closed.load(Ordering::Relaxed) {
            break;
        }
        tokio::select! {
            _ = shutdown.recv() => break,
            ready = channel.readable() => match ready {
                Ok(()) => {
                    if !drain_ready(&inner, &channel, &tx, &mut standby).await {
                        break;
                    }
                }
                Err(TransportError::Closed) => break,
                Err(e) => {
                    inner.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        channel = %channel.local_addr(),
                        error = %e,
                        "readiness wait failed, retrying"
                    );
                    tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                }
            },
        }
    }

    // Standby lease recycles as it drops
    debug!(channel = %channel.local_addr(), "channel driver stopped");
}

/// Builder for a [`Worker`].
///
/// Monitors and plugins are attached here, explicitly and independently of
/// the handler, then `start` spawns the dispatch pool.
pub struct WorkerBuilder<C, H>
where
    C: Codec,
    H: Handler<Message = C::Message>,
{
    config: TransportConfig,
    codec: C,
    handler: H,
    monitors: Vec<Arc<dyn Monitor>>,
    plugins: Vec<Arc<dyn Plugin<Message = C::Message>>>,
}

impl<C, H> WorkerBuilder<C, H>
where
    C: Codec,
    H: Handler<Message = C::Message>,
{
    /// Attach an instrumentation monitor.
    #[must_use]
    pub fn monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// Attach a message-filtering plugin. Plugins also receive the monitor
    /// hooks.
    #[must_use]
    pub fn plugin(mut self, plugin: Arc<dyn Plugin<Message = C::Message>>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Validate the configuration and spawn the dispatch pool.
    ///
    /// Must be called from within a tokio runtime. No channel is serviced
    /// until it is registered with [`Worker::register`].
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] if the configuration fails
    /// validation.
    pub fn start(self) -> TransportResult<Worker<C, H>> {
        self.config.validate()?;

        let workers = if self.config.workers == 0 {
            num_cpus::get()
        } else {
            self.config.workers
        };

        let recv_pool = BufferPagePool::new(
            self.config.read_buffer_size,
            self.config.page_count,
            self.config.slots_per_page,
        );
        let write_pool = BufferPagePool::new(
            self.config.write_buffer_size,
            self.config.page_count,
            self.config.slots_per_page,
        );

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_depth);
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let (shutdown_tx, _) = broadcast::channel(4);

        let inner = Arc::new(WorkerInner {
            config: self.config,
            codec: self.codec,
            handler: self.handler,
            monitors: self.monitors,
            plugins: self.plugins,
            recv_pool,
            write_pool,
            queue_tx: StdMutex::new(Some(queue_tx)),
            shutdown_tx,
            stats: WorkerStats::default(),
            closed: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let inner = Arc::clone(&inner);
            let queue_rx = Arc::clone(&queue_rx);
            handles.push(tokio::spawn(async move {
                loop {
                    // Lock is held only while waiting for the next job
                    let job = { queue_rx.lock().await.recv().await };
                    match job {
                        Some(job) => inner.dispatch(job).await,
                        None => break,
                    }
                }
                trace!(worker = id, "dispatch worker exited");
            }));
        }
        debug!(workers, "transport worker started");

        Ok(Worker {
            inner,
            handles: StdMutex::new(handles),
        })
    }
}

/// The transport engine.
///
/// Owns a dispatch pool of `workers` tasks plus one driver task per
/// registered channel. Construction follows the builder: configuration,
/// codec, and handler are fixed up front; channels are registered while the
/// worker runs.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use packetbus_core::{Codec, Handler, Session, TransportConfig, TransportResult, VirtualBuf};
/// use packetbus_transport::{UdpChannel, Worker};
///
/// struct RawCodec;
///
/// impl Codec for RawCodec {
///     type Message = Vec<u8>;
///     fn decode(
///         &self,
///         buf: &mut VirtualBuf,
///         _session: &dyn Session,
///     ) -> TransportResult<Option<Vec<u8>>> {
///         let bytes = buf.chunk().to_vec();
///         buf.advance(bytes.len());
///         Ok(Some(bytes))
///     }
/// }
///
/// struct EchoHandler;
///
/// #[async_trait::async_trait]
/// impl Handler for EchoHandler {
///     type Message = Vec<u8>;
///     async fn process(&self, session: &dyn Session, message: Vec<u8>) -> TransportResult<()> {
///         session.write(&message)
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TransportConfig::default();
/// let channel = UdpChannel::bind("127.0.0.1:0".parse()?, &config)?;
/// let worker = Worker::builder(config, RawCodec, EchoHandler).start()?;
/// worker.register(channel)?;
/// // ... serve traffic ...
/// worker.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct Worker<C, H>
where
    C: Codec,
    H: Handler<Message = C::Message>,
{
    inner: Arc<WorkerInner<C, H>>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl<C, H> Worker<C, H>
where
    C: Codec,
    H: Handler<Message = C::Message>,
{
    /// Start building a worker from its three fixed parts.
    pub fn builder(config: TransportConfig, codec: C, handler: H) -> WorkerBuilder<C, H> {
        WorkerBuilder {
            config,
            codec,
            handler,
            monitors: Vec::new(),
            plugins: Vec::new(),
        }
    }

    /// Register a channel and start servicing it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// The channel's driver task is live when this returns: a datagram sent
    /// to the channel after `register` returns will be observed (the kernel
    /// queues anything that arrives before the first readiness poll).
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] after `shutdown`.
    pub fn register(&self, channel: UdpChannel) -> TransportResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let tx = self
            .lock_queue_tx()
            .as_ref()
            .cloned()
            .ok_or(TransportError::Closed)?;
        let shutdown_rx = self.inner.shutdown_tx.subscribe();

        debug!(channel = %channel.local_addr(), "registering channel");
        let handle = tokio::spawn(drive(Arc::clone(&self.inner), channel, tx, shutdown_rx));
        self.lock_handles().push(handle);
        Ok(())
    }

    /// Shut the worker down and wait for its tasks to finish.
    ///
    /// Drivers stop draining immediately; jobs already in the dispatch queue
    /// are completed (including their reply flushes) before the dispatch
    /// tasks exit. Idempotent - concurrent and repeated calls return `Ok`
    /// without re-running the teardown.
    ///
    /// # Errors
    /// Currently infallible; the `Result` keeps the signature stable for
    /// future teardown diagnostics.
    pub async fn shutdown(&self) -> TransportResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("transport worker shutting down");

        // Wake every driver, then let the queue close as their senders drop
        let _ = self.inner.shutdown_tx.send(());
        self.lock_queue_tx().take();

        let handles = std::mem::take(&mut *self.lock_handles());
        for handle in handles {
            let _ = handle.await;
        }
        debug!("transport worker stopped");
        Ok(())
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Counters over the receive and dispatch paths.
    #[must_use]
    pub fn stats(&self) -> &WorkerStats {
        &self.inner.stats
    }

    /// The receive-side buffer pool, for utilization monitoring.
    #[must_use]
    pub fn recv_pool(&self) -> &BufferPagePool {
        &self.inner.recv_pool
    }

    /// The reply-side buffer pool, for utilization monitoring.
    #[must_use]
    pub fn write_pool(&self) -> &BufferPagePool {
        &self.inner.write_pool
    }

    fn lock_queue_tx(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<DispatchJob>>> {
        self.inner
            .queue_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C, H> std::fmt::Debug for Worker<C, H>
where
    C: Codec,
    H: Handler<Message = C::Message>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("closed", &self.is_closed())
            .field("stats", &self.inner.stats)
            .finish()
    }
}

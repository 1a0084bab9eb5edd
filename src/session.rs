use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time as tokio_time;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConnectOptions, OverflowPolicy};
use crate::connection::{self, ConnectionInfo, ReadHalf, WriteHalf};
use crate::frame::{Command, LineCodec};
use crate::object::{DemodMode, ObjectGraph};
use crate::reply::{Reply, ReplyRegistry};
use crate::status::{RadioMessage, StatusRouter};
use crate::udp::{StreamChannels, VitaSocketPool};
use crate::util;
use crate::vita::{AudioFrame, FftFrame, MeterSample, WaterfallFrame};
use crate::{FlexError, FlexResult};

/// Port the radio sources its VITA stream traffic from; NAT keep-alives
/// are addressed here.
const RADIO_STREAM_PORT: u16 = 4993;

/// Cadence of the reply-registry timeout sweep.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(250);

/// Queue depth of the command writer.
const WRITER_QUEUE_CAPACITY: usize = 64;

const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Background counters a session maintains; none of these are errors.
#[derive(Debug, Default)]
pub struct SessionCounters {
    orphan_packets: AtomicU64,
    lost_packets: AtomicU64,
    malformed_packets: AtomicU64,
    dropped_frames: AtomicU64,
}

impl SessionCounters {
    /// Stream packets whose stream id had no object-graph entry.
    pub fn orphan_packets(&self) -> u64 {
        self.orphan_packets.load(Ordering::Relaxed)
    }

    /// Gaps detected in the mod-16 packet counters.
    pub fn lost_packets(&self) -> u64 {
        self.lost_packets.load(Ordering::Relaxed)
    }

    pub fn malformed_packets(&self) -> u64 {
        self.malformed_packets.load(Ordering::Relaxed)
    }

    /// Audio frames dropped on the consumer sink.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_orphan_packets(&self) {
        self.orphan_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_lost_packets(&self) {
        self.lost_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_malformed_packets(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_dropped_frames(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared by the session handle and its tasks. Teardown runs exactly
/// once, whether triggered by `close()` or by a transport failure.
#[derive(Debug)]
struct Shared {
    graph: ObjectGraph,
    registry: Arc<ReplyRegistry>,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Shared {
    fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.state.send(SessionState::Closing);
        self.cancel.cancel();
        self.registry.fail_all();
        self.graph.clear();
        let _ = self.state.send(SessionState::Disconnected);
        info!("session closed");
    }
}

/// A connected radio session: the command channel, the status-driven
/// object graph and the VITA stream plane for a single radio.
#[derive(Debug)]
pub struct RadioSession {
    shared: Arc<Shared>,
    counters: Arc<SessionCounters>,
    seq: AtomicU32,
    send_lock: tokio::sync::Mutex<()>,
    handle: u32,
    version: Option<String>,
    writer: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    messages: broadcast::Sender<RadioMessage>,
    streams: StreamChannels,
    audio_sink: Arc<tokio::sync::Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    overflow_policy: OverflowPolicy,
}

impl RadioSession {
    /// Connects to a radio, completes the handshake, subscribes to status
    /// for every object type and brings up the stream plane.
    #[instrument(skip(connection_info, options), fields(addr = %connection_info.addr))]
    pub(crate) async fn establish(
        connection_info: &ConnectionInfo,
        options: &ConnectOptions,
    ) -> FlexResult<Self> {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

        let established = connection::connect(connection_info, options).await?;
        let handle = established.handle;
        let version = established.version;
        let radio_ip = established.peer_addr.ip();

        let graph = ObjectGraph::new();
        let registry = Arc::new(ReplyRegistry::new(Duration::from_millis(u64::from(
            options.reply_timeout_ms,
        ))));
        let counters = Arc::new(SessionCounters::default());
        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            graph: graph.clone(),
            registry: registry.clone(),
            state: state_tx,
            cancel: cancel.clone(),
            closed: AtomicBool::new(false),
        });

        // stream plane
        let pool = VitaSocketPool::bind(options.local_bind_ip).await?;
        let ports = pool.local_ports()?;
        let streams = pool.channels.clone();
        let audio_sink = pool.audio_sink();
        pool.spawn(
            graph.clone(),
            counters.clone(),
            SocketAddr::new(radio_ip, RADIO_STREAM_PORT),
            handle,
            options.stream_overflow_policy,
            cancel.clone(),
        );

        // command writer
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_QUEUE_CAPACITY);
        tokio::spawn(run_writer(established.write, writer_rx, shared.clone()));

        // reader / status router
        let router = StatusRouter::new(graph.clone(), registry.clone(), messages.clone());
        tokio::spawn(run_reader(established.read, router, shared.clone()));

        // housekeeping
        tokio::spawn(run_housekeeping(registry.clone(), cancel.clone()));

        let session = Self {
            shared,
            counters,
            seq: AtomicU32::new(1),
            send_lock: tokio::sync::Mutex::new(()),
            handle,
            version,
            writer: writer_tx,
            state: state_rx,
            messages,
            streams,
            audio_sink,
            overflow_policy: options.stream_overflow_policy,
        };

        session.announce(connection_info, &ports).await?;
        let _ = session.shared.state.send(SessionState::Connected);
        Ok(session)
    }

    /// Startup chatter: station name, status subscriptions, stream ports.
    async fn announce(&self, connection_info: &ConnectionInfo, ports: &[u16]) -> FlexResult<()> {
        if let Some(station) = &connection_info.station {
            self.send(&format!("client station {}", util::escape_spaces(station)))
                .await?;
        }
        for object_type in [
            "slice",
            "pan",
            "waterfall",
            "meter",
            "audio_stream",
            "usb_cable",
            "memories",
        ] {
            self.send(&format!("sub {} all", object_type)).await?;
        }
        for port in ports {
            self.send(&format!("client udp_register port={}", port))
                .await?;
        }
        Ok(())
    }

    /// Assigns the next sequence number and enqueues the command. The lock
    /// keeps sequence order and queue order identical under concurrent
    /// senders.
    async fn enqueue(&self, body: &str, sink: Option<crate::reply::ReplySink>) -> FlexResult<u32> {
        let guard = self.send_lock.lock().await;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let cmd = Command::new(seq, body)?;
        // registration precedes the send so the reply can never race it
        if let Some(sink) = sink {
            self.shared.registry.register(seq, sink);
        }
        let sent = self.writer.send(cmd).await;
        drop(guard);

        if sent.is_err() {
            self.shared.registry.cancel(seq);
            return Err(FlexError::Disconnected);
        }
        Ok(seq)
    }

    /// Sends a command without waiting for its reply; returns the assigned
    /// sequence number.
    pub async fn send(&self, body: &str) -> FlexResult<u32> {
        self.enqueue(body, None).await
    }

    /// Sends a command and resolves with its reply. Non-zero status codes
    /// surface as `FlexError::Command`; a missing reply as `Timeout`.
    pub async fn send_with_reply(&self, body: &str) -> FlexResult<Reply> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(body, Some(tx)).await?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(FlexError::Disconnected),
        }
    }

    /// Tunes a slice. The object graph changes only once the radio
    /// confirms with a status update.
    pub async fn slice_tune(&self, index: u32, freq_mhz: f64) -> FlexResult<Reply> {
        self.send_with_reply(&format!(
            "slice tune {} {}",
            index,
            util::format_freq_mhz(freq_mhz)
        ))
        .await
    }

    pub async fn slice_set_mode(&self, index: u32, mode: DemodMode) -> FlexResult<Reply> {
        self.send_with_reply(&format!("slice set {} mode={}", index, mode))
            .await
    }

    pub async fn audio_stream_gain(&self, stream_id: u32, gain: u8) -> FlexResult<Reply> {
        self.send_with_reply(&format!(
            "audio_stream {:#x} gain {}",
            stream_id,
            gain.min(100)
        ))
        .await
    }

    /// The handle the radio assigned to this client.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// The radio's software version banner, if it sent one.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.shared.graph
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// Replies that arrived with no registered sink.
    pub fn unroutable_replies(&self) -> u64 {
        self.shared.registry.unroutable_replies()
    }

    /// Watches the session state machine. The terminal transition to
    /// `Disconnected` fires exactly once.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Subscribes to radio log messages.
    pub fn messages(&self) -> broadcast::Receiver<RadioMessage> {
        self.messages.subscribe()
    }

    pub fn subscribe_fft(&self) -> broadcast::Receiver<FftFrame> {
        self.streams.fft.subscribe()
    }

    pub fn subscribe_waterfall(&self) -> broadcast::Receiver<WaterfallFrame> {
        self.streams.waterfall.subscribe()
    }

    pub fn subscribe_meters(&self) -> broadcast::Receiver<MeterSample> {
        self.streams.meter.subscribe()
    }

    /// Registers the consumer audio sink. Audio frames block the receiver
    /// or drop according to the configured overflow policy.
    pub async fn set_audio_sink(&self, sink: mpsc::Sender<AudioFrame>) {
        debug!(policy = ?self.overflow_policy, "registering audio sink");
        self.audio_sink.lock().await.replace(sink);
    }

    /// Closes the session: cancels every task, fails outstanding replies
    /// with `Disconnected` and empties the object graph.
    pub async fn close(&self) {
        self.shared.teardown();
    }
}

impl Drop for RadioSession {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

async fn run_writer(
    mut write: tokio::io::BufWriter<WriteHalf>,
    mut queue: mpsc::Receiver<Command>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                // drain what was queued before the close
                while let Ok(cmd) = queue.try_recv() {
                    if write_command(&mut write, &cmd).await.is_err() {
                        break;
                    }
                }
                break;
            }
            cmd = queue.recv() => match cmd {
                Some(cmd) => {
                    if let Err(e) = write_command(&mut write, &cmd).await {
                        warn!("command write failed: {}", e);
                        shared.teardown();
                        break;
                    }
                }
                None => break,
            }
        }
    }
    let _ = write.shutdown().await;
    debug!("command writer stopped");
}

async fn write_command(
    write: &mut tokio::io::BufWriter<WriteHalf>,
    cmd: &Command,
) -> std::io::Result<()> {
    debug!("sending command: '{}'", cmd);
    write.write_all(format!("{}\n", cmd).as_bytes()).await?;
    write.flush().await
}

async fn run_reader(
    mut read: FramedRead<ReadHalf, LineCodec>,
    router: StatusRouter,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            line = read.next() => match line {
                Some(Ok(line)) => router.route(line),
                Some(Err(e)) => {
                    warn!("command channel failed: {}", e);
                    shared.teardown();
                    break;
                }
                None => {
                    info!("radio closed the command channel");
                    shared.teardown();
                    break;
                }
            }
        }
    }
    debug!("command reader stopped");
}

async fn run_housekeeping(registry: Arc<ReplyRegistry>, cancel: CancellationToken) {
    let mut ticks = IntervalStream::new(tokio_time::interval(HOUSEKEEPING_INTERVAL));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.next() => registry.sweep(Instant::now()),
        }
    }
}

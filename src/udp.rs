use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time as tokio_time;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::OverflowPolicy;
use crate::object::ObjectGraph;
use crate::session::SessionCounters;
use crate::vita::fft::FftDecoder;
use crate::vita::waterfall::WaterfallDecoder;
use crate::vita::{audio, meter, AudioFrame, FftFrame, MeterSample, PacketClass, VitaPacket, WaterfallFrame};
use crate::{FlexResult, MAX_VITA_PACKET_SIZE};

/// Cadence of the NAT keep-alive packets each stream socket sends.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Kernel receive buffer requested per UDP socket. Spectrum, waterfall and
/// meter traffic bursts well past the default; the radio side assumes at
/// least 750 KiB of buffering.
pub(crate) const UDP_RECV_BUFFER_SIZE: usize = 768 * 1024;

/// Binds a UDP socket with an enlarged kernel receive buffer. The kernel
/// may cap the requested size; that is not an error.
pub(crate) fn bind_udp_socket(addr: SocketAddr) -> FlexResult<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    socket.set_recv_buffer_size(UDP_RECV_BUFFER_SIZE)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Capacity of the spectrum/waterfall/meter fan-out channels. These are
/// rings: a lagging subscriber loses the oldest records, never the newest.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// The UDP stream families a session binds one socket each for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamFamily {
    Fft,
    Waterfall,
    Meter,
    Audio,
}

const ALL_FAMILIES: [StreamFamily; 4] = [
    StreamFamily::Fft,
    StreamFamily::Waterfall,
    StreamFamily::Meter,
    StreamFamily::Audio,
];

/// Fan-out endpoints for decoded stream records.
#[derive(Debug, Clone)]
pub(crate) struct StreamChannels {
    pub fft: broadcast::Sender<FftFrame>,
    pub waterfall: broadcast::Sender<WaterfallFrame>,
    pub meter: broadcast::Sender<MeterSample>,
}

impl Default for StreamChannels {
    fn default() -> Self {
        Self {
            fft: broadcast::channel(STREAM_CHANNEL_CAPACITY).0,
            waterfall: broadcast::channel(STREAM_CHANNEL_CAPACITY).0,
            meter: broadcast::channel(STREAM_CHANNEL_CAPACITY).0,
        }
    }
}

type AudioSink = Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>;

/// One receive socket per stream family, bound to ephemeral ports that get
/// advertised to the radio over the command channel.
#[derive(Debug)]
pub(crate) struct VitaSocketPool {
    sockets: Vec<(StreamFamily, UdpSocket)>,
    pub(crate) channels: StreamChannels,
    audio_sink: AudioSink,
}

impl VitaSocketPool {
    /// Binds one socket per family. `local_ip` forces the source address
    /// for WAN deployments; the default is the wildcard address.
    pub async fn bind(local_ip: Option<IpAddr>) -> FlexResult<Self> {
        let bind_ip = local_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let mut sockets = Vec::with_capacity(ALL_FAMILIES.len());
        for family in ALL_FAMILIES {
            let socket = bind_udp_socket(SocketAddr::new(bind_ip, 0))?;
            debug!(?family, port = socket.local_addr()?.port(), "bound stream socket");
            sockets.push((family, socket));
        }

        Ok(Self {
            sockets,
            channels: StreamChannels::default(),
            audio_sink: Arc::new(Mutex::new(None)),
        })
    }

    /// The local ports to advertise via `client udp_register`.
    pub fn local_ports(&self) -> FlexResult<Vec<u16>> {
        self.sockets
            .iter()
            .map(|(_, socket)| Ok(socket.local_addr()?.port()))
            .collect()
    }

    /// Registers the consumer audio sink. Replacing the sink drops the
    /// previous one.
    pub fn audio_sink(&self) -> AudioSink {
        self.audio_sink.clone()
    }

    /// Consumes the pool and spawns one receiver task per socket. Tasks
    /// run until `cancel` fires and release their sockets on exit.
    pub fn spawn(
        self,
        graph: ObjectGraph,
        counters: Arc<SessionCounters>,
        radio_addr: SocketAddr,
        client_handle: u32,
        overflow_policy: OverflowPolicy,
        cancel: CancellationToken,
    ) {
        for (family, socket) in self.sockets {
            let receiver = StreamReceiver {
                family,
                graph: graph.clone(),
                counters: counters.clone(),
                channels: self.channels.clone(),
                audio_sink: self.audio_sink.clone(),
                overflow_policy,
                fft: FftDecoder::default(),
                waterfall: WaterfallDecoder::default(),
                last_counts: HashMap::new(),
            };
            tokio::spawn(receiver.run(socket, radio_addr, client_handle, cancel.clone()));
        }
    }
}

struct StreamReceiver {
    family: StreamFamily,
    graph: ObjectGraph,
    counters: Arc<SessionCounters>,
    channels: StreamChannels,
    audio_sink: AudioSink,
    overflow_policy: OverflowPolicy,
    fft: FftDecoder,
    waterfall: WaterfallDecoder,
    /// Last seen mod-16 packet counter per stream id, for loss detection.
    last_counts: HashMap<u32, u8>,
}

impl StreamReceiver {
    async fn run(
        mut self,
        socket: UdpSocket,
        radio_addr: SocketAddr,
        client_handle: u32,
        cancel: CancellationToken,
    ) {
        let mut buf = vec![0u8; MAX_VITA_PACKET_SIZE];
        let keep_alive = VitaPacket::keep_alive(client_handle).encode();
        let mut ticks = IntervalStream::new(tokio_time::interval(KEEP_ALIVE_INTERVAL));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.next() => {
                    if let Err(e) = socket.send_to(&keep_alive, radio_addr).await {
                        debug!(family = ?self.family, "keep-alive send failed: {}", e);
                    }
                    let now = Instant::now();
                    self.fft.sweep(now);
                    self.waterfall.sweep(now);
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, _from)) => self.dispatch(&buf[..len]).await,
                        Err(e) => {
                            warn!(family = ?self.family, "stream socket receive failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }
        debug!(family = ?self.family, "stream receiver stopped");
    }

    async fn dispatch(&mut self, datagram: &[u8]) {
        let packet = match VitaPacket::parse(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.counters.inc_malformed_packets();
                trace!(family = ?self.family, "dropping malformed packet: {}", e);
                return;
            }
        };

        if let Some(stream_id) = packet.stream_id {
            self.detect_gap(stream_id, packet.count);
        }

        let class = packet
            .class_id
            .map(|c| c.packet_class)
            .unwrap_or(PacketClass::Unknown(0));
        let now = Instant::now();

        match class {
            PacketClass::Fft => {
                if !self.stream_known(&packet) {
                    return;
                }
                match self.fft.decode(&packet, now) {
                    Ok(Some(frame)) => {
                        let _ = self.channels.fft.send(frame);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.counters.inc_malformed_packets();
                        trace!("dropping FFT packet: {}", e);
                    }
                }
            }
            PacketClass::Waterfall => {
                if !self.stream_known(&packet) {
                    return;
                }
                match self.waterfall.decode(&packet, now) {
                    Ok(Some(frame)) => {
                        let _ = self.channels.waterfall.send(frame);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.counters.inc_malformed_packets();
                        trace!("dropping waterfall packet: {}", e);
                    }
                }
            }
            PacketClass::Meter => match meter::parse_pairs(&packet.payload) {
                Ok(pairs) => {
                    for (index, raw) in pairs {
                        // meters without a definition yet cannot be scaled
                        let Some(value) = self.graph.scale_meter_sample(index, raw) else {
                            continue;
                        };
                        self.graph.record_meter_sample(index, value);
                        let _ = self.channels.meter.send(MeterSample {
                            index,
                            value,
                            timestamp: now,
                        });
                    }
                }
                Err(e) => {
                    self.counters.inc_malformed_packets();
                    trace!("dropping meter packet: {}", e);
                }
            },
            PacketClass::DaxAudio => {
                if !self.stream_known(&packet) {
                    return;
                }
                let stream_id = packet.stream_id.unwrap_or_default();
                match audio::parse_pcm(&packet.payload) {
                    Ok(samples) => {
                        self.deliver_audio(AudioFrame::Pcm { stream_id, samples }).await
                    }
                    Err(e) => {
                        self.counters.inc_malformed_packets();
                        trace!("dropping PCM packet: {}", e);
                    }
                }
            }
            PacketClass::Opus => {
                if !self.stream_known(&packet) {
                    return;
                }
                let stream_id = packet.stream_id.unwrap_or_default();
                self.deliver_audio(AudioFrame::Opus {
                    stream_id,
                    data: packet.payload.clone(),
                })
                .await;
            }
            other => {
                trace!(family = ?self.family, "dropping packet of class {:?}", other);
            }
        }
    }

    /// Stream-id ownership gate: packets for streams the object graph does
    /// not know yet are orphans and must not mutate state.
    fn stream_known(&self, packet: &VitaPacket) -> bool {
        let Some(stream_id) = packet.stream_id else {
            self.counters.inc_orphan_packets();
            return false;
        };
        if self.graph.owns_stream(stream_id) {
            true
        } else {
            self.counters.inc_orphan_packets();
            trace!("dropping packet for unknown stream {:#x}", stream_id);
            false
        }
    }

    fn detect_gap(&mut self, stream_id: u32, count: u8) {
        if let Some(last) = self.last_counts.insert(stream_id, count) {
            let expected = (last + 1) & 0x0f;
            if count != expected {
                self.counters.inc_lost_packets();
                debug!(
                    expected,
                    got = count,
                    "packet counter gap on stream {:#x}", stream_id
                );
            }
        }
    }

    async fn deliver_audio(&self, frame: AudioFrame) {
        let mut sink = self.audio_sink.lock().await;
        let Some(sender) = sink.as_ref() else {
            self.counters.inc_dropped_frames();
            return;
        };

        match self.overflow_policy {
            OverflowPolicy::Block => {
                if sender.send(frame).await.is_err() {
                    sink.take();
                    self.counters.inc_dropped_frames();
                }
            }
            OverflowPolicy::DropOldest => match sender.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.counters.inc_dropped_frames();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    sink.take();
                    self.counters.inc_dropped_frames();
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::vita::{fft, meter as vita_meter};

    use pretty_assertions::assert_eq;

    async fn pool_fixture(
        graph: &ObjectGraph,
        policy: OverflowPolicy,
    ) -> (
        Vec<u16>,
        StreamChannels,
        AudioSink,
        Arc<SessionCounters>,
        CancellationToken,
        UdpSocket,
    ) {
        let pool = VitaSocketPool::bind(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)))
            .await
            .unwrap();
        let ports = pool.local_ports().unwrap();
        let channels = pool.channels.clone();
        let audio_sink = pool.audio_sink();
        let counters = Arc::new(SessionCounters::default());
        let cancel = CancellationToken::new();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let radio_addr = sender.local_addr().unwrap();
        pool.spawn(
            graph.clone(),
            counters.clone(),
            radio_addr,
            0x2c87a31,
            policy,
            cancel.clone(),
        );

        (ports, channels, audio_sink, counters, cancel, sender)
    }

    fn fft_port(ports: &[u16]) -> u16 {
        ports[0]
    }

    fn meter_port(ports: &[u16]) -> u16 {
        ports[2]
    }

    fn audio_port(ports: &[u16]) -> u16 {
        ports[3]
    }

    #[tokio::test]
    async fn reassembled_fft_frames_reach_subscribers() {
        let graph = ObjectGraph::new();
        graph.apply_panadapter(0x4000_0001, &[]);

        let (ports, channels, _, _, cancel, sender) =
            pool_fixture(&graph, OverflowPolicy::DropOldest).await;
        let mut frames = channels.fft.subscribe();
        let dest = (Ipv4Addr::LOCALHOST, fft_port(&ports));

        let a = VitaPacket::data(
            PacketClass::Fft,
            0x4000_0001,
            0,
            fft::encode_fragment(0, 1024, 7, &vec![-100i16; 512]),
        );
        let b = VitaPacket::data(
            PacketClass::Fft,
            0x4000_0001,
            1,
            fft::encode_fragment(512, 1024, 7, &vec![-90i16; 512]),
        );
        sender.send_to(&a.encode(), dest).await.unwrap();
        sender.send_to(&b.encode(), dest).await.unwrap();

        let frame = tokio_time::timeout(Duration::from_secs(2), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.bins.len(), 1024);
        assert_eq!(frame.timestamp, 7);
        cancel.cancel();
    }

    #[tokio::test]
    async fn unknown_stream_ids_count_orphans() {
        let graph = ObjectGraph::new();
        let (ports, _, _, counters, cancel, sender) =
            pool_fixture(&graph, OverflowPolicy::DropOldest).await;

        let packet = VitaPacket::data(
            PacketClass::Fft,
            0xdead_beef,
            0,
            fft::encode_fragment(0, 4, 1, &[0i16; 4]),
        );
        sender
            .send_to(&packet.encode(), (Ipv4Addr::LOCALHOST, fft_port(&ports)))
            .await
            .unwrap();

        tokio_time::timeout(Duration::from_secs(2), async {
            while counters.orphan_packets() == 0 {
                tokio_time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(counters.orphan_packets(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn meter_samples_are_scaled_and_recorded() {
        let graph = ObjectGraph::new();
        graph.apply_meter(
            3,
            &[
                ("nam".to_string(), "PATEMP".to_string()),
                ("unit".to_string(), "degc".to_string()),
            ],
        );

        let (ports, channels, _, _, cancel, sender) =
            pool_fixture(&graph, OverflowPolicy::DropOldest).await;
        let mut samples = channels.meter.subscribe();

        let packet = VitaPacket::data(
            PacketClass::Meter,
            0x700,
            0,
            vita_meter::encode_pairs(&[(3, 2560)]),
        );
        sender
            .send_to(&packet.encode(), (Ipv4Addr::LOCALHOST, meter_port(&ports)))
            .await
            .unwrap();

        let sample = tokio_time::timeout(Duration::from_secs(2), samples.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sample.index, 3);
        assert_eq!(sample.value, 40.0);
        assert_eq!(graph.meter(3).unwrap().value, 40.0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn audio_frames_reach_the_registered_sink() {
        let graph = ObjectGraph::new();
        graph.apply_audio_stream(0x0300_0001, &[]);

        let (ports, _, audio_sink, _, cancel, sender) =
            pool_fixture(&graph, OverflowPolicy::Block).await;
        let (tx, mut rx) = mpsc::channel(4);
        audio_sink.lock().await.replace(tx);

        let mut payload = Vec::new();
        for sample in [0.25f32, -0.25] {
            payload.extend_from_slice(&sample.to_be_bytes());
        }
        let packet = VitaPacket::data(
            PacketClass::DaxAudio,
            0x0300_0001,
            0,
            payload.into(),
        );
        sender
            .send_to(&packet.encode(), (Ipv4Addr::LOCALHOST, audio_port(&ports)))
            .await
            .unwrap();

        let frame = tokio_time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            frame,
            AudioFrame::Pcm {
                stream_id: 0x0300_0001,
                samples: vec![0.25, -0.25]
            }
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn counter_wrap_is_not_a_gap() {
        let graph = ObjectGraph::new();
        graph.apply_panadapter(1, &[]);
        let (ports, channels, _, counters, cancel, sender) =
            pool_fixture(&graph, OverflowPolicy::DropOldest).await;
        let mut frames = channels.fft.subscribe();
        let dest = (Ipv4Addr::LOCALHOST, fft_port(&ports));

        for (count, ts) in [(15u8, 1u32), (0, 2), (2, 3)] {
            let packet = VitaPacket::data(
                PacketClass::Fft,
                1,
                count,
                fft::encode_fragment(0, 2, ts, &[0i16; 2]),
            );
            sender.send_to(&packet.encode(), dest).await.unwrap();
        }

        for _ in 0..3 {
            tokio_time::timeout(Duration::from_secs(2), frames.recv())
                .await
                .unwrap()
                .unwrap();
        }
        // 15 -> 0 wraps cleanly, 0 -> 2 skips one
        assert_eq!(counters.lost_packets(), 1);
        cancel.cancel();
    }
}

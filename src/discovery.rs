use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time as tokio_time;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectOptions;
use crate::vita::{parse_discovery_payload, PacketClass, VitaPacket};
use crate::{FlexError, FlexResult, DEFAULT_PORT, MAX_VITA_PACKET_SIZE};

/// Cadence of the staleness sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A radio visible on the LAN, materialized from its discovery beacons.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioInfo {
    /// Stable identifier: the radio's serial number.
    pub serial: String,
    pub model: String,
    pub version: String,
    pub ip: IpAddr,
    pub port: u16,
    pub nickname: String,
    pub callsign: String,
    /// Beacon keys with no dedicated field.
    pub capabilities: HashMap<String, String>,
    pub last_seen: Instant,
}

impl RadioInfo {
    /// The command-channel endpoint this radio advertises.
    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Lifecycle events of the discovered-radio set.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    Discovered(RadioInfo),
    Updated(RadioInfo),
    Lost(RadioInfo),
}

/// LAN discovery service: a VITA-parsing UDP listener that maintains a
/// live set of reachable radios and evicts the ones that stop beaconing.
#[derive(Debug)]
pub struct Discovery {
    radios: Arc<Mutex<HashMap<String, RadioInfo>>>,
    events: broadcast::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
    local_addr: SocketAddr,
}

impl Discovery {
    /// Binds the LAN broadcast port and starts listening for beacons.
    pub async fn start(options: &ConnectOptions) -> FlexResult<Self> {
        let ttl = Duration::from_millis(u64::from(options.discovery_timeout_ms));
        Self::start_on(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            ttl,
        )
        .await
    }

    pub(crate) async fn start_on(addr: SocketAddr, ttl: Duration) -> FlexResult<Self> {
        let socket = crate::udp::bind_udp_socket(addr)?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;
        info!("discovery listening on {}", local_addr);

        let radios: Arc<Mutex<HashMap<String, RadioInfo>>> = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let listener = Listener {
            radios: radios.clone(),
            events: events.clone(),
            ttl,
        };
        tokio::spawn(listener.run(socket, cancel.clone()));

        Ok(Self {
            radios,
            events,
            cancel,
            local_addr,
        })
    }

    /// Snapshot of the currently visible radios.
    pub fn radios(&self) -> Vec<RadioInfo> {
        self.radios.lock().unwrap().values().cloned().collect()
    }

    pub fn radio(&self, serial: &str) -> Option<RadioInfo> {
        self.radios.lock().unwrap().get(serial).cloned()
    }

    /// Subscribes to discovery lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Waits until a radio with the given serial shows up.
    pub async fn wait_for(&self, serial: &str, timeout: Duration) -> FlexResult<RadioInfo> {
        let mut events = self.events();
        if let Some(radio) = self.radio(serial) {
            return Ok(radio);
        }

        let deadline = tokio_time::Instant::now() + timeout;
        loop {
            let event = tokio_time::timeout_at(deadline, events.recv())
                .await
                .map_err(|_| FlexError::Timeout)?;
            match event {
                Ok(DiscoveryEvent::Discovered(radio) | DiscoveryEvent::Updated(radio))
                    if radio.serial == serial =>
                {
                    return Ok(radio)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if let Some(radio) = self.radio(serial) {
                        return Ok(radio);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(FlexError::Disconnected)
                }
            }
        }
    }

    /// Stops the listener task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// The address the discovery socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Listener {
    radios: Arc<Mutex<HashMap<String, RadioInfo>>>,
    events: broadcast::Sender<DiscoveryEvent>,
    ttl: Duration,
}

impl Listener {
    async fn run(self, socket: UdpSocket, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_VITA_PACKET_SIZE];
        let mut ticks = IntervalStream::new(tokio_time::interval(SWEEP_INTERVAL));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.next() => self.sweep(Instant::now()),
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => self.handle_beacon(&buf[..len], from),
                        Err(e) => {
                            warn!("discovery socket receive failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }
        debug!("discovery listener stopped");
    }

    fn handle_beacon(&self, datagram: &[u8], from: SocketAddr) {
        let packet = match VitaPacket::parse(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("ignoring non-VITA datagram from {}: {}", from, e);
                return;
            }
        };
        if packet.class_id.map(|c| c.packet_class) != Some(PacketClass::Discovery) {
            trace!("ignoring non-discovery packet from {}", from);
            return;
        }
        let fields = match parse_discovery_payload(&packet.payload) {
            Ok(fields) => fields,
            Err(e) => {
                debug!("ignoring unreadable beacon from {}: {}", from, e);
                return;
            }
        };

        let now = Instant::now();
        let mut serial = String::new();
        let mut model = String::new();
        let mut version = String::new();
        let mut ip = from.ip();
        let mut port = DEFAULT_PORT;
        let mut nickname = String::new();
        let mut callsign = String::new();
        let mut capabilities = HashMap::new();

        for (key, value) in fields {
            match key.as_str() {
                "serial" => serial = value,
                "model" => model = value,
                "version" => version = value,
                "ip" => match value.parse::<IpAddr>() {
                    Ok(parsed) => ip = parsed,
                    Err(_) => debug!("beacon from {} carries bad ip: {}", from, value),
                },
                "port" => match value.parse::<u16>() {
                    Ok(parsed) => port = parsed,
                    Err(_) => debug!("beacon from {} carries bad port: {}", from, value),
                },
                "nickname" => nickname = value,
                "callsign" => callsign = value,
                _ => {
                    capabilities.insert(key, value);
                }
            }
        }

        if serial.is_empty() {
            debug!("ignoring beacon without serial from {}", from);
            return;
        }

        let radio = RadioInfo {
            serial: serial.clone(),
            model,
            version,
            ip,
            port,
            nickname,
            callsign,
            capabilities,
            last_seen: now,
        };

        let known = self
            .radios
            .lock()
            .unwrap()
            .insert(serial.clone(), radio.clone())
            .is_some();
        if known {
            let _ = self.events.send(DiscoveryEvent::Updated(radio));
        } else {
            info!("discovered radio {} ({}) at {}", serial, radio.model, radio.command_addr());
            let _ = self.events.send(DiscoveryEvent::Discovered(radio));
        }
    }

    fn sweep(&self, now: Instant) {
        let lost: Vec<RadioInfo> = {
            let mut radios = self.radios.lock().unwrap();
            let stale: Vec<String> = radios
                .iter()
                .filter(|(_, radio)| now.duration_since(radio.last_seen) >= self.ttl)
                .map(|(serial, _)| serial.clone())
                .collect();
            stale
                .iter()
                .filter_map(|serial| radios.remove(serial))
                .collect()
        };
        for radio in lost {
            info!("lost radio {} ({})", radio.serial, radio.model);
            let _ = self.events.send(DiscoveryEvent::Lost(radio));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;

    use pretty_assertions::assert_eq;

    fn beacon(serial: &str) -> Bytes {
        let payload = format!(
            "model=FLEX-6600 serial={} ip=10.0.0.5 port=4992 version=3.2.31 nickname=Shack\u{7f}Radio radio_license_id=00-1C-2D",
            serial
        );
        VitaPacket::data(PacketClass::Discovery, 0x800, 0, Bytes::from(payload)).encode()
    }

    async fn fixture(ttl: Duration) -> (Discovery, UdpSocket, SocketAddr) {
        let discovery = Discovery::start_on(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            ttl,
        )
        .await
        .unwrap();
        let dest = discovery.local_addr();
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        (discovery, sender, dest)
    }

    #[tokio::test]
    async fn beacon_materializes_radio_record() {
        let (discovery, sender, dest) = fixture(Duration::from_secs(10)).await;
        let mut events = discovery.events();

        sender.send_to(&beacon("0123-4567"), dest).await.unwrap();

        let event = tokio_time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        let DiscoveryEvent::Discovered(radio) = event else {
            panic!("expected Discovered, got {:?}", event);
        };
        assert_eq!(radio.serial, "0123-4567");
        assert_eq!(radio.model, "FLEX-6600");
        assert_eq!(radio.ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(radio.port, 4992);
        assert_eq!(radio.nickname, "Shack Radio");
        assert_eq!(
            radio.capabilities.get("radio_license_id").map(String::as_str),
            Some("00-1C-2D")
        );
        assert_eq!(discovery.radios().len(), 1);
    }

    #[tokio::test]
    async fn refresh_within_ttl_is_a_single_update() {
        let (discovery, sender, dest) = fixture(Duration::from_secs(10)).await;
        let mut events = discovery.events();

        sender.send_to(&beacon("0123-4567"), dest).await.unwrap();
        sender.send_to(&beacon("0123-4567"), dest).await.unwrap();

        let first = tokio_time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, DiscoveryEvent::Discovered(_)));
        let second = tokio_time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(second, DiscoveryEvent::Updated(_)));
        assert_eq!(discovery.radios().len(), 1);
    }

    #[tokio::test]
    async fn stale_radio_is_lost() {
        let (discovery, sender, dest) = fixture(Duration::from_millis(100)).await;
        let mut events = discovery.events();

        sender.send_to(&beacon("0123-4567"), dest).await.unwrap();

        let mut saw_lost = false;
        for _ in 0..2 {
            let event = tokio_time::timeout(Duration::from_secs(3), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let DiscoveryEvent::Lost(radio) = event {
                assert_eq!(radio.serial, "0123-4567");
                saw_lost = true;
            }
        }
        assert!(saw_lost);
        assert!(discovery.radios().is_empty());
    }

    #[tokio::test]
    async fn wait_for_resolves_on_beacon() {
        let (discovery, sender, dest) = fixture(Duration::from_secs(10)).await;

        let waiter = tokio::spawn({
            let discovery_radio =
                async move { discovery.wait_for("0123-4567", Duration::from_secs(2)).await };
            discovery_radio
        });
        tokio_time::sleep(Duration::from_millis(50)).await;
        sender.send_to(&beacon("0123-4567"), dest).await.unwrap();

        let radio = waiter.await.unwrap().unwrap();
        assert_eq!(radio.serial, "0123-4567");
    }

    #[tokio::test]
    async fn non_discovery_packets_are_ignored() {
        let (discovery, sender, dest) = fixture(Duration::from_secs(10)).await;
        sender.send_to(b"not vita at all!", dest).await.unwrap();
        let packet = VitaPacket::data(PacketClass::Meter, 1, 0, Bytes::from_static(&[0; 4]));
        sender.send_to(&packet.encode(), dest).await.unwrap();

        tokio_time::sleep(Duration::from_millis(100)).await;
        assert!(discovery.radios().is_empty());
    }
}

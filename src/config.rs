use std::net::IpAddr;

/// Behavior of a bounded stream consumer queue when it fills up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the oldest queued record so the newest wins. Appropriate for
    /// spectrum and waterfall data where only the latest frame matters.
    #[default]
    DropOldest,
    /// Block the producer until the consumer catches up, preserving every
    /// record in order. Appropriate for audio.
    Block,
}

/// Options governing a radio session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Use TLS for the command channel. Plain TCP is used otherwise.
    pub use_tls: bool,
    /// A discovered radio is considered lost when no beacon refreshed it
    /// within this window.
    pub discovery_timeout_ms: u32,
    /// A pending command reply fails with `Timeout` after this window.
    pub reply_timeout_ms: u32,
    /// Time allowed for the TCP/TLS connect before giving up.
    pub connect_timeout_ms: u32,
    /// PEM-encoded certificate roots the radio's TLS certificate is
    /// validated against. Required when `use_tls` is set.
    pub trust_roots: Option<Vec<u8>>,
    /// Force the source address of the VITA stream sockets. Needed when the
    /// radio is reached across subnets and replies must leave on a specific
    /// interface.
    pub local_bind_ip: Option<IpAddr>,
    /// Queue behavior for the audio stream sink.
    pub stream_overflow_policy: OverflowPolicy,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            use_tls: false,
            discovery_timeout_ms: 10_000,
            reply_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            trust_roots: None,
            local_bind_ip: None,
            stream_overflow_policy: OverflowPolicy::default(),
        }
    }
}

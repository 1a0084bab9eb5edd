use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, BufWriter};
use tokio::net::TcpStream;
use tokio::time as tokio_time;
use tokio_rustls::TlsConnector;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::config::ConnectOptions;
use crate::frame::{Line, LineCodec};
use crate::{FlexError, FlexResult, DEFAULT_PORT};

pub(crate) type ReadHalf = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type WriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

/// Defines the connection address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionAddr {
    /// Format for this is `(host, port)`.
    Tcp(String, u16),
    /// TLS on top of TCP; the certificate is validated against the
    /// configured trust roots.
    TcpTls(String, u16),
}

impl fmt::Display for ConnectionAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConnectionAddr::Tcp(ref host, port) => write!(f, "{host}:{port}"),
            ConnectionAddr::TcpTls(ref host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// Holds the connection information used for connecting to a radio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// A connection address for where to connect to.
    pub addr: ConnectionAddr,
    /// Optional station name announced to the radio after handshake.
    pub station: Option<String>,
}

/// Enumerations of actual raw connections.
pub(crate) enum ActualConnection {
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ActualConnection {
    pub async fn new(addr: &ConnectionAddr, options: &ConnectOptions) -> FlexResult<Self> {
        let timeout = Duration::from_millis(u64::from(options.connect_timeout_ms));
        let (host, port, use_tls) = match addr {
            ConnectionAddr::Tcp(host, port) => (host.as_str(), *port, options.use_tls),
            ConnectionAddr::TcpTls(host, port) => (host.as_str(), *port, true),
        };

        let socket = tokio_time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "connection timeout"))??;

        if !use_tls {
            return Ok(Self::Tcp(socket));
        }

        let connector = tls_connector(options)?;
        let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| FlexError::Tls(format!("invalid TLS server name: {:?}", host)))?;
        let stream = tokio_time::timeout(timeout, connector.connect(server_name, socket))
            .await
            .map_err(|_| FlexError::Tls("TLS handshake timeout".to_string()))?
            .map_err(|e| FlexError::Tls(format!("TLS handshake failed: {}", e)))?;
        Ok(Self::Tls(Box::new(stream)))
    }

    pub fn peer_addr(&self) -> FlexResult<std::net::SocketAddr> {
        Ok(match self {
            Self::Tcp(stream) => stream.peer_addr()?,
            Self::Tls(stream) => stream.get_ref().0.peer_addr()?,
        })
    }

    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        match self {
            Self::Tcp(stream) => {
                let (read, write) = stream.into_split();
                (Box::new(read), Box::new(write))
            }
            Self::Tls(stream) => {
                let (read, write) = tokio::io::split(*stream);
                (Box::new(read), Box::new(write))
            }
        }
    }
}

fn tls_connector(options: &ConnectOptions) -> FlexResult<TlsConnector> {
    use rustls_pki_types::pem::PemObject;

    let Some(pem) = &options.trust_roots else {
        return Err(FlexError::InvalidClientConfig(
            "TLS requested without trust roots".to_string(),
        ));
    };

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pki_types::CertificateDer::pem_slice_iter(pem) {
        let cert =
            cert.map_err(|e| FlexError::Tls(format!("failed to parse trust root: {:?}", e)))?;
        roots
            .add(cert)
            .map_err(|e| FlexError::Tls(format!("failed to add trust root: {}", e)))?;
    }
    if roots.is_empty() {
        return Err(FlexError::InvalidClientConfig(
            "trust roots contain no certificates".to_string(),
        ));
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// A connected, framed command channel that finished its handshake: the
/// radio assigned a client handle and (usually) announced its version.
pub(crate) struct EstablishedConnection {
    pub read: FramedRead<ReadHalf, LineCodec>,
    pub write: BufWriter<WriteHalf>,
    pub handle: u32,
    pub version: Option<String>,
    pub peer_addr: std::net::SocketAddr,
}

/// Opens the transport and consumes inbound lines until the radio assigns
/// this client its handle.
pub(crate) async fn connect(
    connection_info: &ConnectionInfo,
    options: &ConnectOptions,
) -> FlexResult<EstablishedConnection> {
    let con = ActualConnection::new(&connection_info.addr, options).await?;
    let peer_addr = con.peer_addr()?;
    let (read, write) = con.into_split();
    let mut read = FramedRead::with_capacity(read, LineCodec::new(), 8 * 1024);
    let write = BufWriter::new(write);

    let timeout = Duration::from_millis(u64::from(options.connect_timeout_ms));
    let deadline = tokio_time::Instant::now() + timeout;

    let mut version = None;
    let handle = loop {
        let line = tokio_time::timeout_at(deadline, read.next())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "handshake timeout"))?
            .ok_or_else(|| {
                FlexError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during handshake",
                ))
            })??;

        match line {
            Line::Version(v) => {
                debug!("radio version: {}", v);
                version = Some(v);
            }
            Line::Handle(handle) => break handle,
            Line::Message { text, .. } => debug!("radio message during handshake: {}", text),
            other => warn!("unexpected line during handshake: {:?}", other),
        }
    };

    info!(
        "connected to {} with handle {:#x}",
        connection_info.addr, handle
    );

    Ok(EstablishedConnection {
        read,
        write,
        handle,
        version,
        peer_addr,
    })
}

/// This function takes a flex URL string and parses it into a URL as used
/// by rust-url. This is necessary as the default parser does not understand
/// how flex URLs function.
pub fn parse_flex_url(input: &str) -> Option<url::Url> {
    match url::Url::parse(input) {
        Ok(result) => match result.scheme() {
            "flex" | "flexs" => Some(result),
            _ => None,
        },
        Err(_) => None,
    }
}

impl FromStr for ConnectionInfo {
    type Err = FlexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.into_connection_info()
    }
}

/// Converts an object into a connection info struct. This allows the
/// constructor of the client to accept connection information in a range of
/// different formats.
pub trait IntoConnectionInfo {
    /// Converts the object into a connection info object.
    fn into_connection_info(self) -> FlexResult<ConnectionInfo>;
}

impl IntoConnectionInfo for ConnectionInfo {
    fn into_connection_info(self) -> FlexResult<ConnectionInfo> {
        Ok(self)
    }
}

impl<'a> IntoConnectionInfo for &'a str {
    fn into_connection_info(self) -> FlexResult<ConnectionInfo> {
        match parse_flex_url(self) {
            Some(u) => u.into_connection_info(),
            None => Err(FlexError::InvalidClientConfig(
                "flex URL did not parse".to_string(),
            )),
        }
    }
}

impl<T> IntoConnectionInfo for (T, u16)
where
    T: Into<String>,
{
    fn into_connection_info(self) -> FlexResult<ConnectionInfo> {
        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.0.into(), self.1),
            station: None,
        })
    }
}

impl IntoConnectionInfo for String {
    fn into_connection_info(self) -> FlexResult<ConnectionInfo> {
        self.as_str().into_connection_info()
    }
}

fn url_to_connection_info(url: url::Url) -> FlexResult<ConnectionInfo> {
    let host = match url.host() {
        Some(host) => {
            // Match the host enum arms manually: url.host().to_string()
            // would wrap ipv6 addresses in brackets, which breaks the
            // later to_socket_addrs() resolution.
            match host {
                url::Host::Domain(path) => path.to_string(),
                url::Host::Ipv4(v4) => v4.to_string(),
                url::Host::Ipv6(v6) => v6.to_string(),
            }
        }
        None => {
            return Err(FlexError::InvalidClientConfig(
                "Missing hostname".to_string(),
            ));
        }
    };

    let port = url.port().unwrap_or(DEFAULT_PORT);

    let addr = if url.scheme() == "flexs" {
        ConnectionAddr::TcpTls(host, port)
    } else {
        ConnectionAddr::Tcp(host, port)
    };

    let station = if url.username().is_empty() {
        None
    } else {
        match percent_encoding::percent_decode(url.username().as_bytes()).decode_utf8() {
            Ok(decoded) => Some(decoded.into_owned()),
            Err(_) => {
                return Err(FlexError::InvalidClientConfig(
                    "Station name is not a valid UTF-8 string".to_string(),
                ));
            }
        }
    };

    Ok(ConnectionInfo { addr, station })
}

impl IntoConnectionInfo for url::Url {
    fn into_connection_info(self) -> FlexResult<ConnectionInfo> {
        match self.scheme() {
            "flex" | "flexs" => url_to_connection_info(self),
            _ => Err(FlexError::InvalidClientConfig(
                "URL provided is not a flex URL".to_string(),
            )),
        }
    }
}

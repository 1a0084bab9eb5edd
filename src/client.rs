use crate::config::ConnectOptions;
use crate::connection::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo};
use crate::discovery::{Discovery, RadioInfo};
use crate::session::RadioSession;
use crate::FlexResult;

/// The client acts as connector to a radio. By itself it does not do much
/// other than validating the connection parameters and handing out
/// sessions.
///
/// When opening a client a URL in the following format should be used:
///
/// ```plain
/// flex://host:port/
/// ```
///
/// (`flexs://` selects TLS.) Example usage:
///
/// ```rust,no_run
/// # async fn run() -> flexlink::FlexResult<()> {
/// let client = flexlink::Client::open("flex://10.0.0.5/")?;
/// let session = client.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    connection_info: ConnectionInfo,
    options: ConnectOptions,
}

impl Client {
    /// Creates a client for the given radio address. This does not open a
    /// connection yet but performs basic checks on the URL that might make
    /// the operation fail.
    pub fn open<T: IntoConnectionInfo>(params: T) -> FlexResult<Self> {
        Self::open_with_options(params, ConnectOptions::default())
    }

    /// Like [`Client::open`] with explicit session options.
    pub fn open_with_options<T: IntoConnectionInfo>(
        params: T,
        options: ConnectOptions,
    ) -> FlexResult<Self> {
        Ok(Self {
            connection_info: params.into_connection_info()?,
            options,
        })
    }

    /// Creates a client addressed at a discovered radio.
    pub fn from_radio(radio: &RadioInfo, options: ConnectOptions) -> Self {
        Self {
            connection_info: ConnectionInfo {
                addr: ConnectionAddr::Tcp(radio.ip.to_string(), radio.port),
                station: None,
            },
            options,
        }
    }

    /// Starts the LAN discovery service with this client's options.
    pub async fn discover(options: &ConnectOptions) -> FlexResult<Discovery> {
        Discovery::start(options).await
    }

    /// Connects to the radio and returns a live session. This can fail
    /// with a variety of errors (unreachable host, TLS validation,
    /// handshake timeout), so handle them.
    pub async fn connect(&self) -> FlexResult<RadioSession> {
        RadioSession::establish(&self.connection_info, &self.options).await
    }

    /// Returns a reference to the client's connection info.
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.connection_info
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }
}

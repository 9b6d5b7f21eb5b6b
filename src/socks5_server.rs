//! Embedded SOCKS5 front-end.
//!
//! RFC 1928 handshake (NO_AUTH + USER/PASS) and CONNECT parsing,
//! grounded on `fos-vpn::proxy::Socks5Proxy::handle_connection`,
//! extended with RFC 1929 USER/PASS and delegating every dial to
//! `pool_core::Dispatcher` instead of a direct `TcpStream::connect`.

use pool_core::config::{Credential, ListenerConfig};
use pool_core::Dispatcher;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NO_AUTH: u8 = 0x00;
const AUTH_USER_PASS: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const USER_PASS_VERSION: u8 = 0x01;
const USER_PASS_SUCCESS: u8 = 0x00;
const USER_PASS_FAILURE: u8 = 0x01;

const CMD_CONNECT: u8 = 0x01;

const ADDR_IPV4: u8 = 0x01;
const ADDR_DOMAIN: u8 = 0x03;
const ADDR_IPV6: u8 = 0x04;

const REPLY_SUCCESS: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
const REPLY_CONNECTION_REFUSED: u8 = 0x05;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid SOCKS version")]
    InvalidVersion,
    #[error("no acceptable auth method")]
    AuthNotSupported,
    #[error("auth rejected")]
    AuthRejected,
    #[error("unsupported command")]
    UnsupportedCommand,
    #[error("invalid address")]
    InvalidAddress,
    #[error("pool error: {0}")]
    Pool(#[from] pool_core::PoolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Socks5Server {
    listen_addr: SocketAddr,
    credentials: Vec<Credential>,
    dispatcher: Arc<Dispatcher>,
    max_connections: usize,
    buffer_size: usize,
    active_connections: Arc<AtomicU64>,
}

impl Socks5Server {
    pub fn new(listener: &ListenerConfig, dispatcher: Arc<Dispatcher>) -> Result<Self, ServerError> {
        let listen_addr = listener
            .bind_addr()
            .parse()
            .map_err(|_| ServerError::InvalidAddress)?;
        Ok(Self {
            listen_addr,
            credentials: listener.credentials.clone(),
            dispatcher,
            max_connections: 1024,
            buffer_size: 16 * 1024,
            active_connections: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind and serve forever; returns only on a fatal bind error.
    #[instrument(skip(self), fields(addr = %self.listen_addr))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.listen_addr,
                source,
            })?;
        info!(addr = %self.listen_addr, "socks5 server listening");

        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept error");
                    continue;
                }
            };

            let credentials = self.credentials.clone();
            let dispatcher = self.dispatcher.clone();
            let buffer_size = self.buffer_size;
            let active = self.active_connections.clone();
            active.fetch_add(1, Ordering::Relaxed);

            tokio::spawn(async move {
                debug!(%peer, "accepted socks5 connection");
                if let Err(e) =
                    handle_connection(stream, &credentials, dispatcher, buffer_size).await
                {
                    debug!(%peer, error = %e, "connection ended with error");
                }
                active.fetch_sub(1, Ordering::Relaxed);
                drop(permit);
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    credentials: &[Credential],
    dispatcher: Arc<Dispatcher>,
    buffer_size: usize,
) -> Result<(), ServerError> {
    negotiate_auth(&mut stream, credentials).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(ServerError::InvalidVersion);
    }
    if header[1] != CMD_CONNECT {
        send_reply(&mut stream, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(ServerError::UnsupportedCommand);
    }

    let dest = match read_dest_addr(&mut stream, header[3]).await {
        Ok(d) => d,
        Err(e) => {
            send_reply(&mut stream, REPLY_GENERAL_FAILURE).await?;
            return Err(e);
        }
    };

    debug!(dest = %dest, "socks5 CONNECT");

    match dispatcher.dial(CancellationToken::new(), "tcp", &dest).await {
        Ok(upstream) => {
            send_reply(&mut stream, REPLY_SUCCESS).await?;
            relay(stream, upstream, buffer_size).await?;
            Ok(())
        }
        Err(pool_core::PoolError::NoAvailableProxies) => {
            send_reply(&mut stream, REPLY_NETWORK_UNREACHABLE).await?;
            Err(ServerError::Pool(pool_core::PoolError::NoAvailableProxies))
        }
        Err(e) => {
            send_reply(&mut stream, REPLY_CONNECTION_REFUSED).await?;
            Err(ServerError::Pool(e))
        }
    }
}

async fn negotiate_auth(
    stream: &mut TcpStream,
    credentials: &[Credential],
) -> Result<(), ServerError> {
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting[0] != SOCKS5_VERSION {
        return Err(ServerError::InvalidVersion);
    }
    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await?;

    if credentials.is_empty() {
        if !methods.contains(&AUTH_NO_AUTH) {
            stream.write_all(&[SOCKS5_VERSION, AUTH_NO_ACCEPTABLE]).await?;
            return Err(ServerError::AuthNotSupported);
        }
        stream.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await?;
        return Ok(());
    }

    if !methods.contains(&AUTH_USER_PASS) {
        stream.write_all(&[SOCKS5_VERSION, AUTH_NO_ACCEPTABLE]).await?;
        return Err(ServerError::AuthNotSupported);
    }
    stream.write_all(&[SOCKS5_VERSION, AUTH_USER_PASS]).await?;

    let mut sub_header = [0u8; 2];
    stream.read_exact(&mut sub_header).await?;
    let mut uname = vec![0u8; sub_header[1] as usize];
    stream.read_exact(&mut uname).await?;
    let mut plen = [0u8; 1];
    stream.read_exact(&mut plen).await?;
    let mut passwd = vec![0u8; plen[0] as usize];
    stream.read_exact(&mut passwd).await?;

    let username = String::from_utf8_lossy(&uname);
    let password = String::from_utf8_lossy(&passwd);
    let ok = credentials
        .iter()
        .any(|c| c.username == username && c.password == password);

    stream
        .write_all(&[
            USER_PASS_VERSION,
            if ok { USER_PASS_SUCCESS } else { USER_PASS_FAILURE },
        ])
        .await?;

    if ok {
        Ok(())
    } else {
        Err(ServerError::AuthRejected)
    }
}

async fn read_dest_addr(stream: &mut TcpStream, addr_type: u8) -> Result<String, ServerError> {
    match addr_type {
        ADDR_IPV4 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await?;
            let mut port = [0u8; 2];
            stream.read_exact(&mut port).await?;
            Ok(format!(
                "{}:{}",
                std::net::Ipv4Addr::from(ip),
                u16::from_be_bytes(port)
            ))
        }
        ADDR_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await?;
            let mut port = [0u8; 2];
            stream.read_exact(&mut port).await?;
            Ok(format!(
                "{}:{}",
                String::from_utf8_lossy(&domain),
                u16::from_be_bytes(port)
            ))
        }
        ADDR_IPV6 => {
            let mut ip = [0u8; 16];
            stream.read_exact(&mut ip).await?;
            let mut port = [0u8; 2];
            stream.read_exact(&mut port).await?;
            Ok(format!(
                "[{}]:{}",
                std::net::Ipv6Addr::from(ip),
                u16::from_be_bytes(port)
            ))
        }
        _ => Err(ServerError::InvalidAddress),
    }
}

async fn send_reply(stream: &mut TcpStream, reply: u8) -> std::io::Result<()> {
    let response = [
        SOCKS5_VERSION,
        reply,
        0x00,
        ADDR_IPV4,
        0, 0, 0, 0,
        0, 0,
    ];
    stream.write_all(&response).await
}

async fn relay(mut client: TcpStream, mut remote: TcpStream, buffer_size: usize) -> std::io::Result<()> {
    let (mut client_read, mut client_write) = client.split();
    let (mut remote_read, mut remote_write) = remote.split();

    let client_to_remote = async {
        let mut buf = vec![0u8; buffer_size];
        loop {
            let n = client_read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            remote_write.write_all(&buf[..n]).await?;
        }
        Ok::<_, std::io::Error>(())
    };
    let remote_to_client = async {
        let mut buf = vec![0u8; buffer_size];
        loop {
            let n = remote_read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            client_write.write_all(&buf[..n]).await?;
        }
        Ok::<_, std::io::Error>(())
    };

    let _ = tokio::try_join!(client_to_remote, remote_to_client);
    Ok(())
}

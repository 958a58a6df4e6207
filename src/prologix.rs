//! Client for Prologix-style GPIB-Ethernet adapters.
//! http://prologix.biz/gpib-ethernet-controller.html
//!
//! The adapter exposes the GPIB bus as a plain TCP socket. Adapter directives
//! are newline-terminated ASCII lines starting with `++` and are never
//! acknowledged, so no confirmation is awaited after issuing one.
//!
//! The adapter keeps a single selected bus address shared between all of its
//! clients. [`PrologixEthernet::select`] must therefore be re-issued before
//! every transaction with a specific instrument; concurrent users of the same
//! physical adapter can still race on the selection.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use crate::Error;

/// TCP port the adapter listens on out of the box.
pub const DEFAULT_PORT: u16 = 1234;

/// Link-local address the adapter assigns itself when no DHCP lease is found.
pub const DEFAULT_HOST: &str = "169.254.128.218";

/// Receive buffer size for a plain [`PrologixEthernet::read`].
pub const READ_BUFFER_SIZE: usize = 1024;

/// Receive buffer size for a [`PrologixEthernet::query`] reply.
pub const QUERY_BUFFER_SIZE: usize = 1024 * 1024;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Serialize, Deserialize, Debug, Hash, PartialEq, Eq)]
pub struct AdapterAddress {
    pub host: String,
    pub port: u16,
}

impl AdapterAddress {
    pub fn new<T: Into<String>>(host: T) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Default for AdapterAddress {
    fn default() -> Self {
        AdapterAddress::new(DEFAULT_HOST)
    }
}

/// Connection to one GPIB-Ethernet adapter.
///
/// Owns the TCP socket exclusively for its lifetime; the type is deliberately
/// not `Clone`. All methods take `&mut self`, so only one request can be in
/// flight at a time.
pub struct PrologixEthernet {
    addr: AdapterAddress,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl PrologixEthernet {
    pub fn new(addr: AdapterAddress) -> Self {
        Self::with_timeout(addr, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(addr: AdapterAddress, timeout: Duration) -> Self {
        Self {
            addr,
            timeout,
            stream: None,
        }
    }

    /// Open the TCP connection and configure the adapter session.
    ///
    /// The session directives are issued exactly once, right after the socket
    /// connects and before any instrument traffic.
    pub async fn connect(&mut self) -> crate::Result<()> {
        let mut stream = connect_tcp_stream(&self.addr, self.timeout).await?;
        init(&mut stream, self.timeout).await?;
        self.stream.replace(stream);
        Ok(())
    }

    /// Drop the connection. Further traffic fails with [`Error::NotConnected`].
    pub fn close(&mut self) {
        self.stream.take();
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> crate::Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }

    /// Select the bus address subsequent commands are directed at.
    pub async fn select(&mut self, gpib: u8) -> crate::Result<()> {
        log::debug!("select gpib address {}", gpib);
        let stream = self.stream()?;
        write_line(stream, &format!("++addr {}", gpib)).await
    }

    /// Send a command to the selected instrument. No reply is read.
    pub async fn write(&mut self, cmd: &str) -> crate::Result<()> {
        log::debug!("write: {}", cmd);
        let stream = self.stream()?;
        write_line(stream, cmd).await
    }

    /// Ask the adapter to read from the instrument until EOI and receive up to
    /// `max_bytes` of the reply.
    pub async fn read(&mut self, max_bytes: usize) -> crate::Result<String> {
        let tmo = self.timeout;
        let stream = self.stream()?;
        write_line(stream, "++read eoi").await?;
        read_reply(stream, max_bytes, tmo).await
    }

    /// Send a query and receive the reply.
    pub async fn query(&mut self, cmd: &str) -> crate::Result<String> {
        self.write(cmd).await?;
        self.read(QUERY_BUFFER_SIZE).await
    }
}

async fn connect_tcp_stream(
    addr: &AdapterAddress,
    connection_timeout: Duration,
) -> crate::Result<TcpStream> {
    let fut = TcpStream::connect((addr.host.as_str(), addr.port));
    match timeout(connection_timeout, fut).await {
        Ok(Ok(x)) => Ok(x),
        Ok(Err(x)) => Err(Error::Connect(x)),
        Err(_) => Err(Error::Connect(io::Error::new(
            io::ErrorKind::TimedOut,
            "Connection timed out",
        ))),
    }
}

async fn init<T: AsyncWrite + Unpin>(stream: &mut T, read_timeout: Duration) -> crate::Result<()> {
    log::debug!("configuring adapter session");
    // act as bus controller
    write_line(stream, "++mode 1").await?;
    // no read-after-write, reads are requested explicitly
    write_line(stream, "++auto 0").await?;
    write_line(stream, &format!("++read_tmo_ms {}", read_timeout.as_millis())).await?;
    // do not require CR or LF appended to instrument data
    write_line(stream, "++eos 3").await
}

async fn write_line<T: AsyncWrite + Unpin>(stream: &mut T, line: &str) -> crate::Result<()> {
    let mut msg = line.to_string();
    msg.push('\n');
    stream.write_all(msg.as_bytes()).await.map_err(Error::io)
}

async fn read_reply<T: AsyncRead + Unpin>(
    stream: &mut T,
    max_bytes: usize,
    tmo: Duration,
) -> crate::Result<String> {
    let mut buf = vec![0; max_bytes];
    let num_read = match timeout(tmo, stream.read(&mut buf)).await {
        Ok(x) => x.map_err(Error::io)?,
        Err(_) => {
            log::debug!("instrument read timeout");
            return Err(Error::Timeout);
        }
    };
    buf.truncate(num_read);
    if !buf.is_ascii() {
        return Err(Error::Decode);
    }
    String::from_utf8(buf).map_err(|_| Error::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    #[tokio::test]
    async fn session_setup_directives() {
        let (mut host, mut adapter) = duplex(1024);
        init(&mut host, Duration::from_secs(1)).await.unwrap();
        drop(host);
        let mut sent = String::new();
        adapter.read_to_string(&mut sent).await.unwrap();
        assert_eq!(sent, "++mode 1\n++auto 0\n++read_tmo_ms 1000\n++eos 3\n");
    }

    #[tokio::test]
    async fn non_ascii_reply_is_rejected() {
        let (mut host, mut adapter) = duplex(64);
        host.write_all("voil\u{00e0}".as_bytes()).await.unwrap();
        let err = read_reply(&mut adapter, 64, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode));
    }

    /// Accepts one connection, records every received line and answers each
    /// `++read eoi` with `reply`. Returns the recorded lines once the peer
    /// hangs up.
    async fn spawn_adapter(reply: &'static str) -> (SocketAddr, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut lines = Vec::new();
            let mut line = String::new();
            loop {
                line.clear();
                if stream.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                if line == "++read eoi" {
                    stream.get_mut().write_all(reply.as_bytes()).await.unwrap();
                }
                lines.push(line);
            }
            lines
        });
        (addr, handle)
    }

    fn local(addr: SocketAddr) -> AdapterAddress {
        AdapterAddress {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    #[tokio::test]
    async fn select_precedes_command() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (addr, handle) = spawn_adapter("OK").await;
        let mut adapter = PrologixEthernet::new(local(addr));
        adapter.connect().await.unwrap();
        adapter.select(12).await.unwrap();
        let reply = adapter.query("CONT?").await.unwrap();
        assert_eq!(reply, "OK");
        adapter.close();

        let lines = handle.await.unwrap();
        assert_eq!(
            lines[..4],
            ["++mode 1", "++auto 0", "++read_tmo_ms 1000", "++eos 3"]
        );
        assert_eq!(lines[4], "++addr 12");
        assert_eq!(lines[5], "CONT?");
        assert_eq!(lines[6], "++read eoi");
    }

    #[tokio::test]
    async fn commands_require_connect() {
        let mut adapter = PrologixEthernet::new(AdapterAddress::default());
        assert!(matches!(adapter.select(5).await, Err(Error::NotConnected)));
        assert!(matches!(adapter.write("CONT").await, Err(Error::NotConnected)));
        assert!(matches!(adapter.read(16).await, Err(Error::NotConnected)));
        assert!(matches!(adapter.query("CONT?").await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut adapter = PrologixEthernet::new(local(addr));
        assert!(matches!(adapter.connect().await, Err(Error::Connect(_))));
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn read_timeout_leaves_connection_closable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // swallow everything, never reply
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            while stream.read_line(&mut line).await.unwrap() != 0 {
                line.clear();
            }
        });

        let mut adapter =
            PrologixEthernet::with_timeout(local(addr), Duration::from_millis(50));
        adapter.connect().await.unwrap();
        let err = adapter.read(64).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        adapter.close();
        assert!(!adapter.is_connected());
    }
}

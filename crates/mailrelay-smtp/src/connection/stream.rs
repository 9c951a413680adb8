//! Low-level SMTP stream handling.

use crate::error::{Error, Result};
use rustls::pki_types::ServerName;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{ClientConfig, RootCertStore},
};

/// Byte transport an SMTP conversation can run over.
///
/// Implemented for every `AsyncRead + AsyncWrite` type, so a TCP socket and
/// an in-memory test double are interchangeable.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

type BoxedTransport = Box<dyn Transport>;

/// Longest reply line accepted from a server, CRLF included.
///
/// RFC 5321 limits reply lines to 512 octets; the extra room tolerates
/// servers with long EHLO or error texts.
pub const MAX_LINE_LENGTH: usize = 4096;

static TLS_CONNECTOR: LazyLock<TlsConnector> = LazyLock::new(create_tls_connector);

/// SMTP stream, plaintext or TLS-encrypted.
pub enum SmtpStream {
    /// Plaintext connection.
    Plain(BufReader<BoxedTransport>),
    /// TLS-encrypted connection.
    Tls(Box<BufReader<TlsStream<BoxedTransport>>>),
}

impl fmt::Debug for SmtpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SmtpStream::Plain"),
            Self::Tls(_) => f.write_str("SmtpStream::Tls"),
        }
    }
}

impl SmtpStream {
    /// Wraps an already-open transport as a plaintext stream.
    pub fn plain<T: Transport + 'static>(transport: T) -> Self {
        Self::Plain(BufReader::new(Box::new(transport)))
    }

    /// Returns true once the stream is encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Reads a line from the stream, without the trailing CRLF.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails, the peer closed the connection,
    /// or the line is longer than [`MAX_LINE_LENGTH`] or not UTF-8.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let read = match self {
            Self::Plain(reader) => read_bounded_line(reader, &mut buf).await?,
            Self::Tls(reader) => read_bounded_line(reader.as_mut(), &mut buf).await?,
        };
        if read == 0 {
            return Err(Error::ConnectionClosed);
        }
        if !buf.ends_with(b"\n") && buf.len() >= MAX_LINE_LENGTH {
            return Err(Error::Protocol(format!(
                "reply line exceeds {MAX_LINE_LENGTH} bytes"
            )));
        }
        let line = String::from_utf8(buf)
            .map_err(|_| Error::Protocol("reply line is not valid UTF-8".into()))?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Writes data to the stream and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await?;
            }
            Self::Tls(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await?;
            }
        }
        Ok(())
    }

    /// Upgrades a plaintext stream to TLS in place (STARTTLS).
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already encrypted, if the server
    /// pipelined data ahead of the handshake, or if the handshake fails.
    pub async fn upgrade_to_tls(self, hostname: &str) -> Result<Self> {
        let reader = match self {
            Self::Plain(reader) => reader,
            Self::Tls(_) => return Err(Error::Protocol("Already using TLS".into())),
        };

        // Anything buffered here was sent before encryption started and
        // would otherwise be trusted as if it came over TLS.
        if !reader.buffer().is_empty() {
            return Err(Error::Protocol(
                "Unexpected plaintext data before TLS handshake".into(),
            ));
        }

        let tls_stream = handshake(hostname, reader.into_inner()).await?;
        Ok(Self::Tls(Box::new(BufReader::new(tls_stream))))
    }
}

/// Connects to an SMTP server over plain TCP.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(hostname: &str, port: u16) -> Result<SmtpStream> {
    let stream = TcpStream::connect((hostname, port)).await?;
    tracing::debug!(host = hostname, port, "tcp connection established");
    Ok(SmtpStream::plain(stream))
}

/// Connects to an SMTP server with TLS from the first byte (implicit TLS).
///
/// # Errors
///
/// Returns an error if the connection or TLS handshake fails.
pub async fn connect_tls(hostname: &str, port: u16) -> Result<SmtpStream> {
    let tcp_stream = TcpStream::connect((hostname, port)).await?;
    tracing::debug!(host = hostname, port, "tcp connection established");

    let transport: BoxedTransport = Box::new(tcp_stream);
    let tls_stream = handshake(hostname, transport).await?;
    Ok(SmtpStream::Tls(Box::new(BufReader::new(tls_stream))))
}

async fn read_bounded_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    reader.take(MAX_LINE_LENGTH as u64).read_until(b'\n', buf).await
}

async fn handshake(hostname: &str, transport: BoxedTransport) -> Result<TlsStream<BoxedTransport>> {
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Protocol(format!("Invalid hostname: {hostname}")))?;

    let tls_stream = TLS_CONNECTOR.connect(server_name, transport).await?;
    tracing::debug!(host = hostname, "tls handshake complete");
    Ok(tls_stream)
}

/// Creates a TLS connector trusting the bundled webpki roots.
fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

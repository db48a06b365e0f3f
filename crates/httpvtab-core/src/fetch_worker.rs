use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{instrument, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::http_framer::HttpFramer;
use crate::json_transcoder::JsonTranscoder;
use crate::ndjson_stream::{BufferSource, NdjsonStream};

const READ_CHUNK: usize = 4096;

/// Tunables for a single fetch, overridable per-table by `DEFAULT`-clause
/// column values or, crate-wide, by environment variables read once at
/// module-registration time (see `httpvtab::config`).
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
    /// Bound on the row channel; applies backpressure to the worker's reads
    /// once the query thread falls behind, per spec.md §4.5's optional
    /// watermark refinement.
    pub queue_capacity: usize,
    /// Header-block size limit passed to `HttpFramer`; spec.md §4.3's 8 KiB
    /// default, overridable via `HTTPVTAB_MAX_HEADER_BYTES`.
    pub max_header_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            user_agent: format!("httpvtab/{}", env!("CARGO_PKG_VERSION")),
            queue_capacity: 64,
            max_header_bytes: 8192,
        }
    }
}

/// The consumer-side handle to a spawned fetch: a bounded channel of decoded
/// NDJSON-row buffers plus the worker's join handle.
///
/// Dropping this drops the receiver first (so a worker blocked on a full
/// channel observes "consumer gone" on its next send instead of hanging)
/// and then joins the worker thread, satisfying spec.md §5's "`xClose` must
/// wait for the worker to acknowledge shutdown" requirement.
pub struct FetchHandle {
    rx: Option<Receiver<Bytes>>,
    join: Option<JoinHandle<()>>,
}

impl BufferSource for FetchHandle {
    fn recv(&mut self) -> Option<Bytes> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        self.rx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Owns the socket, optional TLS session, framer, and transcoder for one
/// query's fetch. Spawned on its own OS thread running a dedicated
/// single-threaded Tokio runtime, which serves as the "readiness poller" of
/// spec.md §5 — the runtime's reactor parks on the socket exactly as that
/// section describes, so no separate hand-rolled poll loop is written here.
pub struct FetchWorker;

impl FetchWorker {
    /// Resolve `url`, spawn the worker thread, and return the readable
    /// NDJSON stream plus a slot the cursor can check for a fatal error
    /// once the stream reports EOF.
    #[instrument(skip(config))]
    pub fn spawn(
        url: String,
        path_filter: Option<Vec<String>>,
        config: FetchConfig,
    ) -> Result<(NdjsonStream<FetchHandle>, Arc<Mutex<Option<Error>>>)> {
        let parsed = Url::parse(&url)?;

        let (tx, rx) = sync_channel::<Bytes>(config.queue_capacity.max(1));
        let error_slot = Arc::new(Mutex::new(None));
        let worker_error_slot = Arc::clone(&error_slot);

        let join = std::thread::Builder::new()
            .name("httpvtab-fetch".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        *worker_error_slot.lock().unwrap() = Some(Error::Io(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = rt.block_on(run(parsed, path_filter, config, tx)) {
                    warn!(error = %e, "fetch worker terminated with an error");
                    *worker_error_slot.lock().unwrap() = Some(e);
                }
            })
            .map_err(|e| Error::Io(e.to_string()))?;

        let handle = FetchHandle {
            rx: Some(rx),
            join: Some(join),
        };
        Ok((NdjsonStream::new(handle), error_slot))
    }
}

async fn run(
    url: Url,
    path_filter: Option<Vec<String>>,
    config: FetchConfig,
    tx: SyncSender<Bytes>,
) -> Result<()> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidUrl("missing host".to_string()))?
        .to_string();
    let is_tls = match url.scheme() {
        "https" => true,
        "http" => false,
        other => return Err(Error::InvalidUrl(format!("unsupported scheme: {other}"))),
    };
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::InvalidUrl("no port and unknown default for scheme".to_string()))?;

    let addr = format!("{host}:{port}");
    let resolved = timeout(config.connect_timeout, lookup_host(&addr))
        .await
        .map_err(|_| Error::Dns {
            host: host.clone(),
            reason: "resolution timed out".to_string(),
        })?
        .map_err(|e| Error::Dns {
            host: host.clone(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| Error::Dns {
            host: host.clone(),
            reason: "no addresses returned".to_string(),
        })?;

    let tcp = timeout(config.connect_timeout, TcpStream::connect(resolved))
        .await
        .map_err(|_| Error::Connect(format!("connect timed out: {addr}")))?
        .map_err(|e| Error::Connect(e.to_string()))?;
    let _ = tcp.set_nodelay(true);

    let request = build_request(&url, &host, port, is_tls, &config.user_agent);

    let mut framer = HttpFramer::with_header_cap(config.max_header_bytes);
    let mut transcoder = JsonTranscoder::new(path_filter);

    if is_tls {
        let connector = tls_connector()?;
        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| Error::Tls(format!("invalid dns name: {host}")))?;
        let mut tls = timeout(config.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| Error::Tls("tls handshake timed out".to_string()))?
            .map_err(|e| Error::Tls(e.to_string()))?;
        tls.write_all(request.as_bytes()).await?;
        drive(&mut tls, &mut framer, &mut transcoder, &tx, &config).await
    } else {
        let mut tcp = tcp;
        tcp.write_all(request.as_bytes()).await?;
        drive(&mut tcp, &mut framer, &mut transcoder, &tx, &config).await
    }
}

fn build_request(url: &Url, host: &str, port: u16, is_tls: bool, user_agent: &str) -> String {
    let mut path = url.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    let is_default_port = (is_tls && port == 443) || (!is_tls && port == 80);
    let host_header = if is_default_port {
        host.to_string()
    } else {
        format!("{host}:{port}")
    };
    format!(
        "GET {path} HTTP/1.1\r\nHost: {host_header}\r\nUser-Agent: {user_agent}\r\nAccept: */*\r\nConnection: close\r\n\r\n"
    )
}

/// Feed socket bytes through the framer and transcoder until the framer
/// reaches `Done` or the connection closes, sending each completed NDJSON
/// row to the query thread as soon as it is available.
async fn drive<S: AsyncRead + Unpin>(
    stream: &mut S,
    framer: &mut HttpFramer,
    transcoder: &mut JsonTranscoder,
    tx: &SyncSender<Bytes>,
    config: &FetchConfig,
) -> Result<()> {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = timeout(config.read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| Error::Io("read timed out".to_string()))??;

        if n == 0 {
            framer.on_eof()?;
            break;
        }

        let mut body_err = None;
        framer.feed(&buf[..n], &mut |chunk| {
            if body_err.is_some() {
                return;
            }
            if let Err(e) = transcoder.feed(chunk) {
                body_err = Some(e);
            }
        })?;
        if let Some(e) = body_err {
            return Err(e);
        }

        if send_rows(transcoder, tx).is_err() {
            return Ok(());
        }
        if framer.is_done() {
            break;
        }
    }

    transcoder.finish()?;
    let _ = send_rows(transcoder, tx);
    Ok(())
}

/// Drain every row the transcoder has completed so far onto the channel.
/// Returns `Err(())` when the consumer has gone away (receiver dropped) —
/// not a fetch error, just a signal for `drive` to stop early.
fn send_rows(transcoder: &mut JsonTranscoder, tx: &SyncSender<Bytes>) -> std::result::Result<(), ()> {
    while let Some(row) = transcoder.pop_row() {
        if tx.send(row).is_err() {
            return Err(());
        }
    }
    Ok(())
}

fn tls_connector() -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_uses_path_and_query() {
        let url = Url::parse("http://example.com/a/b?x=1").unwrap();
        let req = build_request(&url, "example.com", 80, false, "ua/1");
        assert!(req.starts_with("GET /a/b?x=1 HTTP/1.1\r\n"));
        assert!(req.contains("Host: example.com\r\n"));
        assert!(req.contains("Connection: close\r\n"));
    }

    #[test]
    fn non_default_port_is_included_in_host_header() {
        let url = Url::parse("http://example.com:8080/").unwrap();
        let req = build_request(&url, "example.com", 8080, false, "ua/1");
        assert!(req.contains("Host: example.com:8080\r\n"));
    }

    #[test]
    fn empty_path_defaults_to_slash() {
        let url = Url::parse("http://example.com").unwrap();
        let req = build_request(&url, "example.com", 80, false, "ua/1");
        assert!(req.starts_with("GET / HTTP/1.1\r\n"));
    }
}

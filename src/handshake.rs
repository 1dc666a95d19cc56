use crate::error::Error;
use crate::stream::SessionStream;
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};
use crate::write::{Writer, WriterKind};
use pki_types::ServerName;
use std::sync::{Arc, LazyLock};
use tokio::io::{split, AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_rustls::TlsConnector;
use url::Url;

pub const SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";

const MAX_RESPONSE_HEADER: usize = 16 * 1024;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

static TLS_CONFIG: LazyLock<Arc<rustls::ClientConfig>> = LazyLock::new(|| {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
});

/// Opens the duplex session: TCP (plus TLS for wss), upgrade request carrying
/// the caller's extra headers (origin and session cookie), 101 response with
/// a verified accept key. Returns the buffered read half and the masked-frame
/// writer.
pub async fn connect_session(
    endpoint: &str,
    extra_headers: &[(String, String)],
) -> Result<(BufReader<ReadHalf<SessionStream>>, Writer), Error> {
    let key = generate_websocket_key();
    let (request, host_with_port, host, use_tls) =
        construct_http_request(endpoint, &key, extra_headers)?;

    let tcp = TcpStream::connect(&host_with_port)
        .await
        .map_err(|e| Error::io("tcp connect", e))?;

    let stream = if use_tls {
        let connector = TlsConnector::from(TLS_CONFIG.clone());
        let domain = ServerName::try_from(host)?;
        let tls = connector
            .connect(domain, tcp)
            .await
            .map_err(|e| Error::io("tls connect", e))?;
        SessionStream::Tls(tls)
    } else {
        SessionStream::Plain(tcp)
    };

    let (read_half, mut write_half) = split(stream);
    let mut buf_reader = BufReader::new(read_half);

    write_half
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::io("write handshake request", e))?;

    let response = timeout(RESPONSE_TIMEOUT, read_response_header(&mut buf_reader))
        .await
        .map_err(|_| Error::IncompleteHandshake)??;

    verify_upgrade_response(&response, &key)?;

    Ok((buf_reader, Writer::new(write_half, WriterKind::Client)))
}

/// Reads status line and headers through the buffered reader, so any frame
/// bytes the server sends right after the 101 stay buffered for the read
/// pump.
async fn read_response_header(
    buf_reader: &mut BufReader<ReadHalf<SessionStream>>,
) -> Result<String, Error> {
    let mut response = String::new();

    loop {
        let mut line = String::new();
        let n = buf_reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::io("read handshake response", e))?;

        if n == 0 {
            return Err(Error::IncompleteHandshake);
        }

        response.push_str(&line);

        if line == "\r\n" || line == "\n" {
            return Ok(response);
        }

        if response.len() > MAX_RESPONSE_HEADER {
            return Err(Error::IncompleteHandshake);
        }
    }
}

fn verify_upgrade_response(response: &str, key: &str) -> Result<(), Error> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut parsed = httparse::Response::new(&mut headers);

    if parsed.parse(response.as_bytes())?.is_partial() {
        return Err(Error::IncompleteHandshake);
    }

    if parsed.code != Some(101) {
        return Err(Error::NoUpgrade);
    }

    let accept = parsed
        .get_header_value(SEC_WEBSOCKET_ACCEPT)
        .ok_or(Error::InvalidAcceptKey)?;

    if accept != generate_websocket_accept_value(key) {
        return Err(Error::InvalidAcceptKey);
    }

    Ok(())
}

/// Builds the upgrade request for a ws/wss URL, returning it together with
/// the host:port connect target, the bare host, and whether TLS is wanted.
pub fn construct_http_request(
    ws_url: &str,
    key: &str,
    extra_headers: &[(String, String)],
) -> Result<(String, String, String, bool), Error> {
    let parsed_url = Url::parse(ws_url)?;

    let (default_port, use_tls) = match parsed_url.scheme() {
        "ws" => (80, false),
        "wss" => (443, true),
        other => return Err(Error::InvalidScheme(other.to_string())),
    };

    let host = parsed_url.host_str().ok_or(Error::UrlNoHost)?;
    let port = parsed_url.port().unwrap_or(default_port);

    // The Host header keeps an explicit port only when the URL carried one;
    // the TCP connect target always needs it.
    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => String::from(host),
    };
    let host_with_port = format!("{}:{}", host, port);

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n",
        request_path, request_host_field, key,
    );

    for (name, value) in extra_headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    request.push_str("\r\n");

    Ok((request, host_with_port, String::from(host), use_tls))
}

pub trait ResponseExt {
    fn get_header_value(&self, header_name: &str) -> Option<String>;
}

impl<'a, 'b> ResponseExt for httparse::Response<'a, 'b> {
    fn get_header_value(&self, header_name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(header_name))
            .map(|header| String::from_utf8_lossy(header.value).to_string())
    }
}

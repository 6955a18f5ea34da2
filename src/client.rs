//! MANAGESIEVE client (RFC 5804).
//!
//! Line-oriented protocol over a TCP stream, optionally upgraded to TLS
//! with STARTTLS. Responses end with an `OK`/`NO`/`BYE` line; payloads may
//! arrive as `{N}`/`{N+}` length-prefixed literals which are read exactly
//! and atomically with respect to the following lines. One command is
//! outstanding at a time; the connection is owned by the client and closed
//! on logout or drop.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use nom::{
    IResult, Parser as _,
    bytes::complete::take_until,
    character::complete::{char, space0},
    combinator::opt,
};
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{TlsConnector, client::TlsStream};
use tracing::{debug, trace};

use crate::sasl::DigestMd5;

/// Default MANAGESIEVE port.
pub const DEFAULT_PORT: u16 = 4190;

const CRLF: &[u8] = b"\r\n";
const READ_SIZE: usize = 4096;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Supported SASL mechanisms, strongest first.
const SUPPORTED_AUTH_MECHS: [&str; 4] = ["DIGEST-MD5", "PLAIN", "LOGIN", "OAUTHBEARER"];

#[derive(Debug, Error)]
pub enum ManageSieveError {
    #[error("Connection to server failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("Failed to read data from the server")]
    Timeout,
    #[error("Connection closed by server")]
    Bye,
    #[error("Unexpected end of stream")]
    Closed,
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("Not connected to a server")]
    NotConnected,
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// The transport under the protocol: plain TCP until STARTTLS upgrades it.
enum Transport {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(test)]
    Mem(tokio::io::DuplexStream),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(test)]
            Transport::Mem(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(test)]
            Transport::Mem(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(test)]
            Transport::Mem(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(test)]
            Transport::Mem(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Server capabilities, restricted to the set RFC 5804 defines.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub implementation: Option<String>,
    pub sasl: Vec<String>,
    sieve: Option<String>,
    pub starttls: bool,
    pub notify: Vec<String>,
    pub language: Option<String>,
    pub version: Option<String>,
}

impl Capabilities {
    fn update(&mut self, name: String, value: Option<String>) {
        match name.to_uppercase().as_str() {
            "IMPLEMENTATION" => self.implementation = value,
            "SASL" => {
                self.sasl = value
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(|s| s.to_string())
                    .collect();
            }
            "SIEVE" => self.sieve = value,
            "STARTTLS" => self.starttls = true,
            "NOTIFY" => {
                self.notify = value
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(|s| s.to_string())
                    .collect();
            }
            "LANGUAGE" => self.language = value,
            "VERSION" => self.version = value,
            _ => {}
        }
    }

    /// The SIEVE extension list, split on demand from the raw value.
    pub fn sieve_extensions(&self) -> Vec<String> {
        self.sieve
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RespCode {
    Ok,
    No,
    Bye,
}

/// One server line, classified. `Literal` and `Done` drive the response
/// reader and never escape to callers.
enum Line {
    Data(Vec<u8>),
    Literal(usize),
    Done {
        code: RespCode,
        data: Option<String>,
    },
}

/// Command arguments: strings are quoted on the wire, literals and sizes
/// are passed through verbatim.
enum Param {
    Quoted(String),
    Raw(String),
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

fn parse_capability_line(input: &str) -> IResult<&str, (String, Option<String>)> {
    let (input, name) = parse_quoted_string(input)?;
    let (input, _) = space0(input)?;
    let (input, value) = opt(parse_quoted_string).parse(input)?;
    Ok((input, (name, value)))
}

/// `{N}` / `{N+}` literal-length announcement at the start of a line.
fn parse_literal_length(line: &str) -> Option<usize> {
    let rest = line.strip_prefix('{')?;
    let end = rest.find('}')?;
    let digits = rest[..end].strip_suffix('+').unwrap_or(&rest[..end]);
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// `OK`/`NO`/`BYE` final response line with its optional payload.
fn parse_response_line(line: &str) -> Option<(RespCode, Option<String>)> {
    for (tag, code) in [
        ("OK", RespCode::Ok),
        ("NO", RespCode::No),
        ("BYE", RespCode::Bye),
    ] {
        if line.len() >= tag.len()
            && line.as_bytes()[..tag.len()].eq_ignore_ascii_case(tag.as_bytes())
        {
            let rest = &line[tag.len()..];
            if rest.is_empty() {
                return Some((code, None));
            }
            if rest.starts_with(' ') || rest.starts_with('\t') {
                let rest = rest.trim();
                let data = (!rest.is_empty()).then(|| rest.to_string());
                return Some((code, data));
            }
        }
    }
    None
}

/// Split a `NO` payload into its parenthesised machine code and the
/// human-readable message.
fn parse_error_text(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix('(') {
        if let Some(end) = rest.find(')') {
            let code = rest[..end].to_string();
            let msg = rest[end + 1..].trim().trim_matches('"').to_string();
            return (Some(code), msg);
        }
    }
    (None, trimmed.trim_matches('"').to_string())
}

fn classify_line(line: Vec<u8>) -> Result<Line, ManageSieveError> {
    let text = String::from_utf8_lossy(&line);
    if text.starts_with('{') {
        if let Some(size) = parse_literal_length(&text) {
            return Ok(Line::Literal(size));
        }
    }
    if let Some((code, data)) = parse_response_line(&text) {
        if code == RespCode::Bye {
            return Err(ManageSieveError::Bye);
        }
        return Ok(Line::Done { code, data });
    }
    Ok(Line::Data(line))
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == CRLF)
}

/// MANAGESIEVE client. One outstanding command at a time; every
/// script-management verb requires a successful [`Client::authenticate`].
pub struct Client {
    host: String,
    port: u16,
    transport: Option<Transport>,
    read_buffer: Vec<u8>,
    read_timeout: Duration,
    authenticated: bool,
    capabilities: Capabilities,
    errcode: Option<String>,
    errmsg: Option<String>,
}

impl Client {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            transport: None,
            read_buffer: Vec::new(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            authenticated: false,
            capabilities: Capabilities::default(),
            errcode: None,
            errmsg: None,
        }
    }

    /// Timeout applied to every blocking read (default 5 seconds).
    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    /// Capabilities announced by the server at connect / after STARTTLS.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Machine-readable code of the last `NO` response, if any.
    pub fn errcode(&self) -> Option<&str> {
        self.errcode.as_deref()
    }

    /// Human-readable message of the last `NO` response.
    pub fn errmsg(&self) -> Option<&str> {
        self.errmsg.as_deref()
    }

    pub fn implementation(&self) -> Option<&str> {
        self.capabilities.implementation.as_deref()
    }

    pub fn sasl_mechanisms(&self) -> &[String] {
        &self.capabilities.sasl
    }

    pub fn has_tls_support(&self) -> bool {
        self.capabilities.starttls
    }

    pub fn sieve_extensions(&self) -> Vec<String> {
        self.capabilities.sieve_extensions()
    }

    /// Open the TCP connection and read the capability greeting.
    pub async fn connect(&mut self) -> Result<(), ManageSieveError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| ManageSieveError::ConnectionFailed(e.to_string()))?;
        self.transport = Some(Transport::Tcp(stream));
        if !self.read_greeting().await? {
            return Err(ManageSieveError::Protocol(
                "failed to read capabilities from server".to_string(),
            ));
        }
        Ok(())
    }

    async fn read_greeting(&mut self) -> Result<bool, ManageSieveError> {
        self.capabilities = Capabilities::default();
        let (code, _, content) = self.read_response(None).await?;
        if code == Some(RespCode::No) {
            return Ok(false);
        }
        self.ingest_capabilities(&content);
        Ok(true)
    }

    fn ingest_capabilities(&mut self, content: &[u8]) {
        let text = String::from_utf8_lossy(content);
        for line in text.lines() {
            if let Ok(("", (name, value))) = parse_capability_line(line.trim()) {
                self.capabilities.update(name, value);
            }
        }
    }

    async fn recv(&mut self) -> Result<(), ManageSieveError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ManageSieveError::NotConnected)?;
        let mut chunk = [0u8; READ_SIZE];
        let n = timeout(self.read_timeout, transport.read(&mut chunk))
            .await
            .map_err(|_| ManageSieveError::Timeout)??;
        if n == 0 {
            return Err(ManageSieveError::Closed);
        }
        trace!("S: {:?}", String::from_utf8_lossy(&chunk[..n]));
        self.read_buffer.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Read exactly `size` bytes, coalescing partial receives.
    async fn read_block(&mut self, size: usize) -> Result<Vec<u8>, ManageSieveError> {
        while self.read_buffer.len() < size {
            self.recv().await?;
        }
        Ok(self.read_buffer.drain(..size).collect())
    }

    /// Read one CRLF-terminated line and classify it.
    async fn read_line(&mut self) -> Result<Line, ManageSieveError> {
        loop {
            if let Some(pos) = find_crlf(&self.read_buffer) {
                let line: Vec<u8> = self.read_buffer.drain(..pos).collect();
                self.read_buffer.drain(..CRLF.len());
                return classify_line(line);
            }
            self.recv().await?;
        }
    }

    /// Record the details of a `NO` response. The message may itself be
    /// delivered as a literal.
    async fn record_error(&mut self, data: Option<String>) -> Result<(), ManageSieveError> {
        let Some(text) = data else {
            self.errcode = None;
            self.errmsg = Some(String::new());
            return Ok(());
        };
        if text.starts_with('{') {
            if let Some(size) = parse_literal_length(&text) {
                self.errcode = None;
                let block = self.read_block(size + CRLF.len()).await?;
                self.errmsg = Some(
                    String::from_utf8_lossy(&block)
                        .trim_end_matches(['\r', '\n'])
                        .to_string(),
                );
                return Ok(());
            }
        }
        let (code, msg) = parse_error_text(&text);
        self.errcode = code;
        self.errmsg = Some(msg);
        Ok(())
    }

    /// Accumulate data lines (and literal payloads) until the final
    /// response line, or until `nblines` lines have been read.
    async fn read_response(
        &mut self,
        nblines: Option<usize>,
    ) -> Result<(Option<RespCode>, Option<String>, Vec<u8>), ManageSieveError> {
        let mut resp: Vec<u8> = Vec::new();
        let mut final_code = None;
        let mut final_data = None;
        let mut count = 0usize;
        loop {
            match self.read_line().await? {
                Line::Done { code, data } => {
                    if code == RespCode::No {
                        self.record_error(data.clone()).await?;
                    }
                    final_code = Some(code);
                    final_data = data;
                    break;
                }
                Line::Literal(size) => {
                    let block = self.read_block(size).await?;
                    resp.extend_from_slice(&block);
                    if !resp.ends_with(CRLF) {
                        match self.read_line().await? {
                            Line::Data(rest) => {
                                resp.extend_from_slice(&rest);
                                resp.extend_from_slice(CRLF);
                            }
                            Line::Done { code, data } => {
                                if code == RespCode::No {
                                    self.record_error(data.clone()).await?;
                                }
                                final_code = Some(code);
                                final_data = data;
                                break;
                            }
                            Line::Literal(_) => {
                                return Err(ManageSieveError::Protocol(
                                    "unexpected literal inside a literal".to_string(),
                                ));
                            }
                        }
                    }
                    count += 1;
                    if nblines.is_some_and(|limit| count >= limit) {
                        break;
                    }
                }
                Line::Data(line) => {
                    if line.is_empty() {
                        continue;
                    }
                    resp.extend_from_slice(&line);
                    resp.extend_from_slice(CRLF);
                    count += 1;
                    if nblines.is_some_and(|limit| count >= limit) {
                        break;
                    }
                }
            }
        }
        Ok((final_code, final_data, resp))
    }

    async fn send_command(
        &mut self,
        name: &str,
        params: &[Param],
        extralines: &[String],
        nblines: Option<usize>,
    ) -> Result<(Option<RespCode>, Option<String>, Vec<u8>), ManageSieveError> {
        let mut line = name.to_string();
        for param in params {
            line.push(' ');
            match param {
                Param::Quoted(value) => {
                    line.push('"');
                    line.push_str(value);
                    line.push('"');
                }
                Param::Raw(value) => line.push_str(value),
            }
        }
        debug!("C: {}", name);
        let transport = self
            .transport
            .as_mut()
            .ok_or(ManageSieveError::NotConnected)?;
        transport.write_all(line.as_bytes()).await?;
        transport.write_all(CRLF).await?;
        for extra in extralines {
            transport.write_all(extra.as_bytes()).await?;
            transport.write_all(CRLF).await?;
        }
        transport.flush().await?;
        self.read_response(nblines).await
    }

    /// Script content framed as a non-blocking literal: `{N+}CRLF<bytes>`.
    fn prepare_content(content: &str) -> Param {
        Param::Raw(format!("{{{}+}}\r\n{}", content.len(), content))
    }

    fn require_auth(&self) -> Result<(), ManageSieveError> {
        if self.authenticated {
            Ok(())
        } else {
            Err(ManageSieveError::AuthenticationRequired)
        }
    }

    /// Upgrade the connection with STARTTLS and re-read the capabilities
    /// the server must re-issue over TLS.
    pub async fn starttls(&mut self) -> Result<bool, ManageSieveError> {
        if !self.capabilities.starttls {
            return Err(ManageSieveError::Protocol(
                "STARTTLS not supported by the server".to_string(),
            ));
        }
        let (code, _, _) = self.send_command("STARTTLS", &[], &[], None).await?;
        if code != Some(RespCode::Ok) {
            return Ok(false);
        }
        let transport = self
            .transport
            .take()
            .ok_or(ManageSieveError::NotConnected)?;
        let Transport::Tcp(stream) = transport else {
            return Err(ManageSieveError::Protocol(
                "connection is already using TLS".to_string(),
            ));
        };

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let domain = ServerName::try_from(self.host.clone())
            .map_err(|_| ManageSieveError::Protocol("invalid hostname".to_string()))?;
        let tls_stream = connector.connect(domain, stream).await?;
        self.transport = Some(Transport::Tls(Box::new(tls_stream)));
        self.read_buffer.clear();
        self.read_greeting().await?;
        Ok(true)
    }

    /// Authenticate with the given mechanism, or with the strongest
    /// mechanism both sides support. A single attempt is made.
    pub async fn authenticate(
        &mut self,
        login: &str,
        password: &str,
        authz_id: &str,
        authmech: Option<&str>,
    ) -> Result<bool, ManageSieveError> {
        if self.capabilities.sasl.is_empty() {
            return Err(ManageSieveError::Protocol(
                "SASL not supported by the server".to_string(),
            ));
        }
        let advertised = self.capabilities.sasl.clone();
        let mechanism = match authmech {
            Some(named) => {
                let named = named.to_uppercase();
                if SUPPORTED_AUTH_MECHS.contains(&named.as_str())
                    && advertised.iter().any(|m| *m == named)
                {
                    Some(named)
                } else {
                    None
                }
            }
            None => SUPPORTED_AUTH_MECHS
                .iter()
                .find(|m| advertised.iter().any(|a| a == *m))
                .map(|m| m.to_string()),
        };
        let Some(mechanism) = mechanism else {
            self.errmsg = Some("No suitable mechanism found".to_string());
            return Ok(false);
        };

        let ok = match mechanism.as_str() {
            "DIGEST-MD5" => self.digest_md5_auth(login, password, authz_id).await?,
            "PLAIN" => self.plain_auth(login, password, authz_id).await?,
            "LOGIN" => self.login_auth(login, password).await?,
            "OAUTHBEARER" => self.oauthbearer_auth(login, password).await?,
            _ => false,
        };
        if ok {
            self.authenticated = true;
        }
        Ok(ok)
    }

    async fn plain_auth(
        &mut self,
        login: &str,
        password: &str,
        authz_id: &str,
    ) -> Result<bool, ManageSieveError> {
        let blob = general_purpose::STANDARD.encode(format!("{authz_id}\0{login}\0{password}"));
        let (code, _, _) = self
            .send_command(
                "AUTHENTICATE",
                &[Param::Quoted("PLAIN".to_string()), Param::Quoted(blob)],
                &[],
                None,
            )
            .await?;
        Ok(code == Some(RespCode::Ok))
    }

    async fn login_auth(&mut self, login: &str, password: &str) -> Result<bool, ManageSieveError> {
        let extralines = vec![
            format!("\"{}\"", general_purpose::STANDARD.encode(login)),
            format!("\"{}\"", general_purpose::STANDARD.encode(password)),
        ];
        let (code, _, _) = self
            .send_command(
                "AUTHENTICATE",
                &[Param::Quoted("LOGIN".to_string())],
                &extralines,
                None,
            )
            .await?;
        Ok(code == Some(RespCode::Ok))
    }

    async fn oauthbearer_auth(
        &mut self,
        login: &str,
        token: &str,
    ) -> Result<bool, ManageSieveError> {
        let blob = general_purpose::STANDARD
            .encode(format!("n,a={login},\x01auth=Bearer {token}\x01\x01"));
        let (code, _, _) = self
            .send_command(
                "AUTHENTICATE",
                &[Param::Quoted("OAUTHBEARER".to_string()), Param::Quoted(blob)],
                &[],
                None,
            )
            .await?;
        Ok(code == Some(RespCode::Ok))
    }

    async fn digest_md5_auth(
        &mut self,
        login: &str,
        password: &str,
        authz_id: &str,
    ) -> Result<bool, ManageSieveError> {
        let (code, _, challenge) = self
            .send_command(
                "AUTHENTICATE",
                &[Param::Quoted("DIGEST-MD5".to_string())],
                &[],
                Some(1),
            )
            .await?;
        if code == Some(RespCode::No) {
            return Ok(false);
        }
        let challenge = String::from_utf8_lossy(&challenge).to_string();
        let digest_uri = format!("sieve/{}", self.host);
        let dmd5 = DigestMd5::new(&challenge, &digest_uri)
            .map_err(|e| ManageSieveError::Protocol(e.to_string()))?;
        let response = dmd5.response(login, password, authz_id);

        let (code, _, rspauth) = self
            .send_command(&format!("\"{response}\""), &[], &[], Some(1))
            .await?;
        if code == Some(RespCode::No) || rspauth.is_empty() {
            return Ok(false);
        }
        let rspauth = String::from_utf8_lossy(&rspauth).to_string();
        if !dmd5.check_last_challenge(login, password, rspauth.trim()) {
            self.errmsg = Some("Bad challenge received from server".to_string());
            return Ok(false);
        }
        let (code, _, _) = self.send_command("\"\"", &[], &[], None).await?;
        Ok(code == Some(RespCode::Ok))
    }

    /// Ask for the capability listing. Does not affect the set recorded
    /// at connect time.
    pub async fn capability(&mut self) -> Result<Option<String>, ManageSieveError> {
        let (code, _, content) = self.send_command("CAPABILITY", &[], &[], None).await?;
        Ok((code == Some(RespCode::Ok)).then(|| String::from_utf8_lossy(&content).to_string()))
    }

    /// Whether the server can store a script of the given size.
    pub async fn havespace(
        &mut self,
        name: &str,
        size: usize,
    ) -> Result<bool, ManageSieveError> {
        self.require_auth()?;
        let (code, _, _) = self
            .send_command(
                "HAVESPACE",
                &[Param::Quoted(name.to_string()), Param::Raw(size.to_string())],
                &[],
                None,
            )
            .await?;
        Ok(code == Some(RespCode::Ok))
    }

    /// List stored scripts: the active one (if any) and the others.
    pub async fn listscripts(
        &mut self,
    ) -> Result<Option<(Option<String>, Vec<String>)>, ManageSieveError> {
        self.require_auth()?;
        let (code, _, listing) = self.send_command("LISTSCRIPTS", &[], &[], None).await?;
        if code == Some(RespCode::No) {
            return Ok(None);
        }
        let mut active = None;
        let mut scripts = Vec::new();
        let text = String::from_utf8_lossy(&listing).to_string();
        for line in text.lines() {
            if line.is_empty() || line.starts_with('{') {
                continue;
            }
            match parse_quoted_string(line) {
                Ok((rest, name)) if !rest.trim().is_empty() => {
                    if rest.trim().eq_ignore_ascii_case("ACTIVE") {
                        active = Some(name);
                    } else {
                        scripts.push(name);
                    }
                }
                Ok((_, name)) => scripts.push(name),
                // Names delivered as literals arrive unquoted.
                Err(_) => scripts.push(line.trim_matches('"').to_string()),
            }
        }
        Ok(Some((active, scripts)))
    }

    /// Download a script. `None` when the server answers `NO`.
    pub async fn getscript(&mut self, name: &str) -> Result<Option<String>, ManageSieveError> {
        self.require_auth()?;
        let (code, _, content) = self
            .send_command("GETSCRIPT", &[Param::Quoted(name.to_string())], &[], None)
            .await?;
        if code != Some(RespCode::Ok) {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&content).to_string();
        let mut lines: Vec<&str> = text.lines().collect();
        if lines.first().is_some_and(|l| l.starts_with('{')) {
            lines.remove(0);
        }
        Ok(Some(lines.join("\n")))
    }

    /// Upload a script under the given name.
    pub async fn putscript(
        &mut self,
        name: &str,
        content: &str,
    ) -> Result<bool, ManageSieveError> {
        self.require_auth()?;
        let (code, _, _) = self
            .send_command(
                "PUTSCRIPT",
                &[
                    Param::Quoted(name.to_string()),
                    Self::prepare_content(content),
                ],
                &[],
                None,
            )
            .await?;
        Ok(code == Some(RespCode::Ok))
    }

    pub async fn deletescript(&mut self, name: &str) -> Result<bool, ManageSieveError> {
        self.require_auth()?;
        let (code, _, _) = self
            .send_command("DELETESCRIPT", &[Param::Quoted(name.to_string())], &[], None)
            .await?;
        Ok(code == Some(RespCode::Ok))
    }

    /// Make the named script active; an empty name disables filtering.
    pub async fn setactive(&mut self, name: &str) -> Result<bool, ManageSieveError> {
        self.require_auth()?;
        let (code, _, _) = self
            .send_command("SETACTIVE", &[Param::Quoted(name.to_string())], &[], None)
            .await?;
        Ok(code == Some(RespCode::Ok))
    }

    /// Ask the server to validate a script without storing it. Only
    /// available on RFC 5804 servers (`VERSION` capability).
    pub async fn checkscript(&mut self, content: &str) -> Result<bool, ManageSieveError> {
        self.require_auth()?;
        if self.capabilities.version.is_none() {
            return Err(ManageSieveError::Protocol(
                "server does not support the CHECKSCRIPT command".to_string(),
            ));
        }
        let (code, _, _) = self
            .send_command("CHECKSCRIPT", &[Self::prepare_content(content)], &[], None)
            .await?;
        Ok(code == Some(RespCode::Ok))
    }

    /// Rename a script. Pre-RFC-5804 servers (no `VERSION` capability)
    /// lack RENAMESCRIPT, so the rename is emulated with a copy; a failing
    /// step aborts without rollback.
    pub async fn renamescript(
        &mut self,
        old_name: &str,
        new_name: &str,
    ) -> Result<bool, ManageSieveError> {
        self.require_auth()?;
        if self.capabilities.version.is_some() {
            let (code, _, _) = self
                .send_command(
                    "RENAMESCRIPT",
                    &[
                        Param::Quoted(old_name.to_string()),
                        Param::Quoted(new_name.to_string()),
                    ],
                    &[],
                    None,
                )
                .await?;
            return Ok(code == Some(RespCode::Ok));
        }

        let Some((active, scripts)) = self.listscripts().await? else {
            return Ok(false);
        };
        let old_is_active = active.as_deref() == Some(old_name);
        if !old_is_active && !scripts.iter().any(|s| s == old_name) {
            self.errmsg = Some("Old script does not exist".to_string());
            return Ok(false);
        }
        if active.as_deref() == Some(new_name) || scripts.iter().any(|s| s == new_name) {
            self.errmsg = Some("New script already exists".to_string());
            return Ok(false);
        }
        let Some(content) = self.getscript(old_name).await? else {
            return Ok(false);
        };
        if !self.putscript(new_name, &content).await? {
            return Ok(false);
        }
        if old_is_active && !self.setactive(new_name).await? {
            return Ok(false);
        }
        self.deletescript(old_name).await
    }

    /// Say goodbye and drop the connection. Best effort: transport errors
    /// during the farewell are ignored.
    pub async fn logout(&mut self) {
        if self.transport.is_some() {
            let _ = self.send_command("LOGOUT", &[], &[], None).await;
        }
        self.transport = None;
        self.authenticated = false;
        self.read_buffer.clear();
    }
}

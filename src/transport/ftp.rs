//! FTP backend (passive mode)
//!
//! Two modes:
//! - no `ftp_file_pattern`: the URL path is retrieved and becomes the body
//! - with a pattern: the working directory is listed, every matching name is
//!   retrieved into `ftp_output_dir` and the body is the newline-separated
//!   list of stored names
//!
//! FTP outcomes are never written to the response cache.

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use reqwest::Url;
use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use super::decode::check_body;
use super::error::TransportError;
use super::traits::{FetchContext, Outcome, TransportBackend};
use crate::cache::HeadersMap;
use crate::storage::ArtifactSink;

const DEFAULT_PORT: u16 = 21;
const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";
/// Reported as the status of a completed transfer
const TRANSFER_COMPLETE: u16 = 226;

static PASV_REPLY: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)"));

#[derive(Debug, Default)]
pub struct FtpBackend;

impl FtpBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportBackend for FtpBackend {
    fn scheme(&self) -> &'static str {
        "ftp"
    }

    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Outcome, TransportError> {
        let request = ctx.request;
        let url = Url::parse(&request.source)
            .map_err(|e| TransportError::InvalidSource(format!("{}: {e}", request.source)))?;
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidSource(format!("{}: no host", request.source)))?;
        if request.ftp_file_pattern.is_some() && request.ftp_output_dir.is_none() {
            return Err(TransportError::InvalidSource(
                "ftp_file_pattern requires ftp_output_dir".to_string(),
            ));
        }

        let ip = ctx.resolve(host).await?;
        let started = Instant::now();
        let mut session =
            Session::connect(SocketAddr::new(ip, url.port().unwrap_or(DEFAULT_PORT))).await?;

        let user = request
            .username
            .as_deref()
            .or((!url.username().is_empty()).then(|| url.username()))
            .unwrap_or(ANONYMOUS_USER);
        let password = request
            .password
            .as_deref()
            .or(url.password())
            .unwrap_or(ANONYMOUS_PASSWORD);
        session.login(user, password).await?;
        session.expect("TYPE I", &[200]).await?;

        let body = match (&request.ftp_file_pattern, &request.ftp_output_dir) {
            (Some(pattern), Some(output_dir)) => {
                let cwd = request.ftp_cwd.as_deref().unwrap_or("/");
                session.expect(&format!("CWD {cwd}"), &[250]).await?;

                let listing = session.transfer("NLST").await?;
                let names = matching_names(&listing, pattern);
                let sink = ArtifactSink::local(output_dir)?;
                let mut stored = Vec::with_capacity(names.len());
                for name in &names {
                    let data = session.transfer(&format!("RETR {name}")).await?;
                    stored.push(sink.put(name, data).await?.name);
                }
                debug!(request_id = %request.id, count = stored.len(), "Retrieved listed files");
                Bytes::from(stored.join("\n"))
            }
            _ => {
                let path = url.path();
                if path.is_empty() || path.ends_with('/') {
                    return Err(TransportError::InvalidSource(format!(
                        "{}: no file to retrieve",
                        request.source
                    )));
                }
                session.transfer(&format!("RETR {path}")).await?
            }
        };
        session.quit().await;
        let elapsed = started.elapsed();

        check_body(request, &body)?;

        Ok(Outcome {
            body,
            status: TRANSFER_COMPLETE,
            headers: HeadersMap::new(),
            elapsed,
            final_url: None,
            was_compressed: false,
            decompression: None,
            cacheable: false,
        })
    }
}

/// Bare file names from an NLST listing that match `pattern`
fn matching_names(listing: &[u8], pattern: &Regex) -> Vec<String> {
    String::from_utf8_lossy(listing)
        .lines()
        .map(str::trim)
        .filter_map(|line| line.rsplit('/').next())
        .filter(|name| !name.is_empty() && pattern.is_match(name))
        .map(str::to_string)
        .collect()
}

fn parse_pasv_port(text: &str) -> Result<u16, TransportError> {
    let re = PASV_REPLY
        .as_ref()
        .map_err(|e| TransportError::Protocol(e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| TransportError::Protocol(format!("unparseable PASV reply: {text}")))?;
    let octet = |i: usize| -> Result<u16, TransportError> {
        caps[i]
            .parse::<u8>()
            .map(u16::from)
            .map_err(|_| TransportError::Protocol(format!("bad PASV value: {}", &caps[i])))
    };
    Ok(octet(5)? * 256 + octet(6)?)
}

#[derive(Debug)]
struct Reply {
    code: u16,
    text: String,
}

/// Control connection
struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: IpAddr,
}

impl Session {
    async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        let (read, writer) = stream.into_split();
        let mut session = Self {
            reader: BufReader::new(read),
            writer,
            peer: addr.ip(),
        };
        session.expect_reply("greeting", &[220]).await?;
        Ok(session)
    }

    async fn read_reply(&mut self) -> Result<Reply, TransportError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(TransportError::Protocol("control connection closed".to_string()));
        }
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| TransportError::Protocol(format!("malformed reply: {}", line.trim())))?;

        // Multi-line replies run until a line starting with "<code> "
        if line.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                let mut next = String::new();
                if self.reader.read_line(&mut next).await? == 0 {
                    return Err(TransportError::Protocol(
                        "control connection closed".to_string(),
                    ));
                }
                line.push_str(&next);
                if next.starts_with(&terminator) {
                    break;
                }
            }
        }

        Ok(Reply {
            code,
            text: line.trim().to_string(),
        })
    }

    async fn expect_reply(&mut self, what: &str, accepted: &[u16]) -> Result<Reply, TransportError> {
        let reply = self.read_reply().await?;
        if accepted.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(TransportError::Protocol(format!("{what} rejected: {}", reply.text)))
        }
    }

    async fn send(&mut self, command: &str) -> Result<(), TransportError> {
        self.writer
            .write_all(format!("{command}\r\n").as_bytes())
            .await?;
        Ok(())
    }

    async fn expect(&mut self, command: &str, accepted: &[u16]) -> Result<Reply, TransportError> {
        self.send(command).await?;
        let verb = command.split(' ').next().unwrap_or(command);
        self.expect_reply(verb, accepted).await
    }

    async fn login(&mut self, user: &str, password: &str) -> Result<(), TransportError> {
        let reply = self.expect(&format!("USER {user}"), &[230, 331, 332]).await?;
        if reply.code != 230 {
            self.expect(&format!("PASS {password}"), &[202, 230]).await?;
        }
        Ok(())
    }

    async fn passive(&mut self) -> Result<TcpStream, TransportError> {
        let reply = self.expect("PASV", &[227]).await?;
        let port = parse_pasv_port(&reply.text)?;
        // The advertised host is ignored; servers behind NAT often report a private one
        Ok(TcpStream::connect((self.peer, port)).await?)
    }

    /// Run a data-channel command and collect everything it sends
    async fn transfer(&mut self, command: &str) -> Result<Bytes, TransportError> {
        let mut data = self.passive().await?;
        self.expect(command, &[125, 150]).await?;

        let mut buf = Vec::new();
        data.read_to_end(&mut buf).await?;
        drop(data);

        self.expect_reply(command, &[226, 250]).await?;
        Ok(Bytes::from(buf))
    }

    async fn quit(mut self) {
        if self.send("QUIT").await.is_ok() {
            let _ = self.read_reply().await;
        }
    }
}

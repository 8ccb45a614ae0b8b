use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

use crate::error::ProbeError;
use crate::probe::tcp::{read_banner, resolve};
use crate::probe::{HttpRequest, ServiceKind, ServiceProber, WebClient};
use crate::target::Host;
use crate::types::ServiceDetails;

const DIALOG_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REPLY_LINES: usize = 64;

/// Banner grabbing plus HTTP, FTP, SSH and SMB enumeration.
///
/// SMB share listing shells out to `smbclient -L <host> -N`; when the tool is
/// missing the details carry the error instead.
pub struct BannerProber {
    web: Arc<dyn WebClient>,
    http_timeout: Duration,
}

impl BannerProber {
    pub fn new(web: Arc<dyn WebClient>, http_timeout: Duration) -> Self {
        Self { web, http_timeout }
    }

    async fn open(host: &Host, port: u16) -> Result<TcpStream, ProbeError> {
        let ip = resolve(host).await?;
        time::timeout(DIALOG_TIMEOUT, TcpStream::connect(SocketAddr::new(ip, port)))
            .await
            .map_err(|_| ProbeError::Timeout(DIALOG_TIMEOUT))?
            .map_err(ProbeError::from)
    }

    async fn http(&self, host: &Host, port: u16, tls: bool) -> ServiceDetails {
        let scheme = if tls { "https" } else { "http" };
        let url = format!("{scheme}://{}/", host.url_authority(port));
        match self.web.get(&HttpRequest::get(url, self.http_timeout)).await {
            Ok(resp) => ServiceDetails::Http {
                status_code: Some(resp.status),
                server: resp.header("server").map(str::to_string),
                powered_by: resp.header("x-powered-by").map(str::to_string),
                content_length: resp
                    .header("content-length")
                    .and_then(|v| v.trim().parse().ok())
                    .or(Some(resp.body.len() as u64)),
                error: None,
            },
            Err(e) => ServiceDetails::Http {
                status_code: None,
                server: None,
                powered_by: None,
                content_length: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn ftp(&self, host: &Host, port: u16) -> ServiceDetails {
        match ftp_dialog(host, port).await {
            Ok((welcome_message, anonymous_login)) => ServiceDetails::Ftp {
                anonymous_login,
                welcome_message,
                error: None,
            },
            Err(e) => ServiceDetails::Ftp {
                anonymous_login: false,
                welcome_message: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn ssh(&self, host: &Host, port: u16) -> ServiceDetails {
        match ssh_greeting(host, port).await {
            Ok(line) if line.starts_with("SSH-") => ServiceDetails::Ssh {
                version: Some(line),
                error: None,
            },
            Ok(line) => ServiceDetails::Ssh {
                version: None,
                error: Some(format!("unexpected greeting {line:?}")),
            },
            Err(e) => ServiceDetails::Ssh {
                version: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn smb(&self, host: &Host) -> ServiceDetails {
        match list_smb_shares(host, self.http_timeout).await {
            Ok(shares) => ServiceDetails::Smb {
                shares,
                error: None,
            },
            Err(e) => ServiceDetails::Smb {
                shares: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}

#[async_trait]
impl ServiceProber for BannerProber {
    async fn grab_banner(&self, host: &Host, port: u16, timeout: Duration) -> Option<String> {
        let ip = resolve(host).await.ok()?;
        let mut stream = time::timeout(timeout, TcpStream::connect(SocketAddr::new(ip, port)))
            .await
            .ok()?
            .ok()?;
        read_banner(&mut stream, 1024, timeout).await
    }

    async fn probe(&self, host: &Host, port: u16, kind: ServiceKind) -> ServiceDetails {
        debug!(%host, port, ?kind, "protocol probe");
        match kind {
            ServiceKind::Http { tls } => self.http(host, port, tls).await,
            ServiceKind::Ftp => self.ftp(host, port).await,
            ServiceKind::Ssh => self.ssh(host, port).await,
            ServiceKind::Smb => self.smb(host).await,
            ServiceKind::Other => ServiceDetails::Unknown {
                raw: BTreeMap::new(),
            },
        }
    }
}

async fn read_reply<R>(reader: &mut R) -> Result<String, ProbeError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    time::timeout(DIALOG_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| ProbeError::Timeout(DIALOG_TIMEOUT))??;
    Ok(line.trim().to_string())
}

async fn ssh_greeting(host: &Host, port: u16) -> Result<String, ProbeError> {
    let stream = BannerProber::open(host, port).await?;
    read_reply(&mut BufReader::new(stream)).await
}

/// Leading FTP reply code, e.g. `230` from `230 Login successful.`
fn reply_code(line: &str) -> Option<u16> {
    line.get(..3)?.parse().ok()
}

/// One complete FTP reply. A `NNN-` first line opens a multi-line reply that
/// runs until a line starting `NNN ` with the same code.
async fn read_ftp_reply<R>(reader: &mut R) -> Result<(u16, Vec<String>), ProbeError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut lines: Vec<String> = Vec::new();
    let mut code = None;
    while lines.len() < MAX_REPLY_LINES {
        let mut raw = String::new();
        let n = time::timeout(DIALOG_TIMEOUT, reader.read_line(&mut raw))
            .await
            .map_err(|_| ProbeError::Timeout(DIALOG_TIMEOUT))??;
        if n == 0 {
            let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed mid-reply");
            return Err(eof.into());
        }
        let line = raw.trim_end().to_string();
        let this = reply_code(&line);
        let expected = match code {
            Some(c) => c,
            None => {
                let c = this.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("not an FTP reply: {line:?}"))
                })?;
                code = Some(c);
                c
            }
        };
        let last = this == Some(expected) && line.as_bytes().get(3) != Some(&b'-');
        lines.push(line);
        if last {
            return Ok((expected, lines));
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "FTP reply too long").into())
}

/// Welcome, then `USER anonymous` / `PASS`; `230` means anonymous access.
async fn ftp_dialog(host: &Host, port: u16) -> Result<(Option<String>, bool), ProbeError> {
    let stream = BannerProber::open(host, port).await?;
    let mut reader = BufReader::new(stream);

    let (_, welcome) = read_ftp_reply(&mut reader).await?;
    let welcome = welcome.join("\n");
    let welcome_message = (!welcome.is_empty()).then_some(welcome);

    reader.get_mut().write_all(b"USER anonymous\r\n").await?;
    let (mut code, _) = read_ftp_reply(&mut reader).await?;
    if code == 331 {
        reader
            .get_mut()
            .write_all(b"PASS anonymous@example.com\r\n")
            .await?;
        code = read_ftp_reply(&mut reader).await?.0;
    }
    let _ = reader.get_mut().write_all(b"QUIT\r\n").await;
    Ok((welcome_message, code == 230))
}

async fn list_smb_shares(host: &Host, timeout: Duration) -> Result<Vec<String>, ProbeError> {
    let mut cmd = Command::new("smbclient");
    cmd.arg("-L")
        .arg(host.to_string())
        .arg("-N")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    let output = time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Tool {
            tool: "smbclient".into(),
            message: e.to_string(),
        })?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() && stdout.trim().is_empty() {
        return Err(ProbeError::Tool {
            tool: "smbclient".into(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(parse_share_listing(&stdout))
}

/// Share names from `smbclient -L` output (`\tNAME  Disk  comment` rows).
pub fn parse_share_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let name = cols.next()?;
            match cols.next()? {
                "Disk" | "IPC" | "Printer" => Some(name.to_string()),
                _ => None,
            }
        })
        .collect()
}

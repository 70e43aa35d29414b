// SPDX-License-Identifier: GPL-3.0-only
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, warn};

use crate::sync::traits::{ConnectionLost, HOME, ProgressFn, RemoteEntry, TransferProgress, Transport};

const CHUNK_SIZE: usize = 8 * 1024;

/// Server reply: three-digit code plus the (possibly multi-line) text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

struct Control {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

/// Passive-mode FTP client over a single control connection
pub struct FtpTransport {
    control: Option<Control>,

    /// Directory the server put us in after login
    home: String,
}

impl FtpTransport {
    pub fn new() -> Self {
        Self {
            control: None,
            home: String::from("/"),
        }
    }

    fn control(&mut self) -> Result<&mut Control> {
        self.control
            .as_mut()
            .ok_or_else(|| ConnectionLost("Not connected".to_string()).into())
    }

    /// Drop the control connection and report it as lost
    fn lost(&mut self, message: String) -> anyhow::Error {
        if self.control.take().is_some() {
            warn!(error = %message, "Control connection lost");
        }
        ConnectionLost(message).into()
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        let verb = line.split(' ').next().unwrap_or_default();
        if verb == "PASS" {
            debug!("-> PASS ****");
        } else {
            debug!(command = %line, "->");
        }
        let written = write_line(self.control()?, line).await;
        written.map_err(|e| self.lost(e.to_string()))
    }

    async fn reply(&mut self) -> Result<Reply> {
        let read = read_reply(&mut self.control()?.reader).await;
        let reply = read.map_err(|e| self.lost(format!("{:#}", e)))?;
        debug!(code = reply.code, text = %reply.text, "<-");
        Ok(reply)
    }

    async fn command(&mut self, line: &str) -> Result<Reply> {
        self.send(line).await?;
        self.reply().await
    }

    /// Run a command that must end in a 2xx reply
    async fn command_ok(&mut self, line: &str) -> Result<Reply> {
        let reply = self.command(line).await?;
        if !reply.is_completion() {
            bail!("{} rejected: {} {}", verb_of(line), reply.code, reply.text);
        }
        Ok(reply)
    }

    async fn open_data(&mut self) -> Result<TcpStream> {
        let peer = self.control()?.peer.ip();
        let reply = self.command("PASV").await?;
        if reply.code != 227 {
            bail!("PASV rejected: {} {}", reply.code, reply.text);
        }
        let addr = parse_pasv(&reply.text, peer)?;
        TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to open data connection to {}", addr))
    }

    /// Send a transfer command and wait for the server to accept it
    async fn start_transfer(&mut self, line: &str) -> Result<()> {
        let reply = self.command(line).await?;
        if !reply.is_preliminary() {
            bail!("{} rejected: {} {}", verb_of(line), reply.code, reply.text);
        }
        Ok(())
    }

    async fn finish_transfer(&mut self, line: &str) -> Result<()> {
        let reply = self.reply().await?;
        if !reply.is_completion() {
            bail!("{} failed: {} {}", verb_of(line), reply.code, reply.text);
        }
        Ok(())
    }
}

impl Default for FtpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FtpTransport {
    async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.control = None;
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        let peer = stream.peer_addr()?;
        let (read_half, writer) = stream.into_split();
        self.control = Some(Control {
            reader: BufReader::new(read_half),
            writer,
            peer,
        });

        let mut greeting = self.reply().await?;
        while greeting.code == 120 {
            greeting = self.reply().await?;
        }
        if greeting.code != 220 {
            self.control = None;
            bail!("Server refused connection: {} {}", greeting.code, greeting.text);
        }
        info!(%peer, "Connected to FTP server");
        Ok(())
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let reply = self.command(&format!("USER {}", username)).await?;
        if reply.is_intermediate() {
            let reply = self.command(&format!("PASS {}", password)).await?;
            if !reply.is_completion() {
                bail!("Login failed: {} {}", reply.code, reply.text);
            }
        } else if !reply.is_completion() {
            bail!("Login failed: {} {}", reply.code, reply.text);
        }

        self.command_ok("TYPE I").await?;

        let pwd = self.command_ok("PWD").await?;
        match parse_pwd(&pwd.text) {
            Some(home) => self.home = home,
            None => warn!(reply = %pwd.text, "Could not parse working directory, assuming /"),
        }
        info!(username, home = %self.home, "Logged in");
        Ok(())
    }

    async fn cd(&mut self, path: &str) -> Result<()> {
        let target = if path == HOME {
            self.home.clone()
        } else {
            path.to_string()
        };
        self.command_ok(&format!("CWD {}", target)).await?;
        Ok(())
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let line = if path.is_empty() || path == "." {
            String::from("LIST")
        } else {
            format!("LIST {}", path)
        };

        let mut data = self.open_data().await?;
        self.start_transfer(&line).await?;
        let mut raw = Vec::new();
        if let Err(e) = data.read_to_end(&mut raw).await {
            return Err(self.lost(format!("Listing interrupted: {}", e)));
        }
        drop(data);
        self.finish_transfer(&line).await?;

        parse_listing(&String::from_utf8_lossy(&raw))
    }

    async fn mkdir(&mut self, name: &str) -> Result<()> {
        self.command_ok(&format!("MKD {}", name)).await?;
        Ok(())
    }

    async fn put(&mut self, data: &[u8], remote_path: &str, progress: ProgressFn<'_>) -> Result<()> {
        let line = format!("STOR {}", remote_path);
        let mut stream = self.open_data().await?;
        self.start_transfer(&line).await?;

        let total = data.len() as u64;
        let mut done = 0u64;
        for chunk in data.chunks(CHUNK_SIZE) {
            if let Err(e) = stream.write_all(chunk).await {
                return Err(self.lost(format!("Upload of {} interrupted: {}", remote_path, e)));
            }
            done += chunk.len() as u64;
            progress(TransferProgress { done, total });
        }
        if let Err(e) = stream.shutdown().await {
            return Err(self.lost(format!("Upload of {} interrupted: {}", remote_path, e)));
        }
        drop(stream);

        self.finish_transfer(&line).await
    }

    async fn remove(&mut self, remote_path: &str) -> Result<()> {
        self.command_ok(&format!("DELE {}", remote_path)).await?;
        Ok(())
    }

    async fn get(&mut self, remote_path: &str, progress: ProgressFn<'_>) -> Result<Vec<u8>> {
        let line = format!("RETR {}", remote_path);
        let mut stream = self.open_data().await?;
        self.start_transfer(&line).await?;

        let mut contents = Vec::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let read = match stream.read(&mut buffer).await {
                Ok(read) => read,
                Err(e) => {
                    return Err(self.lost(format!("Download of {} interrupted: {}", remote_path, e)));
                }
            };
            if read == 0 {
                break;
            }
            contents.extend_from_slice(&buffer[..read]);
            progress(TransferProgress {
                done: contents.len() as u64,
                total: 0,
            });
        }
        drop(stream);

        self.finish_transfer(&line).await?;
        Ok(contents)
    }

    async fn close(&mut self) -> Result<()> {
        if self.control.is_none() {
            return Ok(());
        }
        // The connection is dropped even if the server does not answer QUIT
        if let Err(e) = self.command("QUIT").await {
            debug!(error = %e, "QUIT failed");
        }
        self.control = None;
        Ok(())
    }
}

async fn write_line(control: &mut Control, line: &str) -> std::io::Result<()> {
    control.writer.write_all(format!("{}\r\n", line).as_bytes()).await?;
    control.writer.flush().await
}

fn verb_of(line: &str) -> &str {
    line.split(' ').next().unwrap_or(line)
}

/// Read one reply, joining the lines of a multi-line reply
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        bail!("Connection closed by server");
    }
    let first = line.trim_end_matches(['\r', '\n']).to_string();
    let code = parse_code(&first)?;
    let mut text = first.get(4..).unwrap_or_default().to_string();

    if first.as_bytes().get(3) == Some(&b'-') {
        let terminator = format!("{} ", code);
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                bail!("Connection closed inside a multi-line reply");
            }
            let current = line.trim_end_matches(['\r', '\n']);
            text.push('\n');
            if let Some(rest) = current.strip_prefix(terminator.as_str()) {
                text.push_str(rest);
                break;
            }
            text.push_str(current.strip_prefix(&format!("{}-", code)).unwrap_or(current));
        }
    }

    Ok(Reply { code, text })
}

fn parse_code(line: &str) -> Result<u16> {
    line.get(..3)
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..600).contains(code))
        .ok_or_else(|| anyhow!("Malformed server reply: {:?}", line))
}

/// Data address from a 227 reply; an unspecified host means the control peer
pub fn parse_pasv(text: &str, control_peer: IpAddr) -> Result<SocketAddr> {
    let re = Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})")?;
    let caps = re
        .captures(text)
        .ok_or_else(|| anyhow!("Malformed PASV reply: {}", text))?;

    let mut parts = [0u8; 6];
    for (i, part) in parts.iter_mut().enumerate() {
        *part = caps[i + 1]
            .parse()
            .with_context(|| format!("Malformed PASV reply: {}", text))?;
    }

    let ip = Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    let ip = if ip.is_unspecified() {
        control_peer
    } else {
        IpAddr::V4(ip)
    };
    let port = (u16::from(parts[4]) << 8) | u16::from(parts[5]);
    Ok(SocketAddr::new(ip, port))
}

/// Quoted path of a 257 reply
fn parse_pwd(text: &str) -> Option<String> {
    let start = text.find('"')?;
    let end = text[start + 1..].find('"')? + start + 1;
    Some(text[start + 1..end].to_string())
}

/// Parse a LIST response in UNIX or DOS format; unknown lines are skipped
pub fn parse_listing(text: &str) -> Result<Vec<RemoteEntry>> {
    let unix = Regex::new(
        r"^([\-dlbcps])\S{9}\S*\s+\d+\s+\S+\s+\S+\s+(\d+)\s+\S+\s+\S+\s+\S+\s+(.+)$",
    )?;
    let dos = Regex::new(
        r"^\d{2}-\d{2}-\d{2,4}\s+\d{1,2}:\d{2}\s*(?:[AaPp][Mm])?\s+(<DIR>|\d+)\s+(.+)$",
    )?;

    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with("total ") {
            continue;
        }

        let entry = if let Some(caps) = unix.captures(line) {
            let kind = &caps[1];
            let mut name = caps[3].to_string();
            if kind == "l" {
                if let Some(arrow) = name.find(" -> ") {
                    name.truncate(arrow);
                }
            }
            RemoteEntry {
                name,
                is_dir: kind == "d",
                size: caps[2].parse().unwrap_or(0),
            }
        } else if let Some(caps) = dos.captures(line) {
            let is_dir = &caps[1] == "<DIR>";
            RemoteEntry {
                name: caps[2].to_string(),
                is_dir,
                size: if is_dir { 0 } else { caps[1].parse().unwrap_or(0) },
            }
        } else {
            debug!(line, "Skipping unrecognized listing line");
            continue;
        };

        if entry.name != "." && entry.name != ".." {
            entries.push(entry);
        }
    }
    Ok(entries)
}

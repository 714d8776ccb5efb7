//! SeedLink v3 wire format: line commands up, framed records down.

use super::miniseed::SEEDLINK_RECORD_LEN;
use crate::error::{WaveError, WaveResult};
use chrono::{DateTime, NaiveDateTime};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub const SIGNATURE: &[u8; 2] = b"SL";
pub const HEADER_LEN: usize = 8;

const TIME_FORMAT: &str = "%Y,%m,%d,%H,%M,%S";
const MAX_LINE: usize = 4096;

/// Unit read from the server after `END`
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data { sequence: u32, record: Vec<u8> },
    /// `last` is false while more INFO records follow
    Info { last: bool, record: Vec<u8> },
    End,
    Error(String),
}

/// Format epoch seconds as a SeedLink time argument
pub fn format_time(t: f64) -> WaveResult<String> {
    DateTime::from_timestamp(t.floor() as i64, 0)
        .map(|dt| dt.format(TIME_FORMAT).to_string())
        .ok_or_else(|| WaveError::config(format!("Time {} out of range", t)))
}

/// Parse `YYYY,MM,DD,hh,mm,ss` into epoch seconds
pub fn parse_time(s: &str) -> WaveResult<f64> {
    NaiveDateTime::parse_from_str(s.trim(), TIME_FORMAT)
        .map(|dt| dt.and_utc().timestamp() as f64)
        .map_err(|e| WaveError::config(format!("Invalid SeedLink time '{}': {}", s, e)))
}

async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> WaveResult<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(WaveError::transport("Connection closed by server"));
    }
    if line.len() > MAX_LINE {
        return Err(WaveError::Protocol("Response line too long".into()));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read the next frame of a data or INFO stream
pub async fn read_frame<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> WaveResult<Frame> {
    let mut head = [0u8; 3];
    reader
        .read_exact(&mut head)
        .await
        .map_err(|e| WaveError::transport(format!("Stream closed: {}", e)))?;

    if &head == b"END" {
        return Ok(Frame::End);
    }
    if &head == b"ERR" {
        let rest = read_line(reader).await?;
        return Ok(Frame::Error(format!("ERR{}", rest)));
    }
    if &head[..2] != SIGNATURE {
        return Err(WaveError::Protocol(format!(
            "Unexpected frame signature {:?}",
            String::from_utf8_lossy(&head)
        )));
    }

    let mut tail = [0u8; HEADER_LEN - 3];
    reader.read_exact(&mut tail).await?;
    let mut label = [0u8; HEADER_LEN - 2];
    label[0] = head[2];
    label[1..].copy_from_slice(&tail);

    let mut record = vec![0u8; SEEDLINK_RECORD_LEN];
    reader.read_exact(&mut record).await?;

    if &label[..4] == b"INFO" {
        return Ok(Frame::Info {
            last: label[5] != b'*',
            record,
        });
    }

    let text = std::str::from_utf8(&label)
        .map_err(|_| WaveError::Protocol("Non-ASCII sequence number".into()))?;
    let sequence = u32::from_str_radix(text, 16)
        .map_err(|_| WaveError::Protocol(format!("Invalid sequence number '{}'", text)))?;
    Ok(Frame::Data { sequence, record })
}

/// Command channel over one TCP connection
pub struct Connection<R = OwnedReadHalf, W = OwnedWriteHalf> {
    reader: BufReader<R>,
    writer: W,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self::from_parts(read, write)
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, command: &str) -> WaveResult<()> {
        log::trace!("> {}", command);
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send `HELLO` and return the two-line server identification
    pub async fn hello(&mut self) -> WaveResult<String> {
        self.send("HELLO").await?;
        let software = read_line(&mut self.reader).await?;
        let organization = read_line(&mut self.reader).await?;
        Ok(format!("{} / {}", software, organization))
    }

    /// Send a command that is acknowledged with `OK` or `ERROR`
    pub async fn command(&mut self, command: &str) -> WaveResult<()> {
        self.send(command).await?;
        let reply = read_line(&mut self.reader).await?;
        match reply.as_str() {
            "OK" => Ok(()),
            r if r.starts_with("ERROR") => Err(WaveError::Protocol(format!(
                "Server rejected '{}': {}",
                command, r
            ))),
            r => Err(WaveError::Protocol(format!(
                "Unexpected reply to '{}': {}",
                command, r
            ))),
        }
    }

    pub async fn read_frame(&mut self) -> WaveResult<Frame> {
        read_frame(&mut self.reader).await
    }

    /// Split off the buffered read side once no more commands will be sent
    pub fn into_parts(self) -> (BufReader<R>, W) {
        (self.reader, self.writer)
    }
}

//! Minimal HTTP/1.1 GET over any `embedded_io_async` stream.
//!
//! Only the status line of the answer is read. The collector closes the
//! connection after each request, so the caller simply drops the socket.

use core::fmt::Write as _;

use embedded_io_async::{Read, Write};
use heapless::String;

use crate::config::ServerEndpoint;
use crate::report::{Completion, ReportRequest, URI_CAPACITY};

const HEAD_CAPACITY: usize = URI_CAPACITY + 64;
const STATUS_LINE_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("connection refused or unreachable")]
    Connect,
    #[error("write failed")]
    Write,
    #[error("read failed")]
    Read,
    #[error("timed out")]
    Timeout,
    #[error("malformed status line")]
    MalformedStatus,
    #[error("connection closed before status line")]
    Closed,
}

/// Sends `request` and waits for the status line.
pub async fn get<S: Read + Write>(stream: &mut S, server: &ServerEndpoint, request: &ReportRequest) -> Completion {
    match exchange(stream, server, request).await {
        Ok(status) => Completion::Delivered { status },
        Err(err) => Completion::Failed(err),
    }
}

async fn exchange<S: Read + Write>(
    stream: &mut S,
    server: &ServerEndpoint,
    request: &ReportRequest,
) -> Result<u16, TransferError> {
    let mut head: String<HEAD_CAPACITY> = String::new();
    write!(
        head,
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        request.uri(),
        server
    )
    .map_err(|_| TransferError::Write)?;

    stream
        .write_all(head.as_bytes())
        .await
        .map_err(|_| TransferError::Write)?;
    stream.flush().await.map_err(|_| TransferError::Write)?;

    let mut line = [0u8; STATUS_LINE_MAX];
    let mut len = 0;
    loop {
        if let Some(end) = line[..len].windows(2).position(|w| w == b"\r\n") {
            return parse_status_line(&line[..end]);
        }
        if len == line.len() {
            return Err(TransferError::MalformedStatus);
        }
        let n = stream.read(&mut line[len..]).await.map_err(|_| TransferError::Read)?;
        if n == 0 {
            return Err(TransferError::Closed);
        }
        len += n;
    }
}

/// Parses `HTTP/1.x <code> <reason>` into the status code.
pub fn parse_status_line(line: &[u8]) -> Result<u16, TransferError> {
    let line = core::str::from_utf8(line).map_err(|_| TransferError::MalformedStatus)?;
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(TransferError::MalformedStatus);
    }
    parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..600).contains(code))
        .ok_or(TransferError::MalformedStatus)
}

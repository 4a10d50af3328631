//! Marionette wire framing
//!
//! Every packet is the decimal byte length of a JSON body, a colon, then the
//! body itself: `13:{"test":true}`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

/// Upper bound on a single packet, to avoid allocating on a corrupt length
const MAX_PACKET: usize = 64 * 1024 * 1024;

/// Upper bound on the length header, colon included
const MAX_HEADER: u64 = 20;

/// Read one framed packet and return its JSON body
pub async fn read_packet<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut header = Vec::new();
    let n = (&mut *reader)
        .take(MAX_HEADER)
        .read_until(b':', &mut header)
        .await?;
    if n == 0 {
        return Err(Error::AutomationProtocol("Connection closed".to_string()));
    }
    if header.last() != Some(&b':') {
        let reason = if n as u64 >= MAX_HEADER {
            "Packet header too long"
        } else {
            "Connection closed inside packet header"
        };
        return Err(Error::AutomationProtocol(reason.to_string()));
    }
    header.pop();

    let len_str = std::str::from_utf8(&header)
        .map_err(|_| Error::AutomationProtocol("Non UTF-8 packet header".to_string()))?;
    let len: usize = len_str.trim().parse().map_err(|_| {
        Error::AutomationProtocol(format!("Invalid packet length '{}'", len_str.trim()))
    })?;
    if len > MAX_PACKET {
        return Err(Error::AutomationProtocol(format!(
            "Packet of {} bytes exceeds limit",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    String::from_utf8(body)
        .map_err(|e| Error::AutomationProtocol(format!("Invalid UTF-8: {}", e)))
}

/// Write one framed packet
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    let header = format!("{}:", json.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}

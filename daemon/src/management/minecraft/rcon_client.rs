use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::management::comm::rcon::ControlChannel;

const TYPE_RESPONSE: i32 = 0;
const TYPE_COMMAND: i32 = 2;
const TYPE_LOGIN: i32 = 3;
const MAX_PAYLOAD: usize = 4096;

/// Minimal RCON transport: little-endian `[len][id][type][body\0\0]`
/// frames over TCP, one request in flight at a time. The session layer
/// above treats this as an opaque request/response channel.
pub struct RconClient {
    stream: TcpStream,
    next_id: i32,
}

impl RconClient {
    pub async fn connect(host: &str, port: u16, password: &str) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .context(format!("Failed to connect to {}:{}", host, port))?;
        let mut client = RconClient { stream, next_id: 1 };

        let id = client.write_frame(TYPE_LOGIN, password).await?;
        let (reply_id, _, _) = client.read_frame().await?;
        if reply_id == -1 {
            bail!("authentication rejected");
        }
        if reply_id != id {
            bail!("unexpected auth reply id {}", reply_id);
        }
        Ok(client)
    }

    async fn write_frame(&mut self, frame_type: i32, body: &str) -> Result<i32> {
        if body.len() > MAX_PAYLOAD {
            bail!("payload too large ({} bytes)", body.len());
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let mut packet = Vec::with_capacity(body.len() + 14);
        packet.extend_from_slice(&((body.len() + 10) as i32).to_le_bytes());
        packet.extend_from_slice(&id.to_le_bytes());
        packet.extend_from_slice(&frame_type.to_le_bytes());
        packet.extend_from_slice(body.as_bytes());
        packet.extend_from_slice(&[0, 0]);

        self.stream.write_all(&packet).await?;
        self.stream.flush().await?;
        Ok(id)
    }

    async fn read_frame(&mut self) -> Result<(i32, i32, String)> {
        let mut head = [0u8; 4];
        self.stream.read_exact(&mut head).await?;
        let len = i32::from_le_bytes(head);
        if !(10..=(MAX_PAYLOAD as i32 + 10)).contains(&len) {
            bail!("invalid frame length {}", len);
        }

        let mut frame = vec![0u8; len as usize];
        self.stream.read_exact(&mut frame).await?;
        let id = i32::from_le_bytes(frame[0..4].try_into().unwrap());
        let frame_type = i32::from_le_bytes(frame[4..8].try_into().unwrap());
        let body = String::from_utf8_lossy(&frame[8..len as usize - 2]).into_owned();
        Ok((id, frame_type, body))
    }
}

#[async_trait]
impl ControlChannel for RconClient {
    async fn request(&mut self, command: &str) -> Result<String> {
        let id = self.write_frame(TYPE_COMMAND, command).await?;
        let (reply_id, frame_type, body) = self.read_frame().await?;
        if reply_id != id || frame_type != TYPE_RESPONSE {
            bail!("unexpected reply (id={}, type={})", reply_id, frame_type);
        }
        Ok(body)
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

use async_trait::async_trait;
use log::info;
use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};

use super::{ChannelError, LiveControl, Result};
use crate::Config;

/// The mixer's telnet-style command channel.
///
/// The mixer exposes two network interfaces: the ingest endpoint live
/// broadcasters connect to, and this command channel. Forcing a broadcaster
/// off the air means telling the command channel to stop the named live
/// input; the mixer then fires its disconnect callback, which remains the
/// source of truth for session accounting.
pub struct TelnetLiveControl {
    addr: String,
}

impl TelnetLiveControl {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl LiveControl for TelnetLiveControl {
    async fn disconnect(&self, input_id: &str) -> Result<()> {
        let command = format!("{input_id}.stop\nquit\n");

        timeout(Config::DISCONNECT_TIMEOUT, async {
            let mut stream = TcpStream::connect(&self.addr).await?;

            // Issue the stop immediately, without waiting for the welcome
            // banner, then close the session cleanly.
            stream.write_all(command.as_bytes()).await?;
            stream.shutdown().await?;

            Ok::<_, std::io::Error>(())
        })
        .await
        .map_err(|_| ChannelError::Timeout)??;

        info!("Sent stop command to live input '{input_id}'");
        Ok(())
    }
}

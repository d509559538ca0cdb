//! Wake-on-LAN handler

use crate::command::{CommandHandler, CommandResult, HandlerContext};
use async_trait::async_trait;
use lab_agent_shared::codec::{encode_magic_packet, MacAddress, WOL_PORT};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tracing::info;

pub struct WolHandler {
    target: SocketAddr,
}

impl WolHandler {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }
}

impl Default for WolHandler {
    /// Limited broadcast on the discard port
    fn default() -> Self {
        Self::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, WOL_PORT)))
    }
}

async fn broadcast(packet: &[u8], target: SocketAddr) -> std::io::Result<usize> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    socket.send_to(packet, target).await
}

#[async_trait]
impl CommandHandler for WolHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        let raw = match ctx.require(&["target_mac"]) {
            Ok(raw) => raw,
            Err(missing) => return missing,
        };
        let mac = match MacAddress::parse(raw) {
            Ok(mac) => mac,
            Err(e) => return CommandResult::failed(format!("Invalid MAC address {raw:?}: {e}")),
        };

        let packet = encode_magic_packet(&mac);
        match broadcast(&packet, self.target).await {
            Ok(_) => {
                info!("[CMD] Magic packet for {} sent to {}", mac, self.target);
                CommandResult::completed(format!("Wake-on-LAN packet sent to {mac}"))
            }
            Err(e) => CommandResult::failed(format!("Failed to send Wake-on-LAN packet: {e}")),
        }
    }
}

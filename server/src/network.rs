//! UDP ingress translating wire packets into world events

use crate::world::WorldHandle;
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{Client, ClientMessageEvent, Packet};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Receives datagrams, decodes them, and submits the corresponding events on
/// the world handle. Connects are acknowledged; everything else is one-way.
pub struct Ingress {
    socket: UdpSocket,
    handle: WorldHandle,
}

impl Ingress {
    pub async fn bind(addr: &str, handle: WorldHandle) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("ingress listening on {}", socket.local_addr()?);
        Ok(Ingress { socket, handle })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop; runs until the task is dropped.
    pub async fn run(self) {
        let mut buffer = [0u8; 2048];

        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => self.handle_datagram(&buffer[0..len], addr).await,
                Err(e) => {
                    error!("error receiving datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        let packet = match deserialize::<Packet>(data) {
            Ok(packet) => packet,
            Err(_) => {
                warn!("failed to deserialize packet from {}", addr);
                return;
            }
        };

        match packet {
            Packet::Connect { id, lat, long } => {
                info!(
                    "client {} connecting from {} at ({:.3}, {:.3})",
                    id, addr, lat, long
                );
                self.handle.submit_connect(Client::new(id.clone(), lat, long));
                self.ack_connect(id, addr).await;
            }
            Packet::Disconnect { id } => {
                self.handle.submit_disconnect(id);
            }
            Packet::Message {
                id,
                topic,
                message_id,
                message,
            } => {
                self.handle.submit_message(ClientMessageEvent {
                    client_id: id,
                    topic,
                    message_id,
                    message,
                });
            }
            Packet::Connected { .. } => {
                warn!("ignoring server-to-client packet from {}", addr);
            }
        }
    }

    async fn ack_connect(&self, id: String, addr: SocketAddr) {
        match serialize(&Packet::Connected { id }) {
            Ok(data) => {
                if let Err(e) = self.socket.send_to(&data, addr).await {
                    error!("failed to ack connect to {}: {}", addr, e);
                }
            }
            Err(e) => error!("failed to serialize connect ack: {}", e),
        }
    }
}

use bincode::{deserialize, serialize};
use rand::Rng;
use shared::Packet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    // Server address
    let server_addr = "127.0.0.1:8080".parse::<SocketAddr>()?;

    let mut rng = rand::thread_rng();
    let mut buf = [0u8; 2048];
    let mut ids = Vec::new();

    // Connect a handful of clients scattered over a few adjacent cells so
    // the server has networks to grow and fuse
    for n in 0..5 {
        let id = format!("load-{}", n);
        let lat = rng.gen_range(37.0..40.0);
        let long = rng.gen_range(40.0..43.0);

        let connect = Packet::Connect {
            id: id.clone(),
            lat,
            long,
        };
        println!("Connecting {} at ({:.3}, {:.3})", id, lat, long);
        socket.send_to(&serialize(&connect)?, server_addr).await?;

        // Wait briefly for the ack
        match timeout(Duration::from_secs(1), socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => match deserialize::<Packet>(&buf[0..len]) {
                Ok(Packet::Connected { id }) => println!("Server acknowledged {}", id),
                Ok(other) => println!("Unexpected packet: {:?}", other),
                Err(e) => println!("Failed to deserialize response: {}", e),
            },
            Ok(Err(e)) => println!("Error receiving ack: {}", e),
            Err(_) => println!("No ack for {} within a second", id),
        }

        ids.push(id);
    }

    // Stream a burst of messages from each client; the server should batch
    // the ones that arrive close together
    for round in 0..3 {
        for id in &ids {
            let message = Packet::Message {
                id: id.clone(),
                topic: "load".to_string(),
                message_id: format!("{}-{}", id, round),
                message: format!("hello from {} round {}", id, round),
            };
            socket.send_to(&serialize(&message)?, server_addr).await?;
        }
        sleep(Duration::from_millis(100)).await;
    }

    // Disconnect everyone
    for id in ids {
        let disconnect = Packet::Disconnect { id };
        socket.send_to(&serialize(&disconnect)?, server_addr).await?;
    }

    println!("Test client finished");
    Ok(())
}

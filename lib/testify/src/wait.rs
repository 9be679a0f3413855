use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

/// Wait up to 20s for a TCP socket to be reachable, panic otherwise.
pub async fn wait_for_tcp(addr: SocketAddr) {
    let timeout = Duration::from_secs(20);
    let start = Instant::now();

    loop {
        if let Ok(Ok(_conn)) =
            tokio::time::timeout(Duration::from_millis(500), TcpStream::connect(addr)).await
        {
            break;
        }

        if start.elapsed() > timeout {
            panic!("Timed out waiting for connection to {addr}");
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

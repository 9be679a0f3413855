use std::net::{IpAddr, SocketAddr, TcpListener};

use rand::Rng;

pub type Port = u16;

fn bind_tcp(addr: SocketAddr) -> Option<Port> {
    Some(TcpListener::bind(addr).ok()?.local_addr().ok()?.port())
}

/// Picks a TCP port nobody listens on. Random ports first, then whatever
/// the OS hands out.
pub fn pick_unused_port(ip: IpAddr) -> Port {
    let mut rng = rand::rng();

    loop {
        for _ in 0..10 {
            let port = rng.random_range(15000..25000);
            if bind_tcp(SocketAddr::new(ip, port)).is_some() {
                return port;
            }
        }

        if let Some(port) = bind_tcp(SocketAddr::new(ip, 0)) {
            return port;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn localhost() {
        let port = pick_unused_port(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(port, 0);
    }
}

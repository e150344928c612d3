use socket2::{Domain, Protocol, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

// this will be common for all our sockets
pub fn new_socket(domain: Domain) -> io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    // tokio drives readiness, the socket itself must never block
    socket.set_nonblocking(true)?;

    Ok(socket)
}

/// Bind a UDP socket for receiving on `addr`.
///
/// The address is not shared with other sockets, so binding a port that is
/// already taken fails instead of silently splitting the traffic.
pub fn create_udp_listen(addr: &SocketAddr) -> io::Result<UdpSocket> {
    let socket = new_socket(Domain::for_address(*addr))?;
    socket.bind(&socket2::SockAddr::from(*addr))?;
    log::trace!("Binding listen socket to {}", addr);

    UdpSocket::from_std(socket.into())
}

/// Bind a UDP socket on an ephemeral port, suitable for sending to `destination`
pub fn create_udp_send(destination: &SocketAddr) -> io::Result<UdpSocket> {
    let unspecified = match destination.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let local = SocketAddr::new(unspecified, 0);

    let socket = new_socket(Domain::for_address(local))?;
    if is_broadcast(&destination.ip()) {
        socket.set_broadcast(true)?;
    }
    socket.bind(&socket2::SockAddr::from(local))?;
    log::trace!("Binding send socket to {} for {}", local, destination);

    UdpSocket::from_std(socket.into())
}

fn is_broadcast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_broadcast() || v4.octets()[3] == 255,
        IpAddr::V6(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listen_and_send_loopback() {
        let listen = create_udp_listen(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listen.local_addr().unwrap();

        let send = create_udp_send(&addr).unwrap();
        send.send_to(b"ping", addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = listen.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
    }

    #[tokio::test]
    async fn test_listen_port_in_use() {
        let first = create_udp_listen(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();

        assert!(create_udp_listen(&addr).is_err());
    }

    #[test]
    fn test_is_broadcast() {
        assert!(is_broadcast(&"255.255.255.255".parse().unwrap()));
        assert!(is_broadcast(&"192.168.1.255".parse().unwrap()));
        assert!(!is_broadcast(&"127.0.0.1".parse().unwrap()));
    }
}

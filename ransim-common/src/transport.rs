//! Network transport
//!
//! Async UDP wrapper used for both the N2 link towards the AMF and the N3
//! (GTP-U) user plane. The control-plane peer is set once with [`UdpTransport::connect`]
//! so sends cannot accidentally target the wrong endpoint.

use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::Error;

/// Maximum datagram the simulator will receive.
const MAX_DATAGRAM: usize = 65535;

/// Async UDP socket wrapper.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds a socket to the given local address (port 0 for ephemeral).
    pub async fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    /// Fixes the remote peer for [`send`](Self::send)/[`recv`](Self::recv).
    pub async fn connect(&self, peer: SocketAddr) -> Result<(), Error> {
        self.socket.connect(peer).await?;
        Ok(())
    }

    /// Sends to the connected peer.
    pub async fn send(&self, data: &[u8]) -> Result<(), Error> {
        self.socket.send(data).await?;
        Ok(())
    }

    /// Receives from the connected peer.
    pub async fn recv(&self) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = self.socket.recv(&mut buf).await?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Sends to an explicit destination (user plane).
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<(), Error> {
        self.socket.send_to(data, addr).await?;
        Ok(())
    }

    /// Receives a datagram along with its source address.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), Error> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, addr) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, addr))
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connected_send_recv() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();

        a.send(b"ngap").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), b"ngap");
    }

    #[tokio::test]
    async fn test_send_to_recv_from() {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        a.send_to(b"gtp", b.local_addr().unwrap()).await.unwrap();
        let (data, src) = b.recv_from().await.unwrap();
        assert_eq!(data, b"gtp");
        assert_eq!(src, a.local_addr().unwrap());
    }
}

use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{error, info, trace};

/// The outbound path of an endpoint. This is fire-and-forget: a transport guarantees neither
///  delivery nor order nor integrity, and it has no way of reporting failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn transmit(&self, frame: Bytes);
}

/// The inbound path of an endpoint: raw frames as they come off the wire, possibly corrupted,
///  duplicated or out of order. Implementations must not block.
#[cfg_attr(test, automock)]
pub trait FrameSink: Send + Sync + 'static {
    fn deliver_frame(&self, raw: Bytes);
}


/// Sends every frame to all configured peers, leaving it to the receiving endpoints to discard
///  frames that are not addressed to them.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>, peers: Vec<SocketAddr>) -> UdpTransport {
        UdpTransport { socket, peers }
    }

    pub async fn bind(addr: impl ToSocketAddrs, peers: Vec<SocketAddr>) -> anyhow::Result<UdpTransport> {
        let socket = UdpSocket::bind(addr).await?;
        info!("bound UDP socket to {:?}, peers {:?}", socket.local_addr()?, peers);
        Ok(UdpTransport::new(Arc::new(socket), peers))
    }

    /// the transport's socket, for running a [udp_receive_loop] on it
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn transmit(&self, frame: Bytes) {
        for peer in &self.peers {
            trace!("UDP transport: sending {} bytes to {:?}", frame.len(), peer);
            if let Err(e) = self.socket.send_to(&frame, peer).await {
                error!("error sending UDP datagram to {:?}: {}", peer, e);
            }
        }
    }
}

/// Reads datagrams from a socket and hands them to a [FrameSink] until the surrounding task is
///  aborted. Datagrams are passed on regardless of their size so that the endpoint's codec
///  accounts for malformed frames.
pub async fn udp_receive_loop(socket: Arc<UdpSocket>, frame_len: usize, sink: Arc<dyn FrameSink>) {
    info!("starting UDP receive loop on {:?}", socket.local_addr().ok());

    // one extra byte so that oversized datagrams are not silently truncated to a valid length
    let mut buf = vec![0u8; frame_len + 1];
    loop {
        let (num_read, from) = match socket.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(e) => {
                error!("socket error: {}", e);
                continue;
            }
        };

        trace!("received {} bytes from {:?}", num_read, from);
        sink.deliver_frame(Bytes::copy_from_slice(&buf[..num_read]));
    }
}

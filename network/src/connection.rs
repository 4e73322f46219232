//! TCP connection tasks.
//!
//! Each peer is served by one task that owns the socket, runs the
//! version/verack handshake, answers pings, and otherwise shuttles packets
//! between the wire and the pool.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relaynet_protocol::{FrameCodec, Handshake, HandshakeStep, Packet};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::error::{NetworkError, NetworkResult};
use crate::events::{PeerCommand, PeerEvent, PeerLink};

/// How long an outbound dial may take.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long version/verack may take once the socket is up.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens outbound connections for the pool.
pub trait Dialer: Send + Sync {
    /// Start serving `link`. Must eventually emit [`PeerEvent::Closed`].
    fn dial(&self, link: PeerLink);
}

/// Dials over TCP and runs each connection on its own tokio task.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&self, link: PeerLink) {
        tokio::spawn(run_outbound(link));
    }
}

/// Connect to `link.addr` and serve the connection until it closes.
pub async fn run_outbound(link: PeerLink) {
    let target = link.addr.socket_addr();
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => run_connection(stream, link).await,
        Ok(Err(e)) => {
            debug!(peer = %link.addr, error = %e, "connect failed");
            link.emit(PeerEvent::Closed).await;
        }
        Err(_) => {
            debug!(peer = %link.addr, "connect timed out");
            link.emit(PeerEvent::Closed).await;
        }
    }
}

/// Serve an established stream. Always ends with [`PeerEvent::Closed`].
pub async fn run_connection<S>(stream: S, mut link: PeerLink)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match drive(stream, &mut link).await {
        Ok(()) => debug!(peer = %link.addr, "connection closed"),
        Err(e) => info!(peer = %link.addr, error = %e, "connection dropped"),
    }
    link.emit(PeerEvent::Closed).await;
}

async fn drive<S>(stream: S, link: &mut PeerLink) -> NetworkResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let framed = Framed::new(stream, FrameCodec::new(link.magic));
    let (mut sink, mut stream) = framed.split();

    if !link.emit(PeerEvent::Connected).await {
        return Ok(());
    }

    let mut version = link.version.clone();
    version.remote = link.addr.clone();
    let mut handshake = Handshake::new(link.outbound, version.nonce);

    let handshaking = async {
        let mut steps = handshake.start();
        loop {
            for step in steps.drain(..) {
                let packet = match step {
                    HandshakeStep::SendVersion => Packet::Version(version.clone()),
                    HandshakeStep::SendVerack => Packet::Verack,
                };
                sink.send(packet).await?;
            }
            if handshake.is_complete() {
                return Ok::<_, NetworkError>(());
            }

            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Packet::Version(remote))) => steps = handshake.on_version(remote)?,
                    Some(Ok(Packet::Verack)) => handshake.on_verack()?,
                    Some(Ok(Packet::Ping(Some(nonce)))) => sink.send(Packet::Pong(nonce)).await?,
                    Some(Ok(other)) => {
                        debug!(peer = %link.addr, cmd = other.command(), "ignoring packet before handshake");
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(NetworkError::HandshakeIncomplete(link.id)),
                },
                command = link.commands.recv() => match command {
                    Some(PeerCommand::Send(packet)) => sink.send(packet).await?,
                    Some(PeerCommand::Destroy) | None => return Err(NetworkError::PeerDestroyed(link.id)),
                },
            }
        }
    };

    tokio::time::timeout(HANDSHAKE_TIMEOUT, handshaking)
        .await
        .map_err(|_| NetworkError::HandshakeIncomplete(link.id))??;

    let Some(remote) = handshake.into_remote() else {
        return Err(NetworkError::HandshakeIncomplete(link.id));
    };
    if !link.emit(PeerEvent::Open(remote)).await {
        return Ok(());
    }

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Packet::Ping(Some(nonce)))) => sink.send(Packet::Pong(nonce)).await?,
                Some(Ok(Packet::Ping(None))) => {}
                Some(Ok(packet)) => {
                    if !link.emit(PeerEvent::Packet(packet)).await {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
            command = link.commands.recv() => match command {
                Some(PeerCommand::Send(packet)) => sink.send(packet).await?,
                Some(PeerCommand::Destroy) | None => return Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PoolEvent;
    use crate::peer::PeerId;
    use relaynet_protocol::packets::VersionPacket;
    use relaynet_types::{NetAddress, NetworkId};
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    const MAGIC: u32 = 0xdab5_bffa;

    fn link(
        outbound: bool,
        nonce: u64,
    ) -> (
        PeerLink,
        mpsc::UnboundedSender<PeerCommand>,
        mpsc::Receiver<PoolEvent>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::channel(64);
        let link = PeerLink {
            id: PeerId(1),
            addr: NetAddress::new("127.0.0.1".parse().unwrap(), NetworkId::Regtest.default_port(), 0, 0),
            outbound,
            magic: MAGIC,
            version: VersionPacket {
                nonce,
                ..VersionPacket::default()
            },
            commands: cmd_rx,
            events: ev_tx,
        };
        (link, cmd_tx, ev_rx)
    }

    fn remote_end(stream: DuplexStream) -> Framed<DuplexStream, FrameCodec> {
        Framed::new(stream, FrameCodec::new(MAGIC))
    }

    async fn next_event(rx: &mut mpsc::Receiver<PoolEvent>) -> PeerEvent {
        rx.recv().await.unwrap().event
    }

    #[tokio::test]
    async fn outbound_handshake_then_relay() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (link, cmd_tx, mut events) = link(true, 1);
        let task = tokio::spawn(run_connection(local, link));
        let mut remote = remote_end(remote);

        assert!(matches!(next_event(&mut events).await, PeerEvent::Connected));

        // We speak first.
        let Some(Ok(Packet::Version(ours))) = remote.next().await else {
            panic!("expected version");
        };
        assert_eq!(ours.nonce, 1);

        remote
            .send(Packet::Version(VersionPacket {
                nonce: 2,
                height: 7,
                ..VersionPacket::default()
            }))
            .await
            .unwrap();
        assert!(matches!(remote.next().await, Some(Ok(Packet::Verack))));
        remote.send(Packet::Verack).await.unwrap();

        match next_event(&mut events).await {
            PeerEvent::Open(v) => assert_eq!(v.height, 7),
            other => panic!("unexpected {other:?}"),
        }

        // Pings are answered without involving the pool.
        remote.send(Packet::Ping(Some(42))).await.unwrap();
        assert!(matches!(remote.next().await, Some(Ok(Packet::Pong(42)))));

        remote.send(Packet::GetAddr).await.unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            PeerEvent::Packet(Packet::GetAddr)
        ));

        cmd_tx.send(PeerCommand::Send(Packet::SendHeaders)).unwrap();
        assert!(matches!(remote.next().await, Some(Ok(Packet::SendHeaders))));

        cmd_tx.send(PeerCommand::Destroy).unwrap();
        assert!(matches!(next_event(&mut events).await, PeerEvent::Closed));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn inbound_waits_for_remote_version() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (link, _cmd_tx, mut events) = link(false, 1);
        tokio::spawn(run_connection(local, link));
        let mut remote = remote_end(remote);
        assert!(matches!(next_event(&mut events).await, PeerEvent::Connected));

        remote
            .send(Packet::Version(VersionPacket {
                nonce: 9,
                ..VersionPacket::default()
            }))
            .await
            .unwrap();
        assert!(matches!(remote.next().await, Some(Ok(Packet::Version(_)))));
        assert!(matches!(remote.next().await, Some(Ok(Packet::Verack))));
        remote.send(Packet::Verack).await.unwrap();
        assert!(matches!(next_event(&mut events).await, PeerEvent::Open(_)));
    }

    #[tokio::test]
    async fn self_connection_is_dropped() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (link, _cmd_tx, mut events) = link(false, 77);
        tokio::spawn(run_connection(local, link));
        let mut remote = remote_end(remote);
        assert!(matches!(next_event(&mut events).await, PeerEvent::Connected));

        remote
            .send(Packet::Version(VersionPacket {
                nonce: 77,
                ..VersionPacket::default()
            }))
            .await
            .unwrap();
        assert!(matches!(next_event(&mut events).await, PeerEvent::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_handshake_times_out() {
        let (local, _remote) = tokio::io::duplex(64 * 1024);
        let (link, _cmd_tx, mut events) = link(true, 1);
        tokio::spawn(run_connection(local, link));
        assert!(matches!(next_event(&mut events).await, PeerEvent::Connected));
        // Time auto-advances past the handshake deadline while idle.
        assert!(matches!(next_event(&mut events).await, PeerEvent::Closed));
    }

    #[tokio::test]
    async fn garbage_ends_connection() {
        use tokio::io::AsyncWriteExt;

        let (local, mut remote) = tokio::io::duplex(64 * 1024);
        let (link, _cmd_tx, mut events) = link(false, 1);
        tokio::spawn(run_connection(local, link));
        assert!(matches!(next_event(&mut events).await, PeerEvent::Connected));
        remote.write_all(&[0xff; 24]).await.unwrap();
        assert!(matches!(next_event(&mut events).await, PeerEvent::Closed));
    }
}

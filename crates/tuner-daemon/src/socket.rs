use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tuner_proto::protocol::{Broadcast, Message, MAX_FRAME_LEN, PROTOCOL_VERSION};
use tuner_proto::state::StateManager;

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let sm = state_manager.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();

                    tokio::spawn(async move {
                        let (read_half, write_half) = stream.into_split();
                        handle_client(read_half, write_half, sm, id, evt_tx, bcast_rx).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

/// Forwards every complete frame in `read_buf` and leaves any partial one.
/// A frame that does not decode is dropped.  Returns false when the
/// connection should close.
async fn forward_frames(
    read_buf: &mut Vec<u8>,
    client_id: usize,
    event_tx: &mpsc::Sender<DaemonEvent>,
) -> bool {
    while let Some(frame_len) = Message::frame_len(read_buf) {
        if frame_len - 4 > MAX_FRAME_LEN {
            warn!("Client {} announced a {} byte frame", client_id, frame_len);
            return false;
        }
        if read_buf.len() < frame_len {
            break;
        }
        let frame: Vec<u8> = read_buf.drain(..frame_len).collect();
        match Message::decode(&frame) {
            Ok((Message::Command(cmd), _)) => {
                info!("Client {} sent command: {:?}", client_id, cmd);
                if event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
                    warn!("DaemonEvent channel closed");
                    return false;
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Client {} sent a bad frame: {}", client_id, e),
        }
    }
    true
}

async fn handle_client<R, W>(
    mut read_half: R,
    mut write_half: W,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        if !forward_frames(&mut read_buf, client_id, &event_tx).await {
                            return;
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&state_manager).await,
                    Ok(other) => match frame(other) {
                        Some(broadcast) => Message::Broadcast(broadcast).encode(),
                        None => continue,
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&state_manager).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Wire frame for everything except state snapshots, which are read fresh
/// from the state manager.
fn frame(msg: BroadcastMessage) -> Option<Broadcast> {
    let broadcast = match msg {
        BroadcastMessage::StateUpdated => return None,
        BroadcastMessage::NowPlaying(metadata) => Broadcast::NowPlaying { metadata },
        BroadcastMessage::Transport(state) => Broadcast::Transport { state },
        BroadcastMessage::TransportActions(actions) => Broadcast::TransportActions { actions },
        BroadcastMessage::Notice(message) => Broadcast::Notice { message },
        BroadcastMessage::Export(text) => Broadcast::Export { text },
        BroadcastMessage::Log(message) => Broadcast::Log { message },
        BroadcastMessage::Error(message) => Broadcast::Error { message },
    };
    Some(broadcast)
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    let rev = state.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        daemon_rev: rev,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

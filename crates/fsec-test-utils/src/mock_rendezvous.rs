// mock_rendezvous: A mock rendezvous for testing the tunnel topology.
//
// Accepts WebSocket connections on 127.0.0.1:<random>, reads the attach
// prelude, and either pairs the two endpoints of a channel (forwarding
// binary frames both ways, burning one-time tokens) or rejects with a
// configured close reason token.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::debug;

use fsec_wire::{Attach, AttachReason, EndpointRole};

type Ws = WebSocketStream<TcpStream>;

enum Behavior {
    /// Validate and burn tokens, pair by channel, forward bytes.
    Pair,
    /// Close every attach with this reason token.
    Reject(AttachReason),
}

#[derive(Default)]
struct PairingState {
    valid_tokens: HashSet<String>,
    burned_tokens: HashSet<String>,
    /// One waiting endpoint per channel, keyed by channel_id.
    waiting: HashMap<String, (EndpointRole, Ws)>,
}

/// A mock rendezvous for integration testing.
///
/// Binds to port 0 (random) and exposes the bound address; each test spins
/// up its own isolated instance.
///
/// # Protocol behavior
///
/// - The first message from a connection must be a **text** attach JSON;
///   anything else closes with `expected_attach`.
/// - Unknown tokens close with `invalid_token`; a token seen twice closes
///   with `token_replay`; two attaches with the same role on one channel
///   close with `role_mismatch`.
/// - Once both roles are present the two sockets are bridged: binary and
///   text frames forwarded verbatim, closes propagated.
pub struct MockRendezvous {
    addr: SocketAddr,
    state: Arc<Mutex<PairingState>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockRendezvous {
    /// Start in pairing mode.  Register tokens with [`Self::allow_token`].
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_behavior(Behavior::Pair).await
    }

    /// Start in rejection mode: every attach is closed with `reason`.
    pub async fn rejecting(reason: AttachReason) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_behavior(Behavior::Reject(reason)).await
    }

    async fn with_behavior(behavior: Behavior) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(PairingState::default()));
        let behavior = Arc::new(behavior);

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        let state = Arc::clone(&accept_state);
                        let behavior = Arc::clone(&behavior);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state, behavior).await {
                                // Dropped connections are routine in tests.
                                let _ = e;
                            }
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self { addr, state, _task: task })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Mark a token valid for exactly one attach.
    pub fn allow_token(&self, token: &str) {
        self.state.lock().expect("rendezvous lock").valid_tokens.insert(token.to_owned());
    }
}

enum Decision {
    Reject(AttachReason),
    Forward(Ws),
    Parked,
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<PairingState>>,
    behavior: Arc<Behavior>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;

    // First message must be the text attach.
    let attach = loop {
        match ws.next().await {
            None => return Ok(()),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Attach>(&text) {
                Ok(attach) if attach.v == 1 && !attach.channel_id.is_empty() => break attach,
                _ => return reject(ws, AttachReason::InvalidAttach).await,
            },
            Some(Ok(Message::Ping(data))) => {
                ws.send(Message::Pong(data)).await?;
            }
            Some(Ok(Message::Close(_))) => return Ok(()),
            Some(Ok(_)) => return reject(ws, AttachReason::ExpectedAttach).await,
        }
    };

    if let Behavior::Reject(reason) = behavior.as_ref() {
        return reject(ws, *reason).await;
    }

    // Token burn and pairing, all under one lock.  `ws` either parks in
    // the waiting map, forwards to a peer, or is rejected.
    let mut ws = Some(ws);
    let decision = {
        let mut state = state.lock().expect("rendezvous lock");
        if state.burned_tokens.contains(&attach.token) {
            Decision::Reject(AttachReason::TokenReplay)
        } else if !state.valid_tokens.remove(&attach.token) {
            Decision::Reject(AttachReason::InvalidToken)
        } else {
            state.burned_tokens.insert(attach.token.clone());

            match state.waiting.remove(&attach.channel_id) {
                Some((peer_role, peer_ws)) if peer_role != attach.role => {
                    Decision::Forward(peer_ws)
                }
                Some((peer_role, peer_ws)) => {
                    // Same role twice: put the first endpoint back and refuse
                    // the newcomer.
                    state.waiting.insert(attach.channel_id.clone(), (peer_role, peer_ws));
                    Decision::Reject(AttachReason::RoleMismatch)
                }
                None => {
                    state.waiting.insert(
                        attach.channel_id.clone(),
                        (attach.role, ws.take().expect("socket")),
                    );
                    Decision::Parked
                }
            }
        }
    };

    match decision {
        Decision::Reject(reason) => reject(ws.take().expect("socket"), reason).await,
        Decision::Forward(peer_ws) => {
            debug!(channel_id = %attach.channel_id, "paired, forwarding");
            forward(ws.take().expect("socket"), peer_ws).await;
            Ok(())
        }
        Decision::Parked => Ok(()),
    }
}

async fn reject(
    mut ws: Ws,
    reason: AttachReason,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    ws.send(Message::Close(Some(CloseFrame {
        code: CloseCode::Policy,
        reason: reason.as_str().into(),
    })))
    .await?;
    Ok(())
}

/// Bridge two paired sockets until either side goes away.
async fn forward(a: Ws, b: Ws) {
    let (mut a_tx, mut a_rx) = a.split();
    let (mut b_tx, mut b_rx) = b.split();

    let a_to_b = tokio::spawn(async move {
        while let Some(Ok(msg)) = a_rx.next().await {
            match msg {
                Message::Binary(_) | Message::Text(_) | Message::Close(_) => {
                    if b_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                _ => {}
            }
        }
        let _ = b_tx.send(Message::Close(None)).await;
    });
    let b_to_a = tokio::spawn(async move {
        while let Some(Ok(msg)) = b_rx.next().await {
            match msg {
                Message::Binary(_) | Message::Text(_) | Message::Close(_) => {
                    if a_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                _ => {}
            }
        }
        let _ = a_tx.send(Message::Close(None)).await;
    });
    let _ = tokio::join!(a_to_b, b_to_a);
}

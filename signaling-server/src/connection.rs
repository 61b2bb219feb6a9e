use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt, TryFutureExt};
use log::{debug, error, info, warn};
use peer_calls_protocol::{SignalMessage, UserId};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::codec::{self, Encoding};
use crate::pubsub::{PubSub, SubscriberId, Topic};
use crate::relay::{is_deliverable, SignalingRelay};

/// Serve one authenticated websocket until it closes.
///
/// The connection is subscribed to its user's lifecycle topic right away and
/// to call topics on `CallJoin`. Frames pushed by the server use the encoding
/// of the last frame the client sent.
pub async fn user_connected(ws: WebSocket, user_id: UserId, hub: PubSub, relay: SignalingRelay) {
    let id = SubscriberId::next();
    info!("user {user_id} connected (connection {id})");

    let (mut user_ws_tx, mut user_ws_rx) = ws.split();

    let (tx, rx) = mpsc::unbounded_channel();
    let mut rx = UnboundedReceiverStream::new(rx);
    let (encoding_tx, encoding_rx) = watch::channel(Encoding::default());

    let forward_to = user_id.clone();
    tokio::task::spawn(async move {
        while let Some(message) = rx.next().await {
            if !is_deliverable(&message, &forward_to) {
                continue;
            }
            let encoding = *encoding_rx.borrow();
            let frame = match codec::encode(&message, encoding) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("could not encode message for {forward_to}: {e}");
                    continue;
                }
            };
            user_ws_tx
                .send(frame)
                .unwrap_or_else(|e| warn!("websocket send error: {e}"))
                .await;
        }
    });

    hub.subscribe(Topic::User(user_id.clone()), id, tx.clone())
        .await;

    while let Some(result) = user_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                warn!("websocket error (user={user_id}, connection={id}): {e}");
                break;
            }
        };
        if matches!(msg, Message::Close(_)) {
            break;
        }
        user_message(&user_id, id, msg, &tx, &encoding_tx, &relay).await;
    }

    info!("user {user_id} disconnected (connection {id})");
    hub.unsubscribe_all(id).await;
}

async fn user_message(
    user_id: &UserId,
    id: SubscriberId,
    msg: Message,
    tx: &mpsc::UnboundedSender<SignalMessage>,
    encoding: &watch::Sender<Encoding>,
    relay: &SignalingRelay,
) {
    let request = match codec::decode(&msg) {
        Ok(Some((request, used))) => {
            encoding.send_replace(used);
            request
        }
        Ok(None) => return,
        Err(e) => {
            warn!("unreadable frame from {user_id}: {e}");
            let _ = tx.send(SignalMessage::Error(None, e.to_string()));
            return;
        }
    };
    debug!("message received from user {user_id}: {request:?}");

    match request {
        SignalMessage::CallJoin(call_id) => {
            if let Err(e) = relay.join(user_id, &call_id, id, tx.clone()).await {
                warn!("{user_id} could not join signaling of call {call_id}: {e}");
                let _ = tx.send(SignalMessage::Error(Some(call_id), e.to_string()));
            }
        }
        SignalMessage::CallLeave(call_id) => relay.leave(&call_id, id).await,
        SignalMessage::Signal(envelope) => relay.forward(user_id, envelope).await,
        SignalMessage::Lifecycle(_) | SignalMessage::Error(..) => {
            warn!("ignoring server-only message from {user_id}");
        }
    }
}

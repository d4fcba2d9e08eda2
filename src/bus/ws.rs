//! WebSocket subscription transport for the Fan-Out Bus.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{FanOutBus, SubscriptionFrame};

pub fn router(bus: Arc<FanOutBus>) -> Router {
    Router::new().route("/subscribe", get(upgrade)).with_state(bus)
}

async fn upgrade(ws: WebSocketUpgrade, State(bus): State<Arc<FanOutBus>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, bus))
}

/// Accepts `{type: "subscribe"|"unsubscribe", runId|agentId|global}` frames
/// and relays broadcasts for the subscribed topics back as JSON text
/// frames. A subscriber that lags past its topic's bounded capacity is
/// dropped: the connection is closed rather than silently skipped ahead.
async fn handle_socket(socket: WebSocket, bus: Arc<FanOutBus>) {
    let (mut sink, mut stream) = socket.split();
    let mut subscriptions: Vec<(String, broadcast::Receiver<super::BusMessage>)> = Vec::new();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SubscriptionFrame>(&text) {
                            Ok(SubscriptionFrame::Subscribe { target }) => {
                                let topic = target.topic();
                                subscriptions.push((topic.clone(), bus.subscribe(&topic)));
                                debug!("subscribed to {}", topic);
                            }
                            Ok(SubscriptionFrame::Unsubscribe { target }) => {
                                let topic = target.topic();
                                subscriptions.retain(|(t, _)| t != &topic);
                            }
                            Err(e) => warn!("malformed subscription frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("websocket read error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            result = recv_any(&mut subscriptions), if !subscriptions.is_empty() => {
                match result {
                    Ok(msg) => {
                        let text = serde_json::to_string(&msg).unwrap_or_default();
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(()) => break,
                }
            }
        }
    }
}

/// Polls every subscribed topic's receiver and returns the first message
/// available. A `Lagged` error on any receiver drops the whole
/// subscriber connection, per the bus's backpressure policy.
async fn recv_any(
    subscriptions: &mut [(String, broadcast::Receiver<super::BusMessage>)],
) -> Result<super::BusMessage, ()> {
    use futures_util::future::select_all;

    let futures = subscriptions
        .iter_mut()
        .map(|(_, rx)| Box::pin(rx.recv()));
    let (result, _, _) = select_all(futures).await;
    match result {
        Ok(msg) => Ok(msg),
        Err(broadcast::error::RecvError::Lagged(_)) => Err(()),
        Err(broadcast::error::RecvError::Closed) => Err(()),
    }
}

//! HTTP/WebSocket transport: route composition and per-connection tasks.
//!
//! Grounded in `telemetry_shard::main`'s `start_server`/
//! `handle_node_websocket_connection`: a `warp::path(...).and(warp::ws())`
//! filter per role, each upgrading into a task that bridges the socket's
//! `Stream`/`Sink` halves to the core's unified `CoreEvent` channel. Unlike
//! the shard (one role, one handler), we have five roles; the three pure
//! subscriber roles (`/listener`, `/orientation`, `/bulk`) share one generic
//! handler since they differ only in which `CoreEvent` variants they raise.

use crate::core::aggregator::CoreEvent;
use crate::core::types::{ConnId, Outbound};
use crate::messages::{DashboardInbound, ProducerInbound};
use futures::{SinkExt, StreamExt};
use std::net::{IpAddr, SocketAddr};
use warp::filters::ws::{self, WebSocket};
use warp::{Filter, Rejection, Reply};

/// Per-connection outbound channel depth. A full channel means the consumer
/// is slow; see `crate::core::types::send`, which drops rather than blocks.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Every `CoreEvent` variant we currently treat as terminal for the
/// connection holding it carries its own distinctive `"type"` tag; rather
/// than widen `Outbound` with a close signal (which would ripple through
/// every already-tested send site), the connection task itself recognizes
/// these tags after forwarding the frame to the socket and closes.
fn is_terminal_message(text: &str) -> bool {
    text.contains(r#""type":"kicked""#)
        || text.contains(r#""type":"server_shutdown""#)
        || (text.contains(r#""type":"rejected""#) && text.contains("Server capacity reached"))
}

/// Extract the caller's address from proxy headers if present, falling back
/// to the raw socket address; mirrors `telemetry_shard::real_ip`, composed
/// here as a `warp` filter over `relay_common::real_ip::real_ip`.
fn remote_ip() -> impl Filter<Extract = (Option<IpAddr>,), Error = std::convert::Infallible> + Clone {
    warp::filters::header::headers_cloned()
        .and(warp::filters::addr::remote())
        .map(|headers: warp::http::HeaderMap, remote: Option<SocketAddr>| {
            remote.map(|addr| relay_common::real_ip::real_ip(addr, &headers).0)
        })
}

pub fn routes(
    events: flume::Sender<CoreEvent>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health_route = warp::path::end().map(|| "Sensor telemetry relay is running.");

    let producer_route = warp::path("pocket-parrot").and(warp::ws()).and(remote_ip()).map({
        let events = events.clone();
        move |ws: ws::Ws, addr: Option<IpAddr>| {
            let events = events.clone();
            ws.on_upgrade(move |socket| handle_producer_connection(socket, events, addr))
        }
    });

    let dashboard_route = warp::path("dashboard").and(warp::ws()).and(remote_ip()).map({
        let events = events.clone();
        move |ws: ws::Ws, addr: Option<IpAddr>| {
            let events = events.clone();
            ws.on_upgrade(move |socket| handle_dashboard_connection(socket, events, addr))
        }
    });

    let listener_route = warp::path("listener").and(warp::ws()).and(remote_ip()).map({
        let events = events.clone();
        move |ws: ws::Ws, addr: Option<IpAddr>| {
            let events = events.clone();
            ws.on_upgrade(move |socket| {
                handle_subscriber_connection(
                    socket,
                    events,
                    addr,
                    "listen",
                    |id, remote_addr, outbound, now| CoreEvent::PassiveListenerConnected {
                        id,
                        remote_addr,
                        outbound,
                        now,
                    },
                    |id, now| CoreEvent::PassiveListenerDisconnected { id, now },
                )
            })
        }
    });

    let orientation_route = warp::path("orientation").and(warp::ws()).and(remote_ip()).map({
        let events = events.clone();
        move |ws: ws::Ws, addr: Option<IpAddr>| {
            let events = events.clone();
            ws.on_upgrade(move |socket| {
                handle_subscriber_connection(
                    socket,
                    events,
                    addr,
                    "orient",
                    |id, remote_addr, outbound, now| CoreEvent::OrientationListenerConnected {
                        id,
                        remote_addr,
                        outbound,
                        now,
                    },
                    |id, now| CoreEvent::OrientationListenerDisconnected { id, now },
                )
            })
        }
    });

    let bulk_route = warp::path("bulk").and(warp::ws()).and(remote_ip()).map({
        let events = events.clone();
        move |ws: ws::Ws, addr: Option<IpAddr>| {
            let events = events.clone();
            ws.on_upgrade(move |socket| {
                handle_subscriber_connection(
                    socket,
                    events,
                    addr,
                    "bulk",
                    |id, remote_addr, outbound, now| CoreEvent::BulkListenerConnected {
                        id,
                        remote_addr,
                        outbound,
                        now,
                    },
                    |id, now| CoreEvent::BulkListenerDisconnected { id, now },
                )
            })
        }
    });

    let metrics_route = warp::path("metrics").and_then({
        let events = events.clone();
        move || {
            let events = events.clone();
            async move { metrics_reply(events).await }
        }
    });

    health_route
        .or(metrics_route)
        .or(producer_route)
        .or(dashboard_route)
        .or(listener_route)
        .or(orientation_route)
        .or(bulk_route)
}

async fn metrics_reply(events: flume::Sender<CoreEvent>) -> Result<impl Reply, Rejection> {
    let (reply_tx, reply_rx) = flume::bounded(1);
    if events
        .send_async(CoreEvent::GatherStats {
            reply: reply_tx,
            now: relay_common::time::now(),
        })
        .await
        .is_err()
    {
        return Ok(warp::reply::with_status(
            "relay shutting down".to_string(),
            warp::http::StatusCode::SERVICE_UNAVAILABLE,
        ));
    }
    let snapshot = match reply_rx.recv_async().await {
        Ok(snapshot) => snapshot,
        Err(_) => {
            return Ok(warp::reply::with_status(
                "relay shutting down".to_string(),
                warp::http::StatusCode::SERVICE_UNAVAILABLE,
            ))
        }
    };
    Ok(warp::reply::with_status(
        crate::metrics::render(&snapshot),
        warp::http::StatusCode::OK,
    ))
}

/// `/pocket-parrot`: the only role whose inbound frames drive arbitration.
async fn handle_producer_connection(
    websocket: WebSocket,
    events: flume::Sender<CoreEvent>,
    remote_addr: Option<IpAddr>,
) {
    let id = ConnId::generate("user");
    let (outbound_tx, outbound_rx): (Outbound, _) = flume::bounded(OUTBOUND_CHANNEL_CAPACITY);
    let now = relay_common::time::now();
    if events
        .send_async(CoreEvent::ProducerConnected {
            id: id.clone(),
            remote_addr,
            outbound: outbound_tx,
            now,
        })
        .await
        .is_err()
    {
        return;
    }

    let (mut ws_tx, mut ws_rx) = websocket.split();
    loop {
        tokio::select! {
            outgoing = outbound_rx.recv_async() => {
                let Ok(text) = outgoing else { break };
                let should_close = is_terminal_message(&text);
                if ws_tx.send(ws::Message::text(text)).await.is_err() {
                    break;
                }
                if should_close {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break };
                if msg.is_close() {
                    break;
                }
                let Ok(text) = msg.to_str() else { continue };
                let parsed: Result<ProducerInbound, _> = serde_json::from_str(text);
                match parsed {
                    Ok(msg) => {
                        let now = relay_common::time::now();
                        if events
                            .send_async(CoreEvent::ProducerMessage { id: id.clone(), msg, now })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => log::warn!("dropping malformed producer message from {}: {}", id, e),
                }
            }
        }
    }

    let now = relay_common::time::now();
    let _ = events
        .send_async(CoreEvent::ProducerDisconnected { id, now })
        .await;
}

/// `/dashboard`: the one role that issues administrative commands.
async fn handle_dashboard_connection(
    websocket: WebSocket,
    events: flume::Sender<CoreEvent>,
    remote_addr: Option<IpAddr>,
) {
    let id = ConnId::generate("dash");
    let (outbound_tx, outbound_rx): (Outbound, _) = flume::bounded(OUTBOUND_CHANNEL_CAPACITY);
    let now = relay_common::time::now();
    if events
        .send_async(CoreEvent::DashboardConnected {
            id: id.clone(),
            remote_addr,
            outbound: outbound_tx,
            now,
        })
        .await
        .is_err()
    {
        return;
    }

    let (mut ws_tx, mut ws_rx) = websocket.split();
    loop {
        tokio::select! {
            outgoing = outbound_rx.recv_async() => {
                let Ok(text) = outgoing else { break };
                if ws_tx.send(ws::Message::text(text)).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break };
                if msg.is_close() {
                    break;
                }
                let Ok(text) = msg.to_str() else { continue };
                let parsed: Result<DashboardInbound, _> = serde_json::from_str(text);
                match parsed {
                    Ok(msg) => {
                        let now = relay_common::time::now();
                        if events
                            .send_async(CoreEvent::DashboardMessage { id: id.clone(), msg, now })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => log::warn!("dropping malformed dashboard message from {}: {}", id, e),
                }
            }
        }
    }

    let now = relay_common::time::now();
    let _ = events
        .send_async(CoreEvent::DashboardDisconnected { id, now })
        .await;
}

/// Shared by `/listener`, `/orientation`, and `/bulk`: pure subscribers that
/// never send any recognized inbound frame, so the only thing read from the
/// socket is used to detect its close.
async fn handle_subscriber_connection<ConnectFn, DisconnectFn>(
    websocket: WebSocket,
    events: flume::Sender<CoreEvent>,
    remote_addr: Option<IpAddr>,
    id_prefix: &str,
    on_connect: ConnectFn,
    on_disconnect: DisconnectFn,
) where
    ConnectFn: FnOnce(ConnId, Option<IpAddr>, Outbound, u64) -> CoreEvent,
    DisconnectFn: FnOnce(ConnId, u64) -> CoreEvent,
{
    let id = ConnId::generate(id_prefix);
    let (outbound_tx, outbound_rx): (Outbound, _) = flume::bounded(OUTBOUND_CHANNEL_CAPACITY);
    let now = relay_common::time::now();
    if events
        .send_async(on_connect(id.clone(), remote_addr, outbound_tx, now))
        .await
        .is_err()
    {
        return;
    }

    let (mut ws_tx, mut ws_rx) = websocket.split();
    loop {
        tokio::select! {
            outgoing = outbound_rx.recv_async() => {
                let Ok(text) = outgoing else { break };
                let should_close = is_terminal_message(&text);
                if ws_tx.send(ws::Message::text(text)).await.is_err() {
                    break;
                }
                if should_close {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    None | Some(Err(_)) => break,
                    Some(Ok(msg)) if msg.is_close() => break,
                    Some(Ok(_)) => continue,
                }
            }
        }
    }

    let now = relay_common::time::now();
    let _ = events.send_async(on_disconnect(id, now)).await;
}

//! WebSocket relay tests against a tungstenite echo upstream.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use route_proxy::lifecycle::LifecycleSettings;
use route_proxy::{LifecycleState, ProxyEvent, ProxyOptions, RouteOptions, ShutdownReason};
use tokio_tungstenite::tungstenite::Message;

mod common;

fn ws_route() -> RouteOptions {
    RouteOptions {
        websocket_upgrade: true,
        ..RouteOptions::default()
    }
}

#[tokio::test]
async fn echoes_through_proxy() {
    let upstream = common::start_ws_echo_backend().await;
    let (proxy, addr) = common::start_proxy(ProxyOptions::default()).await;
    proxy
        .register("*", "/", &format!("http://{upstream}"), ws_route())
        .unwrap();

    let (mut ws, response) = tokio_tungstenite::connect_async(format!("ws://{addr}/socket"))
        .await
        .unwrap();
    assert_eq!(response.status(), 101);

    ws.send(Message::text("hello")).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply.into_text().unwrap().as_str(), "hello");

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(&reply.into_data()[..], &[1u8, 2, 3]);

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn upgrade_rejected_when_route_disallows_it() {
    let upstream = common::start_ws_echo_backend().await;
    let (proxy, addr) = common::start_proxy(ProxyOptions::default()).await;
    proxy
        .register(
            "*",
            "/",
            &format!("http://{upstream}"),
            RouteOptions::default(),
        )
        .unwrap();

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/socket"))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 400)
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn unmatched_upgrade_is_502() {
    let (_proxy, addr) = common::start_proxy(ProxyOptions::default()).await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/socket"))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 502)
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn open_session_is_closed_after_grace_period() {
    let upstream = common::start_ws_echo_backend().await;
    let (proxy, addr) = common::start_proxy(ProxyOptions {
        lifecycle: LifecycleSettings {
            grace_period: Duration::from_millis(200),
            ..LifecycleSettings::default()
        },
        ..ProxyOptions::default()
    })
    .await;
    proxy
        .register("*", "/", &format!("http://{upstream}"), ws_route())
        .unwrap();

    let mut events = proxy.subscribe();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/socket"))
        .await
        .unwrap();
    ws.send(Message::text("ping")).await.unwrap();
    ws.next().await.unwrap().unwrap();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        proxy.shutdown(ShutdownReason::Requested),
    )
    .await
    .unwrap();
    assert!(report.initiated);
    assert!(report.forced_connections >= 1);
    assert_eq!(proxy.state(), LifecycleState::Stopped);

    // The relay is gone: the stream ends or errors instead of echoing.
    let _ = ws.send(Message::text("after")).await;
    let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap();
    assert!(!matches!(next, Some(Ok(Message::Text(_)))));

    // Bytes relayed before the force close are still reported.
    let (sent, received, error) = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let ProxyEvent::WebSocketClosed {
                client_to_upstream,
                upstream_to_client,
                error,
                ..
            } = events.recv().await.unwrap()
            {
                return (client_to_upstream, upstream_to_client, error);
            }
        }
    })
    .await
    .unwrap();
    assert!(sent > 0);
    assert!(received > 0);
    assert!(error.is_some());
}

//! Start/stop behaviour observed from outside the proxy.

use std::time::Duration;

use route_proxy::error::ErrorKind;
use route_proxy::lifecycle::LifecycleSettings;
use route_proxy::{
    ListenerSpec, LifecycleState, Proxy, ProxyEvent, ProxyOptions, RouteOptions, ShutdownReason,
};

mod common;
use common::client;

#[tokio::test]
async fn shutdown_drains_in_flight_request() {
    let backend = common::start_delayed_backend("slow", Duration::from_millis(500)).await;
    let (proxy, addr) = common::start_proxy(ProxyOptions {
        lifecycle: LifecycleSettings {
            grace_period: Duration::from_secs(5),
            ..LifecycleSettings::default()
        },
        ..ProxyOptions::default()
    })
    .await;
    proxy
        .register("*", "/", &backend.url(), RouteOptions::default())
        .unwrap();

    let in_flight = tokio::spawn(client().get(format!("http://{addr}/work")).send());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = proxy.shutdown(ShutdownReason::Terminate).await;
    assert!(report.initiated);
    assert!(report.drained());
    assert_eq!(report.reason, ShutdownReason::Terminate);

    let res = in_flight.await.unwrap().unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(proxy.state(), LifecycleState::Stopped);

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn idle_proxy_stops_promptly() {
    let (proxy, _addr) = common::start_proxy(ProxyOptions::default()).await;
    let report = tokio::time::timeout(
        Duration::from_secs(2),
        proxy.shutdown(ShutdownReason::Interrupt),
    )
    .await
    .unwrap();
    assert!(report.drained());
}

#[tokio::test]
async fn bind_conflict_reports_error_and_stays_stopped() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let proxy = Proxy::new(ProxyOptions::default());
    let err = proxy
        .start(vec![ListenerSpec::plain(addr)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bind);
    assert_eq!(proxy.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let (proxy, _addr) = common::start_proxy(ProxyOptions::default()).await;
    let err = proxy.start(vec![common::loopback()]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyStarted);
    assert_eq!(proxy.state(), LifecycleState::Running);
    proxy.shutdown(ShutdownReason::Requested).await;
}

#[tokio::test]
async fn completed_request_is_published() {
    let backend = common::start_echo_backend("api").await;
    let (proxy, addr) = common::start_proxy(ProxyOptions::default()).await;
    let id = proxy
        .register("*", "/api", &backend.url(), RouteOptions::default())
        .unwrap();
    let mut events = proxy.subscribe();

    let res = client()
        .get(format!("http://{addr}/api/users"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let completed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let ProxyEvent::RequestCompleted {
                route, path, status, ..
            } = events.recv().await.unwrap()
            {
                return (route, path, status);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(completed, (id, "/api/users".to_string(), 200));
}

#[tokio::test]
async fn failed_request_is_published() {
    let (proxy, addr) = common::start_proxy(ProxyOptions::default()).await;
    let mut events = proxy.subscribe();

    let res = client().get(format!("http://{addr}/nothing")).send().await.unwrap();
    assert_eq!(res.status(), 502);

    let kind = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let ProxyEvent::RequestFailed { kind, .. } = events.recv().await.unwrap() {
                return kind;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(kind, ErrorKind::NoRouteMatched);
}

use futures_util::{SinkExt, StreamExt};
use imgpipe_bus::{FanoutBus, InMemoryBus};
use imgpipe_core::{ImageId, JobResultEvent, UserId};
use imgpipe_ws::{spawn_bridge, ConnectionRegistry, StaticTokenValidator, WsServer};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tungstenite::Message;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Fixture {
    addr: SocketAddr,
    registry: ConnectionRegistry,
    bus: Arc<InMemoryBus>,
    shutdown: CancellationToken,
}

async fn start() -> Fixture {
    let registry = ConnectionRegistry::new();
    let bus = Arc::new(InMemoryBus::new());
    let shutdown = CancellationToken::new();
    let validator = StaticTokenValidator::new()
        .add_token("token-42", "42")
        .add_token("token-7", "7");

    spawn_bridge(bus.clone(), registry.clone(), shutdown.clone())
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = WsServer::new(registry.clone(), Arc::new(validator));
    tokio::spawn(server.serve(listener, shutdown.clone()));

    Fixture {
        addr,
        registry,
        bus,
        shutdown,
    }
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    let welcome = next_json(&mut client).await;
    assert_eq!(
        welcome,
        json!({ "type": "welcome", "message": "Connected to Websocket!" })
    );
    client
}

async fn join(client: &mut Client, token: &str) -> Value {
    let join = json!({ "type": "join", "accessToken": token }).to_string();
    client.send(Message::Text(join)).await.unwrap();
    next_json(client).await
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn test_event_reaches_only_its_user() {
    let fx = start().await;
    let mut alice = connect(fx.addr).await;
    let mut bob = connect(fx.addr).await;

    assert_eq!(join(&mut alice, "token-42").await, json!({ "type": "auth", "success": true }));
    assert_eq!(join(&mut bob, "token-7").await, json!({ "type": "auth", "success": true }));

    let event = JobResultEvent::success(ImageId::new("img-1"), "Image resized successfully");
    fx.bus.publish_event(&UserId::new("42"), &event).await.unwrap();

    let received = next_json(&mut alice).await;
    assert_eq!(received, serde_json::to_value(&event).unwrap());

    let nothing = tokio::time::timeout(Duration::from_millis(100), bob.next()).await;
    assert!(nothing.is_err(), "user 7 must not see user 42's event");

    fx.shutdown.cancel();
}

#[tokio::test]
async fn test_bad_token_is_rejected() {
    let fx = start().await;
    let mut client = connect(fx.addr).await;

    let reply = join(&mut client, "forged").await;
    assert_eq!(
        reply,
        json!({
            "type": "auth",
            "success": false,
            "message": "Authentication failed. Please check your credentials."
        })
    );
    assert_eq!(fx.registry.user_count(), 0);

    fx.shutdown.cancel();
}

#[tokio::test]
async fn test_close_removes_connection_and_user_entry() {
    let fx = start().await;
    let user = UserId::new("42");
    let mut first = connect(fx.addr).await;
    let mut second = connect(fx.addr).await;
    join(&mut first, "token-42").await;
    join(&mut second, "token-42").await;
    assert_eq!(fx.registry.connection_count(), 2);

    first.close(None).await.unwrap();
    wait_until(|| fx.registry.connection_count() == 1).await;
    assert!(fx.registry.contains_user(&user));

    second.close(None).await.unwrap();
    wait_until(|| !fx.registry.contains_user(&user)).await;

    // nobody left to deliver to
    assert_eq!(fx.registry.broadcast(&user, "{}"), 0);

    fx.shutdown.cancel();
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let fx = start().await;
    let mut client = connect(fx.addr).await;
    join(&mut client, "token-42").await;

    fx.shutdown.cancel();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    wait_until(|| fx.registry.user_count() == 0).await;
}

use parking_lot::Mutex;
use roomwire_core::{
    from_async, ClientSocket, MiddlewareError, Namespace, Next, Payload, Server, ServerSocket,
    ERROR_EVENT,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

fn tag(label: &'static str) -> impl Fn(&ServerSocket, Next) + Send + Sync + 'static {
    move |socket: &ServerSocket, next: Next| {
        socket.update_metadata(|metadata| {
            if let Value::Array(tags) = metadata
                .entry("tags".to_string())
                .or_insert_with(|| json!([]))
            {
                tags.push(json!(label));
            }
        });
        next.proceed();
    }
}

fn record_connections(namespace: &Namespace) -> Arc<Mutex<Vec<ServerSocket>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    namespace.on_connection(move |socket| sink.lock().push(socket.clone()));
    seen
}

fn record_errors(client: &ClientSocket) -> mpsc::UnboundedReceiver<Payload> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(ERROR_EVENT, move |payload| {
        let _ = tx.send(payload.clone());
    });
    rx
}

#[test]
fn test_empty_pipeline_admits_immediately() {
    let server = Server::new();
    let seen = record_connections(server.sockets());

    let client = server.create_socket();

    let connected = server.sockets().connected().sockets();
    assert_eq!(connected.len(), 1);
    assert_eq!(*seen.lock(), connected);
    assert!(client.is_bridged());
}

#[test]
fn test_tagging_middleware_run_in_order() {
    let server = Server::new();
    server.use_middleware(tag("foo")).use_middleware(tag("bar"));

    let socket = server.sockets().add(&ClientSocket::new());

    assert_eq!(socket.metadata("tags"), Some(json!(["foo", "bar"])));
    assert!(server.sockets().is_connected(socket.id()));
}

#[test]
fn test_bridge_round_trip_after_admission() {
    let server = Server::new();
    let client = ClientSocket::new();
    let socket = server.sockets().add(&client);

    let at_server = Arc::new(Mutex::new(Vec::<Payload>::new()));
    let at_client = Arc::new(Mutex::new(Vec::<Payload>::new()));
    let sink = Arc::clone(&at_server);
    socket.on("hello", move |payload| sink.lock().push(payload.clone()));
    let sink = Arc::clone(&at_client);
    client.on("welcome", move |payload| sink.lock().push(payload.clone()));

    assert!(client.emit("hello", vec![json!("from client")]));
    assert!(socket.emit("welcome", vec![json!("from server"), json!(2)]));

    assert_eq!(*at_server.lock(), vec![vec![json!("from client")]]);
    assert_eq!(
        *at_client.lock(),
        vec![vec![json!("from server"), json!(2)]]
    );
}

#[tokio::test]
async fn test_failing_middleware_rejects_exactly_once() {
    let server = Server::new();
    server
        .use_middleware(|_: &ServerSocket, next: Next| next.reject("Simulated failure."))
        .use_middleware(tag("never"));
    let seen = record_connections(server.sockets());
    let client = ClientSocket::new();

    let socket = server.sockets().add(&client);
    let mut errors = record_errors(&client);

    assert!(!server.sockets().is_connected(socket.id()));
    assert!(socket.metadata("tags").is_none());

    let payload = errors.recv().await.unwrap();
    assert_eq!(payload, vec![json!("Simulated failure.")]);

    tokio::task::yield_now().await;
    assert_err!(errors.try_recv());
    assert!(seen.lock().is_empty());
    assert!(server.sockets().connected().is_empty());
}

#[tokio::test]
async fn test_async_middleware_admission() {
    let server = Server::new();
    server.use_middleware(from_async(|socket: ServerSocket| async move {
        tokio::task::yield_now().await;
        match socket.metadata("token") {
            Some(token) if token == json!("secret") => Ok(()),
            _ => Err(MiddlewareError::new("invalid token")),
        }
    }));

    let (tx, mut rx) = mpsc::unbounded_channel();
    server.on_connection(move |socket| {
        let _ = tx.send(socket.clone());
    });

    let rejected_client = ClientSocket::new();
    let rejected = server.sockets().add(&rejected_client);
    let mut errors = record_errors(&rejected_client);
    assert_eq!(errors.recv().await.unwrap(), vec![json!("invalid token")]);
    assert!(!server.sockets().is_connected(rejected.id()));

    // Token set before the future inspects it
    let socket = server.sockets().add(&ClientSocket::new());
    socket.set_metadata("token", json!("secret"));
    let admitted = rx.recv().await.unwrap();
    assert_eq!(admitted, socket);
}

#[test]
fn test_remove_is_idempotent() {
    let server = Server::new();
    let socket = server.sockets().add(&ClientSocket::new());

    server.sockets().remove(&socket);
    server.sockets().remove(&socket);

    assert!(server.sockets().connected().is_empty());
}

#[test]
fn test_disconnect_and_rooms() {
    let server = Server::new();
    let alice_client = ClientSocket::new();
    let bob_client = ClientSocket::new();
    let alice = server.sockets().add(&alice_client);
    let bob = server.sockets().add(&bob_client);
    assert_ok!(alice.join("lobby"));
    assert_ok!(bob.join("lobby"));

    let heard = Arc::new(Mutex::new(Vec::new()));
    for (name, client) in [("alice", &alice_client), ("bob", &bob_client)] {
        let sink = Arc::clone(&heard);
        client.on("chat", move |_| sink.lock().push(name));
    }

    let lobby = assert_ok!(alice.to("lobby"));
    lobby.emit("chat", vec![json!("hi bob")]);
    assert_eq!(*heard.lock(), vec!["bob"]);

    bob.disconnect();
    heard.lock().clear();
    server.to("lobby").emit("chat", vec![json!("anyone?")]);

    assert_eq!(*heard.lock(), vec!["alice"]);
    assert!(!server.sockets().is_connected(bob.id()));
}

fn rejecting_namespace() -> Namespace {
    let namespace = Namespace::new("/");
    namespace.use_middleware(|_: &ServerSocket, next: Next| next.reject("Simulated failure."));
    namespace
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_error_listener_on_multi_thread_runtime() {
    let namespace = rejecting_namespace();

    for _ in 0..200 {
        let client = ClientSocket::new();
        namespace.add(&client);
        let mut errors = record_errors(&client);

        let payload = errors.recv().await.unwrap();
        assert_eq!(payload, vec![json!("Simulated failure.")]);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_err!(errors.try_recv());
    }
    assert!(namespace.connected().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_error_listener_after_delay_on_multi_thread_runtime() {
    let namespace = rejecting_namespace();
    let client = ClientSocket::new();
    let (tx, rx) = std::sync::mpsc::channel();
    let early = tx.clone();
    client.on(ERROR_EVENT, move |payload| {
        let _ = early.send(("early", payload.clone()));
    });

    namespace.add(&client);
    // The queued release may well have run by now
    std::thread::sleep(Duration::from_millis(5));
    client.on(ERROR_EVENT, move |payload| {
        let _ = tx.send(("late", payload.clone()));
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut seen: Vec<&str> = rx.try_iter().map(|(who, _)| who).collect();
    seen.sort_unstable();
    assert_eq!(seen, vec!["early", "late"]);
}

#[test]
fn test_late_error_listener_without_runtime() {
    let namespace = rejecting_namespace();
    let client = ClientSocket::new();

    namespace.add(&client);
    std::thread::sleep(Duration::from_millis(2));
    assert_eq!(client.pending_errors(), 1);

    let (tx, rx) = std::sync::mpsc::channel();
    client.on(ERROR_EVENT, move |payload| {
        let _ = tx.send(payload.clone());
    });

    let received: Vec<Payload> = rx.try_iter().collect();
    assert_eq!(received, vec![vec![json!("Simulated failure.")]]);
    assert_eq!(client.pending_errors(), 0);
}

#[test]
fn test_release_without_runtime_reaches_early_listener() {
    let namespace = rejecting_namespace();
    let client = ClientSocket::new();
    let (tx, rx) = std::sync::mpsc::channel();
    client.on(ERROR_EVENT, move |payload| {
        let _ = tx.send(payload.clone());
    });

    namespace.add(&client);
    assert_err!(rx.try_recv());

    client.release();
    client.release();

    let received: Vec<Payload> = rx.try_iter().collect();
    assert_eq!(received, vec![vec![json!("Simulated failure.")]]);
}

#[tokio::test]
async fn test_create_socket_rejection_is_observable() {
    let server = Server::new();
    server.use_middleware(|_: &ServerSocket, next: Next| next.reject("Server closed"));

    let client = server.create_socket();
    let mut errors = record_errors(&client);

    assert_eq!(errors.recv().await.unwrap(), vec![json!("Server closed")]);
    assert!(server.sockets().connected().is_empty());
}

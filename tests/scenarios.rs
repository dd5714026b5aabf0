//! Adapter behavior driven event by event through a scripted provider.

mod common;

use bytes::Bytes;
use http::Method;
use std::time::Duration;

use common::{scripted, Call};
use overlay_bridge::net::ListenerState;
use overlay_bridge::transport::{ConnHandle, DialMode, PeerInfo, RequestHandle, ServicePermissions, Status};
use overlay_bridge::{
    AdapterError, ListenArgs, RequestEvent, RequestPhase, RequestSpec, ResponseHead, SocketEvent,
    TransportEvent,
};

fn peer(id: &str) -> PeerInfo {
    PeerInfo {
        caller_id: Some(id.to_string()),
        app_data: None,
    }
}

#[tokio::test]
async fn dial_resolves_once_with_transport_handle() {
    let mut h = scripted();
    let adapter = h.adapter.clone();
    let dial = tokio::spawn(async move { adapter.dial("echo-svc").await });

    let token = h.provider.connect_token("echo-svc").await;
    assert_eq!(token.as_u64(), 1);
    h.sink.deliver(TransportEvent::Connected {
        token,
        result: Ok(ConnHandle::new(7)),
    });
    assert_eq!(h.dispatcher.run_pending().unwrap(), 1);

    let socket = dial.await.unwrap().unwrap();
    assert_eq!(socket.handle(), ConnHandle::new(7));
    assert_eq!(socket.listener(), None);
    assert_eq!(h.adapter.open_sockets(), 1);

    let connects = h
        .provider
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Connect { .. }))
        .count();
    assert_eq!(connects, 1);

    // A second completion for the same token is a fault, not a second connect.
    h.sink.deliver(TransportEvent::Connected {
        token,
        result: Ok(ConnHandle::new(8)),
    });
    let err = h.dispatcher.run_pending().unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn dial_failure_carries_provider_status() {
    let mut h = scripted();
    let adapter = h.adapter.clone();
    let dial = tokio::spawn(async move { adapter.dial("missing").await });

    let token = h.provider.connect_token("missing").await;
    h.sink.deliver(TransportEvent::Connected {
        token,
        result: Err(Status::SERVICE_UNAVAILABLE),
    });
    h.dispatcher.run_pending().unwrap();

    let err = dial.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        AdapterError::TransportFailure {
            op: "connect",
            status: Status::SERVICE_UNAVAILABLE
        }
    );
    assert_eq!(h.adapter.open_sockets(), 0);
}

#[tokio::test]
async fn websocket_dials_the_url_host_in_datagram_mode() {
    let mut h = scripted();
    let adapter = h.adapter.clone();
    let connect = tokio::spawn(async move { adapter.websocket("wss://chat-live/socket?room=1").await });

    let mode = h
        .provider
        .wait_for(|c| match c {
            Call::Connect { service, mode, .. } if service == "chat-live" => Some(*mode),
            _ => None,
        })
        .await;
    assert_eq!(mode, DialMode::Datagram);

    let token = h.provider.connect_token("chat-live").await;
    h.sink.deliver(TransportEvent::Connected {
        token,
        result: Ok(ConnHandle::new(21)),
    });
    h.dispatcher.run_pending().unwrap();
    assert_eq!(connect.await.unwrap().unwrap().handle(), ConnHandle::new(21));

    let err = h.adapter.websocket("ftp://chat-live").await.unwrap_err();
    assert!(matches!(err, AdapterError::InvalidArgument(_)));
}

#[tokio::test]
async fn empty_service_name_is_rejected_before_the_transport() {
    let h = scripted();
    let err = h.adapter.dial("").await.unwrap_err();
    assert!(matches!(err, AdapterError::InvalidArgument(_)));
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn accepted_client_receives_data_then_closes_on_empty_chunk() {
    let mut h = scripted();
    let mut server = h.adapter.server();
    server.listen("chat", ()).unwrap();

    let token = h.provider.listen_token("chat").await;
    assert_eq!(token.as_u64(), 1);
    h.sink.deliver(TransportEvent::Listening {
        token,
        status: Status::OK,
    });
    h.sink.deliver(TransportEvent::Accepted {
        token,
        client: ConnHandle::new(42),
        status: Status::OK,
        peer: peer("alice"),
    });
    h.dispatcher.run_pending().unwrap();

    let mut socket = server.accept().await.unwrap();
    assert_eq!(socket.handle(), ConnHandle::new(42));
    assert_eq!(socket.listener(), Some(token));
    assert_eq!(socket.peer().caller_id.as_deref(), Some("alice"));
    assert_eq!(server.connections(), 1);

    h.sink.deliver(TransportEvent::AcceptData {
        token,
        client: ConnHandle::new(42),
        data: Bytes::from_static(b"hello"),
    });
    h.sink.deliver(TransportEvent::AcceptData {
        token,
        client: ConnHandle::new(42),
        data: Bytes::new(),
    });
    h.dispatcher.run_pending().unwrap();

    assert_eq!(
        socket.recv().await,
        Some(SocketEvent::Data(Bytes::from_static(b"hello")))
    );
    assert_eq!(socket.recv().await, Some(SocketEvent::Closed));
    assert_eq!(socket.recv().await, None);
    assert!(socket.is_closed());
    assert_eq!(server.connections(), 0);
    assert!(h.provider.calls().contains(&Call::Close(ConnHandle::new(42))));

    // Late data for the closed client is dropped, not routed.
    h.sink.deliver(TransportEvent::AcceptData {
        token,
        client: ConnHandle::new(42),
        data: Bytes::from_static(b"late"),
    });
    h.dispatcher.run_pending().unwrap();
    assert_eq!(socket.try_recv(), None);
}

#[tokio::test]
async fn concurrent_clients_of_one_listener_stay_separate() {
    let mut h = scripted();
    let mut server = h.adapter.server();
    server.listen("chat", ()).unwrap();
    let token = h.provider.listen_token("chat").await;

    h.sink.deliver(TransportEvent::Listening {
        token,
        status: Status::OK,
    });
    for client in [10, 11] {
        h.sink.deliver(TransportEvent::Accepted {
            token,
            client: ConnHandle::new(client),
            status: Status::OK,
            peer: PeerInfo::default(),
        });
    }
    h.sink.deliver(TransportEvent::AcceptData {
        token,
        client: ConnHandle::new(11),
        data: Bytes::from_static(b"to eleven"),
    });
    h.sink.deliver(TransportEvent::AcceptData {
        token,
        client: ConnHandle::new(10),
        data: Bytes::from_static(b"to ten"),
    });
    h.dispatcher.run_pending().unwrap();

    let mut first = server.accept().await.unwrap();
    let mut second = server.accept().await.unwrap();
    assert_eq!(first.handle(), ConnHandle::new(10));
    assert_eq!(second.handle(), ConnHandle::new(11));
    assert_eq!(server.connections(), 2);

    assert_eq!(
        first.recv().await,
        Some(SocketEvent::Data(Bytes::from_static(b"to ten")))
    );
    assert_eq!(
        second.recv().await,
        Some(SocketEvent::Data(Bytes::from_static(b"to eleven")))
    );
    assert_eq!(first.try_recv(), None);
    assert_eq!(second.try_recv(), None);
}

#[tokio::test]
async fn failed_accept_hands_out_no_socket() {
    let mut h = scripted();
    let mut server = h.adapter.server();
    server.listen("chat", ()).unwrap();
    let token = h.provider.listen_token("chat").await;

    h.sink.deliver(TransportEvent::Listening {
        token,
        status: Status::OK,
    });
    h.sink.deliver(TransportEvent::Accepted {
        token,
        client: ConnHandle::new(5),
        status: Status::FAILURE,
        peer: PeerInfo::default(),
    });
    h.dispatcher.run_pending().unwrap();

    assert_eq!(server.connections(), 0);
    assert_eq!(h.adapter.open_sockets(), 0);
}

#[tokio::test]
async fn events_queued_before_close_still_arrive_then_token_is_retired() {
    let mut h = scripted();
    let mut server = h.adapter.server();
    server.listen("chat", ()).unwrap();
    let token = h.provider.listen_token("chat").await;

    h.sink.deliver(TransportEvent::Listening {
        token,
        status: Status::OK,
    });
    h.sink.deliver(TransportEvent::Accepted {
        token,
        client: ConnHandle::new(42),
        status: Status::OK,
        peer: PeerInfo::default(),
    });
    h.dispatcher.run_pending().unwrap();
    let mut socket = server.accept().await.unwrap();

    // Queued, not yet dispatched, when close is requested.
    h.sink.deliver(TransportEvent::AcceptData {
        token,
        client: ConnHandle::new(42),
        data: Bytes::from_static(b"last words"),
    });
    let closing = tokio::spawn(async move {
        let result = server.close().await;
        (server, result)
    });
    h.provider
        .wait_for(|c| (*c == Call::CloseListener(token)).then_some(()))
        .await;

    assert_eq!(h.dispatcher.run_pending().unwrap(), 2);
    let (server, result) = closing.await.unwrap();
    result.unwrap();
    assert_eq!(server.state(), ListenerState::Created);
    assert_eq!(h.adapter.active_listeners(), 0);

    assert_eq!(
        socket.recv().await,
        Some(SocketEvent::Data(Bytes::from_static(b"last words")))
    );
    assert_eq!(socket.recv().await, Some(SocketEvent::Closed));

    h.sink.deliver(TransportEvent::AcceptData {
        token,
        client: ConnHandle::new(42),
        data: Bytes::from_static(b"too late"),
    });
    let err = h.dispatcher.run_pending().unwrap_err();
    assert_eq!(
        err,
        AdapterError::ConsistencyFault {
            registry: "listener",
            token
        }
    );
}

#[tokio::test]
async fn unknown_listener_token_stops_the_dispatcher() {
    let h = scripted();
    let token = overlay_bridge::transport::Token::new(99);
    h.sink.deliver(TransportEvent::Accepted {
        token,
        client: ConnHandle::new(1),
        status: Status::OK,
        peer: PeerInfo::default(),
    });

    let err = h.dispatcher.run().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(h.adapter.is_shut_down());
    assert!(h.provider.calls().contains(&Call::Shutdown));
}

#[tokio::test]
async fn failed_bind_reports_and_releases_the_listener() {
    let mut h = scripted();
    let mut server = h.adapter.server();
    let (tx, rx) = tokio::sync::oneshot::channel();
    server
        .listen(
            "taken",
            ListenArgs::callback(move |result| {
                let _ = tx.send(result);
            }),
        )
        .unwrap();
    let token = h.provider.listen_token("taken").await;

    h.sink.deliver(TransportEvent::Listening {
        token,
        status: Status::NOT_AUTHORIZED,
    });
    h.dispatcher.run_pending().unwrap();

    assert_eq!(
        rx.await.unwrap(),
        Err(AdapterError::TransportFailure {
            op: "listen",
            status: Status::NOT_AUTHORIZED
        })
    );
    assert!(!server.is_listening());
    assert_eq!(server.accept().await.map(|s| s.handle()), None);
    assert_eq!(h.adapter.active_listeners(), 0);
    assert_eq!(server.close().await, Err(AdapterError::NotListening));
}

#[tokio::test]
async fn listen_and_close_enforce_server_state() {
    let mut h = scripted();
    let mut server = h.adapter.server();
    assert_eq!(server.close().await, Err(AdapterError::NotListening));

    server.listen("svc", ()).unwrap();
    assert_eq!(server.listen("svc", ()), Err(AdapterError::AlreadyListening));
    assert_eq!(server.address().map(|a| a.service), Some("svc".to_string()));

    let closing = tokio::spawn(async move {
        let result = server.close().await;
        (server, result)
    });
    let token = h
        .provider
        .wait_for(|c| match c {
            Call::CloseListener(token) => Some(*token),
            _ => None,
        })
        .await;
    h.dispatcher.run_pending().unwrap();

    let (mut server, result) = closing.await.unwrap();
    result.unwrap();
    assert_eq!(server.address(), None);
    assert_eq!(server.close().await, Err(AdapterError::NotListening));

    // The bind outcome for a closed listener finds nobody home.
    h.sink.deliver(TransportEvent::Listening {
        token,
        status: Status::OK,
    });
    assert!(h.dispatcher.run_pending().unwrap_err().is_fatal());
}

#[tokio::test]
async fn writes_resolve_on_completion_and_fail_after_close() {
    let mut h = scripted();
    let adapter = h.adapter.clone();
    let dial = tokio::spawn(async move { adapter.dial("echo-svc").await });
    let token = h.provider.connect_token("echo-svc").await;
    h.sink.deliver(TransportEvent::Connected {
        token,
        result: Ok(ConnHandle::new(3)),
    });
    h.dispatcher.run_pending().unwrap();
    let socket = dial.await.unwrap().unwrap();

    let ack = socket.write("ping").unwrap();
    let write_token = h
        .provider
        .wait_for(|c| match c {
            Call::Write { conn, data, token } if *conn == ConnHandle::new(3) => {
                assert_eq!(&data[..], b"ping");
                Some(*token)
            }
            _ => None,
        })
        .await;
    h.sink.deliver(TransportEvent::WriteComplete {
        conn: ConnHandle::new(3),
        token: write_token,
        status: Status::OK,
    });
    h.dispatcher.run_pending().unwrap();
    assert_eq!(ack.await, Ok(4));

    let unacked = socket.write("pong").unwrap();
    socket.close().unwrap();
    assert_eq!(unacked.await, Err(AdapterError::ConnectionClosed));
    assert_eq!(socket.write("again").unwrap_err(), AdapterError::ConnectionClosed);
    assert_eq!(socket.close(), Err(AdapterError::ConnectionClosed));
    assert_eq!(h.adapter.open_sockets(), 0);
}

#[tokio::test]
async fn write_completion_racing_a_close_is_not_a_fault() {
    let mut h = scripted();
    let adapter = h.adapter.clone();
    let dial = tokio::spawn(async move { adapter.dial("echo-svc").await });
    let token = h.provider.connect_token("echo-svc").await;
    h.sink.deliver(TransportEvent::Connected {
        token,
        result: Ok(ConnHandle::new(7)),
    });
    h.dispatcher.run_pending().unwrap();
    let socket = dial.await.unwrap().unwrap();

    let ack = socket.write("in flight").unwrap();
    let write_token = h
        .provider
        .wait_for(|c| match c {
            Call::Write { token, .. } => Some(*token),
            _ => None,
        })
        .await;

    h.provider.slow_close(Duration::from_millis(200));
    let closer = std::thread::spawn(move || socket.close());
    std::thread::sleep(Duration::from_millis(50));

    let completed = h.dispatcher.handle(TransportEvent::WriteComplete {
        conn: ConnHandle::new(7),
        token: write_token,
        status: Status::OK,
    });
    assert_eq!(completed, Ok(()));
    assert_eq!(closer.join().unwrap(), Ok(()));
    assert_eq!(ack.await, Err(AdapterError::ConnectionClosed));

    // The dispatcher keeps going.
    h.sink.deliver(TransportEvent::WriteComplete {
        conn: ConnHandle::new(7),
        token: write_token,
        status: Status::OK,
    });
    assert_eq!(h.dispatcher.run_pending(), Ok(1));
    assert!(!h.adapter.is_shut_down());
}

#[tokio::test]
async fn body_ack_for_a_dropped_request_is_not_a_fault() {
    let mut h = scripted();
    let adapter = h.adapter.clone();
    let open = tokio::spawn(async move {
        adapter
            .request(RequestSpec::service("api", Method::POST, "/upload"))
            .await
    });
    let token = h
        .provider
        .wait_for(|c| match c {
            Call::RequestOpen { token, .. } => Some(*token),
            _ => None,
        })
        .await;
    h.sink.deliver(TransportEvent::RequestOpened {
        token,
        result: Ok(RequestHandle::new(11)),
    });
    h.dispatcher.run_pending().unwrap();
    let request = open.await.unwrap().unwrap();

    let ack = request.send_data("chunk").unwrap();
    let ack_token = h
        .provider
        .wait_for(|c| match c {
            Call::RequestData { token, .. } => Some(*token),
            _ => None,
        })
        .await;
    drop(request);
    assert_eq!(ack.await, Err(AdapterError::ConnectionClosed));

    h.sink.deliver(TransportEvent::RequestDataAck {
        req: RequestHandle::new(11),
        token: ack_token,
        status: Status::OK,
    });
    assert_eq!(h.dispatcher.run_pending(), Ok(1));
    assert_eq!(h.adapter.open_requests(), 0);
}

#[tokio::test]
async fn request_phases_follow_response_and_chunks() {
    let mut h = scripted();
    let adapter = h.adapter.clone();
    let open = tokio::spawn(async move {
        adapter
            .request(RequestSpec::service("api", Method::GET, "/items"))
            .await
    });
    let token = h
        .provider
        .wait_for(|c| match c {
            Call::RequestOpen { path, token } if path == "/items" => Some(*token),
            _ => None,
        })
        .await;
    h.sink.deliver(TransportEvent::RequestOpened {
        token,
        result: Ok(RequestHandle::new(5)),
    });
    h.dispatcher.run_pending().unwrap();
    let mut request = open.await.unwrap().unwrap();
    assert_eq!(request.handle(), RequestHandle::new(5));

    let head = ResponseHead::from_parts(200, "OK", [("Content-Type", "text/plain")]).unwrap();
    h.sink.deliver(TransportEvent::Response {
        req: RequestHandle::new(5),
        result: Ok(head.clone()),
    });
    h.sink.deliver(TransportEvent::ResponseData {
        req: RequestHandle::new(5),
        data: Bytes::from_static(b"first"),
    });
    h.sink.deliver(TransportEvent::ResponseData {
        req: RequestHandle::new(5),
        data: Bytes::from_static(b"second"),
    });
    h.dispatcher.run_pending().unwrap();

    assert_eq!(
        request.phase_trail(),
        vec![
            RequestPhase::Opened,
            RequestPhase::AwaitingResponse,
            RequestPhase::ReceivingBody,
            RequestPhase::ReceivingBody,
        ]
    );
    assert_eq!(request.next_event().await, Some(RequestEvent::Response(head)));
    assert_eq!(
        request.next_event().await,
        Some(RequestEvent::Data(Bytes::from_static(b"first")))
    );
    assert_eq!(
        request.next_event().await,
        Some(RequestEvent::Data(Bytes::from_static(b"second")))
    );

    h.sink.deliver(TransportEvent::ResponseData {
        req: RequestHandle::new(5),
        data: Bytes::new(),
    });
    h.dispatcher.run_pending().unwrap();
    assert_eq!(request.next_event().await, Some(RequestEvent::Complete));
    assert_eq!(request.next_event().await, None);
    assert_eq!(request.phase(), RequestPhase::Complete);
}

#[tokio::test]
async fn request_body_chunks_then_end() {
    let mut h = scripted();
    let adapter = h.adapter.clone();
    let open = tokio::spawn(async move {
        adapter
            .request(RequestSpec::service("api", Method::POST, "/upload"))
            .await
    });
    let token = h
        .provider
        .wait_for(|c| match c {
            Call::RequestOpen { token, .. } => Some(*token),
            _ => None,
        })
        .await;
    h.sink.deliver(TransportEvent::RequestOpened {
        token,
        result: Ok(RequestHandle::new(9)),
    });
    h.dispatcher.run_pending().unwrap();
    let request = open.await.unwrap().unwrap();

    let ack = request.send_data("chunk").unwrap();
    assert_eq!(request.phase(), RequestPhase::SendingBody);
    let ack_token = h
        .provider
        .wait_for(|c| match c {
            Call::RequestData { token, .. } => Some(*token),
            _ => None,
        })
        .await;
    h.sink.deliver(TransportEvent::RequestDataAck {
        req: RequestHandle::new(9),
        token: ack_token,
        status: Status::OK,
    });
    h.dispatcher.run_pending().unwrap();
    assert_eq!(ack.await, Ok(5));

    request.end();
    request.end();
    assert_eq!(request.phase(), RequestPhase::AwaitingResponse);
    let ends = h
        .provider
        .calls()
        .into_iter()
        .filter(|c| *c == Call::RequestEnd(RequestHandle::new(9)))
        .count();
    assert_eq!(ends, 1);
    assert_eq!(request.send_data("more").unwrap_err(), AdapterError::ConnectionClosed);
}

#[tokio::test]
async fn failed_response_is_terminal() {
    let mut h = scripted();
    let adapter = h.adapter.clone();
    let open = tokio::spawn(async move {
        adapter
            .request(RequestSpec::service("api", Method::GET, "/"))
            .await
    });
    let token = h
        .provider
        .wait_for(|c| match c {
            Call::RequestOpen { token, .. } => Some(*token),
            _ => None,
        })
        .await;
    h.sink.deliver(TransportEvent::RequestOpened {
        token,
        result: Ok(RequestHandle::new(2)),
    });
    h.dispatcher.run_pending().unwrap();
    let mut request = open.await.unwrap().unwrap();

    h.sink.deliver(TransportEvent::Response {
        req: RequestHandle::new(2),
        result: Err(Status::CONN_CLOSED),
    });
    h.sink.deliver(TransportEvent::ResponseData {
        req: RequestHandle::new(2),
        data: Bytes::from_static(b"ignored"),
    });
    h.dispatcher.run_pending().unwrap();

    let err = request.collect().await.unwrap_err();
    assert_eq!(
        err,
        AdapterError::TransportFailure {
            op: "response",
            status: Status::CONN_CLOSED
        }
    );
    assert_eq!(request.phase(), RequestPhase::Failed);
}

#[tokio::test]
async fn service_availability_reports_permissions() {
    let mut h = scripted();
    let adapter = h.adapter.clone();
    let query = tokio::spawn(async move { adapter.service_available("api").await });
    let token = h
        .provider
        .wait_for(|c| match c {
            Call::ServiceAvailable { service, token } if service == "api" => Some(*token),
            _ => None,
        })
        .await;
    h.sink.deliver(TransportEvent::ServiceAvailable {
        token,
        result: Ok(ServicePermissions::DIAL),
    });
    h.dispatcher.run_pending().unwrap();

    let permissions = query.await.unwrap().unwrap();
    assert!(permissions.can_dial());
    assert!(!permissions.can_bind());
}

#[tokio::test]
async fn shutdown_fails_pending_operations_and_closes_everything() {
    let mut h = scripted();
    let mut server = h.adapter.server();
    server.listen("chat", ()).unwrap();
    let listen_token = h.provider.listen_token("chat").await;
    h.sink.deliver(TransportEvent::Listening {
        token: listen_token,
        status: Status::OK,
    });
    h.sink.deliver(TransportEvent::Accepted {
        token: listen_token,
        client: ConnHandle::new(50),
        status: Status::OK,
        peer: PeerInfo::default(),
    });
    h.dispatcher.run_pending().unwrap();
    let mut accepted = server.accept().await.unwrap();

    let adapter = h.adapter.clone();
    let dial = tokio::spawn(async move { adapter.dial("slow").await });
    h.provider.connect_token("slow").await;

    let common::Scripted {
        adapter,
        dispatcher,
        provider,
        ..
    } = h;
    let running = tokio::spawn(dispatcher.run());
    adapter.shutdown();
    running.await.unwrap().unwrap();

    assert_eq!(dial.await.unwrap().unwrap_err(), AdapterError::Shutdown);
    assert_eq!(accepted.recv().await, Some(SocketEvent::Closed));
    assert!(server.accept().await.is_none());
    assert!(provider.calls().contains(&Call::CloseListener(listen_token)));
    assert!(provider.calls().contains(&Call::Shutdown));
    assert_eq!(adapter.open_sockets(), 0);
    assert_eq!(adapter.active_listeners(), 0);
    assert_eq!(adapter.dial("late").await.unwrap_err(), AdapterError::Shutdown);
}

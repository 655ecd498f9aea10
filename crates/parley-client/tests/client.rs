use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};

use parley_client::{
    start, ClientCommand, ClientConfig, ConnectionStatus, SessionEvent,
};
use parley_shared::protocol::{
    Channel, ChannelList, ChatHistory, HistoryRequest, Member, MemberList, Message, OwnIdentity,
    SendMessage, Server, ServerRef,
};
use parley_shared::types::{ChannelId, MessageId, ServerId, UserId, UserStatus};
use parley_shared::{Packet, Request};
use parley_store::LocalCache;

const ME: UserId = UserId(7);
const SERVER: ServerId = ServerId(10);
const GENERAL: ChannelId = ChannelId(55);

type Socket = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}/ws"))
}

fn config(ws_url: String) -> ClientConfig {
    ClientConfig {
        ws_url,
        reconnect_base_ms: 0,
        ..Default::default()
    }
}

async fn push(ws: &mut Socket, packet: Packet) {
    ws.send(WsMessage::Binary(packet.encode().unwrap()))
        .await
        .unwrap();
}

async fn next_request(ws: &mut Socket) -> Request {
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Binary(data))) => return Request::decode(&data).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected server read: {other:?}"),
        }
    }
}

/// Skip events until one matches, failing after a few seconds.
async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Play the backend side of a fresh sync: identity, one server with
/// #general, members, and an empty first history page.
async fn serve_initial_sync(ws: &mut Socket) {
    push(
        ws,
        Packet::OwnIdentity(OwnIdentity {
            user_id: ME,
            display_name: "me".into(),
            picture: String::new(),
            status: UserStatus::Online,
        }),
    )
    .await;
    assert_eq!(next_request(ws).await, Request::ListServers);

    push(
        ws,
        Packet::ServerList(vec![Server {
            id: SERVER,
            name: "home".into(),
            picture: String::new(),
            owner_id: ME,
        }]),
    )
    .await;
    let server = ServerRef { server_id: SERVER };
    assert_eq!(next_request(ws).await, Request::ListChannels(server.clone()));
    assert_eq!(next_request(ws).await, Request::ListMembers(server));

    push(
        ws,
        Packet::ChannelList(ChannelList {
            server_id: SERVER,
            channels: vec![Channel {
                id: GENERAL,
                server_id: SERVER,
                name: "general".into(),
            }],
        }),
    )
    .await;
    assert_eq!(
        next_request(ws).await,
        Request::History(HistoryRequest {
            channel_id: GENERAL,
            from: MessageId::NONE,
        })
    );

    // history before members: the client has to hold it back
    push(
        ws,
        Packet::ChatHistory(ChatHistory {
            channel_id: GENERAL,
            messages: Vec::new(),
        }),
    )
    .await;
    push(
        ws,
        Packet::MemberList(MemberList {
            server_id: SERVER,
            members: vec![Member {
                user_id: ME,
                server_id: SERVER,
                display_name: "me".into(),
                picture: String::new(),
                status: UserStatus::Online,
            }],
        }),
    )
    .await;
}

#[tokio::test]
async fn syncs_and_reconciles_own_message() {
    let (listener, url) = bind().await;

    let backend = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        serve_initial_sync(&mut ws).await;

        let Request::SendMessage(sent) = next_request(&mut ws).await else {
            panic!("expected a chat message");
        };
        push(
            &mut ws,
            Packet::ChatMessage(Message {
                id: MessageId::now(),
                channel_id: sent.channel_id,
                user_id: ME,
                text: sent.text.clone(),
                attachments: Vec::new(),
                edited: false,
                reply_to: sent.reply_to,
            }),
        )
        .await;

        // the client acknowledges what it displayed
        let ack = next_request(&mut ws).await;
        assert!(matches!(ack, Request::Ack(_)));
        while ws.next().await.is_some() {}
        sent
    });

    let (handle, mut events, driver) =
        start(&config(url), LocalCache::in_memory().unwrap());

    tokio::time::timeout(Duration::from_secs(5), handle.wait_ready())
        .await
        .expect("identity never arrived");
    wait_for(&mut events, |e| *e == SessionEvent::NoHistory(GENERAL)).await;

    handle
        .send(ClientCommand::Submit {
            text: "hello".into(),
            files: Vec::new(),
        })
        .await
        .unwrap();

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::MessageAdded { ghost: true, .. })
    })
    .await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::GhostRemoved { .. })).await;
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::MessageAdded { ghost: false, .. })
    })
    .await;

    handle.shutdown().await;
    tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .expect("driver did not stop")
        .unwrap();

    let sent = backend.await.unwrap();
    assert_eq!(
        sent,
        SendMessage {
            channel_id: GENERAL,
            text: "hello".into(),
            reply_to: MessageId::NONE,
            attachment_token: None,
        }
    );
}

#[tokio::test]
async fn reconnect_triggers_full_resync() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        serve_initial_sync(&mut ws).await;
        ws.close(None).await.unwrap();
        drop(ws);

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        serve_initial_sync(&mut ws).await;
        while ws.next().await.is_some() {}
    });

    let (handle, mut events, _driver) =
        start(&config(url), LocalCache::in_memory().unwrap());

    wait_for(&mut events, |e| *e == SessionEvent::NoHistory(GENERAL)).await;
    wait_for(&mut events, |e| {
        *e == SessionEvent::Status(ConnectionStatus::Reconnecting { attempt: 1 })
    })
    .await;
    wait_for(&mut events, |e| *e == SessionEvent::Resynchronizing).await;
    wait_for(&mut events, |e| *e == SessionEvent::Ready { user_id: ME }).await;
    wait_for(&mut events, |e| *e == SessionEvent::NoHistory(GENERAL)).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn reports_failure_after_giving_up() {
    let (listener, url) = bind().await;
    drop(listener);

    let (handle, mut events, driver) = start(
        &ClientConfig {
            max_reconnect_attempts: 2,
            ..config(url)
        },
        LocalCache::in_memory().unwrap(),
    );

    wait_for(&mut events, |e| {
        *e == SessionEvent::Status(ConnectionStatus::Failed)
    })
    .await;
    assert_eq!(ConnectionStatus::Failed.to_string(), "failed to reconnect");

    tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .expect("driver should stop once the connection is gone")
        .unwrap();
    assert!(handle.send(ClientCommand::CreateInvite).await.is_err());
}

#[tokio::test]
async fn rejected_commands_are_reported() {
    let (listener, url) = bind().await;

    // a backend that accepts but never identifies the user
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let (handle, mut events, _driver) = start(&config(url), LocalCache::in_memory().unwrap());
    wait_for(&mut events, |e| {
        *e == SessionEvent::Status(ConnectionStatus::Connected)
    })
    .await;

    handle
        .send(ClientCommand::SelectChannel(GENERAL))
        .await
        .unwrap();
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::CommandFailed { .. })).await;
    assert!(matches!(event, SessionEvent::CommandFailed { reason } if reason.contains("identity")));
    assert!(!handle.is_ready());

    handle.shutdown().await;
}

#[tokio::test]
async fn commands_while_disconnected_are_refused() {
    let (listener, url) = bind().await;
    let (resume_tx, resume_rx) = oneshot::channel::<()>();

    let backend = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        serve_initial_sync(&mut ws).await;
        ws.close(None).await.unwrap();
        drop(ws);

        // hold the reconnect in its handshake until the test is done offline
        resume_rx.await.unwrap();
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        // the new socket starts with a clean resync, nothing from before
        serve_initial_sync(&mut ws).await;
        ws
    });

    let (handle, mut events, _driver) =
        start(&config(url), LocalCache::in_memory().unwrap());

    wait_for(&mut events, |e| *e == SessionEvent::NoHistory(GENERAL)).await;
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Status(ConnectionStatus::Reconnecting { .. }))
    })
    .await;

    handle
        .send(ClientCommand::SelectChannel(GENERAL))
        .await
        .unwrap();
    handle
        .send(ClientCommand::Submit {
            text: "lost".into(),
            files: Vec::new(),
        })
        .await
        .unwrap();
    for _ in 0..2 {
        let event =
            wait_for(&mut events, |e| matches!(e, SessionEvent::CommandFailed { .. })).await;
        assert!(
            matches!(&event, SessionEvent::CommandFailed { reason } if reason.contains("Not connected")),
            "{event:?}"
        );
    }

    resume_tx.send(()).unwrap();
    wait_for(&mut events, |e| *e == SessionEvent::Resynchronizing).await;
    wait_for(&mut events, |e| *e == SessionEvent::NoHistory(GENERAL)).await;

    let _ws = tokio::time::timeout(Duration::from_secs(5), backend)
        .await
        .expect("backend did not finish the resync")
        .unwrap();
    handle.shutdown().await;
}

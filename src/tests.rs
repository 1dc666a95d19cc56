#[cfg(test)]
mod tests {
    use crate::bootstrap::{PlacementResponse, PlacementService, SessionProvider};
    use crate::client::{ChannelClient, ConnectOptions};
    use crate::command::{
        Command, InboundFrame, MessageBody, MessageRecord, OutboundFrame, RoomDescriptor,
        UserRecord,
    };
    use crate::config::{ChannelConfig, LoadConfig, TOKEN_SPLITTER};
    use crate::error::Error;
    use crate::frame::{Frame, OpCode};
    use crate::handshake::construct_http_request;
    use crate::read::read_frame;
    use crate::room::{RoomActor, RoomState};
    use crate::stream::SessionStream;
    use crate::tracking::{DeliveryVerdict, Receipt, RoomTracker};
    use crate::user::{UserActor, UserState};
    use crate::utils::{generate_websocket_accept_value, now_millis};
    use crate::write::{Writer, WriterKind};
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;
    use tokio::io::{split, AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
    use tokio::sync::Mutex;
    use tokio::time::{sleep, timeout};

    // ---- in-test chat backend -------------------------------------------

    /// What the mock backend does with the frames it reads.
    #[derive(Clone, Copy)]
    struct ServerBehavior {
        /// Answer create/join and text-message commands with an RP ack.
        ack: bool,
        /// Broadcast every text message to all connected sessions.
        echo: bool,
        /// Send the message history as an ALL_TM frame to every joiner.
        backlog: bool,
    }

    #[derive(Default)]
    struct ServerState {
        peers: StdMutex<Vec<UnboundedSender<InboundFrame>>>,
        messages: StdMutex<Vec<(i64, String)>>,
        next_message_id: AtomicI64,
        keepalive_count: AtomicUsize,
        close_count: AtomicUsize,
    }

    /// A small chat backend counterpart: accepts upgrades, acks requests,
    /// broadcasts text messages, hands joiners the backlog. Enough of the
    /// protocol for the client side to run its full lifecycle against.
    async fn spawn_chat_server(behavior: ServerBehavior) -> (SocketAddr, Arc<ServerState>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    socket,
                    Arc::clone(&accept_state),
                    behavior,
                ));
            }
        });

        (addr, state)
    }

    async fn handle_connection(socket: TcpStream, state: Arc<ServerState>, behavior: ServerBehavior) {
        let (read_half, mut write_half) = split(SessionStream::Plain(socket));
        let mut buf_reader = BufReader::new(read_half);

        // Upgrade request: read the header block, answer with the accept key.
        let mut request = String::new();
        loop {
            let mut line = String::new();
            if buf_reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                return;
            }
            let done = line == "\r\n" || line == "\n";
            request.push_str(&line);
            if done {
                break;
            }
        }

        let Some(key) = parse_websocket_key(&request) else {
            return;
        };

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            generate_websocket_accept_value(&key)
        );
        if write_half.write_all(response.as_bytes()).await.is_err() {
            return;
        }

        let writer = Arc::new(Mutex::new(Writer::new(write_half, WriterKind::Server)));

        // Everything this session should receive flows through one queue.
        // The queue only joins the broadcast list once the session joins the
        // room, mirroring how a backend would route messages.
        let (tx, mut rx) = unbounded_channel::<InboundFrame>();

        let writer_out = Arc::clone(&writer);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let payload = serde_json::to_vec(&frame).unwrap();
                if writer_out
                    .lock()
                    .await
                    .write_frame(Frame::text(payload))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        loop {
            let frame = match read_frame(&mut buf_reader).await {
                Ok(frame) => frame,
                Err(_) => break,
            };

            match frame.opcode {
                OpCode::Text => {
                    let Ok(outbound) = serde_json::from_slice::<OutboundFrame>(&frame.payload)
                    else {
                        continue;
                    };

                    if outbound.keepalive.is_some() {
                        state.keepalive_count.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }

                    match outbound.command {
                        Some(Command::RoomCreateJoin) => {
                            // Backlog snapshot first, then broadcast
                            // membership: a message landing in between is
                            // missed, never delivered twice.
                            if behavior.backlog {
                                let records: Vec<MessageRecord> = state
                                    .messages
                                    .lock()
                                    .unwrap()
                                    .iter()
                                    .map(|(id, text)| MessageRecord {
                                        id: Some(*id),
                                        text: Some(text.clone()),
                                        ..Default::default()
                                    })
                                    .collect();
                                if !records.is_empty() {
                                    let _ = tx.send(InboundFrame {
                                        command: Command::AllTextMessages,
                                        messages: Some(records),
                                        ..Default::default()
                                    });
                                }
                            }
                            state.peers.lock().unwrap().push(tx.clone());
                            if behavior.ack {
                                if let Some(request_id) = outbound.request_id.as_deref() {
                                    let _ = tx.send(InboundFrame::ack(request_id));
                                }
                            }
                        }
                        Some(Command::TextMessage) => {
                            let text = outbound
                                .message
                                .as_ref()
                                .map(|m| m.text.clone())
                                .unwrap_or_default();
                            let id = state.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
                            state.messages.lock().unwrap().push((id, text.clone()));

                            if behavior.ack {
                                if let Some(request_id) = outbound.request_id.as_deref() {
                                    let _ = tx.send(InboundFrame::ack(request_id));
                                }
                            }
                            if behavior.echo {
                                let echo = InboundFrame {
                                    command: Command::TextMessage,
                                    messages: Some(vec![MessageRecord {
                                        id: Some(id),
                                        text: Some(text),
                                        ..Default::default()
                                    }]),
                                    ..Default::default()
                                };
                                let peers = state.peers.lock().unwrap().clone();
                                for peer in peers {
                                    let _ = peer.send(echo.clone());
                                }
                            }
                        }
                        _ => {}
                    }
                }
                OpCode::Close => {
                    state.close_count.fetch_add(1, Ordering::SeqCst);
                    let _ = writer.lock().await.write_frame(Frame::close()).await;
                    break;
                }
                OpCode::Ping => {
                    let _ = writer
                        .lock()
                        .await
                        .write_frame(Frame::pong(frame.payload))
                        .await;
                }
                _ => {}
            }
        }
    }

    fn parse_websocket_key(request: &str) -> Option<String> {
        request
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with("sec-websocket-key:"))
            .and_then(|line| line.split(':').nth(1))
            .map(|value| value.trim().to_string())
    }

    // ---- static collaborators -------------------------------------------

    struct StaticBootstrap {
        token: String,
        backend_addr: String,
        placement_error: Option<String>,
    }

    impl StaticBootstrap {
        fn for_backend(addr: SocketAddr) -> Arc<Self> {
            Arc::new(StaticBootstrap {
                token: String::from("test-session-token"),
                backend_addr: addr.to_string(),
                placement_error: None,
            })
        }
    }

    #[async_trait]
    impl SessionProvider for StaticBootstrap {
        async fn acquire_session(&self) -> Result<String, Error> {
            Ok(self.token.clone())
        }
    }

    #[async_trait]
    impl PlacementService for StaticBootstrap {
        async fn pick_backend(&self, room_name: &str) -> Result<PlacementResponse, Error> {
            if let Some(reason) = &self.placement_error {
                return Err(Error::PlacementFailed {
                    room: room_name.to_string(),
                    reason: reason.clone(),
                });
            }
            Ok(PlacementResponse {
                backend_addr: self.backend_addr.clone(),
                error_message: None,
                alternative_postfixes: None,
            })
        }
    }

    // ---- helpers --------------------------------------------------------

    fn fast_channel_config() -> ChannelConfig {
        ChannelConfig {
            connect_attempts: 50,
            connect_interval: Duration::from_millis(20),
            ack_attempts: 25,
            ack_interval: Duration::from_millis(20),
            keepalive_interval: Duration::from_secs(5),
            keepalive_check: Duration::from_millis(10),
        }
    }

    fn fast_load_config(backend: SocketAddr) -> LoadConfig {
        LoadConfig {
            server_root: format!("http://{}", backend),
            room_lifespan: Duration::from_millis(1200),
            user_steps: 2,
            users_per_step: 2,
            step_delay: Duration::from_millis(100),
            send_delay_min: Duration::from_millis(150),
            send_delay_span: Duration::from_millis(100),
            teardown_attempts: 100,
            teardown_interval: Duration::from_millis(50),
            channel: fast_channel_config(),
            ..Default::default()
        }
    }

    async fn connect_client(
        addr: SocketAddr,
        tracker: RoomTracker,
        stop: Arc<AtomicBool>,
        config: ChannelConfig,
        user_name: &str,
    ) -> Result<ChannelClient, Error> {
        ChannelClient::connect(ConnectOptions {
            endpoint: format!("ws://{}/ws_entry", addr),
            origin: format!("http://{}", addr),
            session_cookie: String::from("session=test-session-token; "),
            room_name: String::from("room-under-test"),
            user_name: user_name.to_string(),
            tracker,
            stop,
            errors: Arc::new(StdMutex::new(Vec::new())),
            config,
        })
        .await
    }

    // ---- wire types -----------------------------------------------------

    #[test]
    fn test_opcode() {
        assert_eq!(OpCode::from(0x0).unwrap(), OpCode::Continue);
        assert_eq!(OpCode::Text.as_u8(), 0x1);
        assert!(OpCode::from(0x3).is_err());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Text.is_control());
    }

    #[test]
    fn test_outbound_frame_round_trip() {
        let frame = OutboundFrame {
            command: Some(Command::TextMessage),
            request_id: Some(String::from("req-1")),
            room: Some(RoomDescriptor {
                name: String::from("room-1"),
                password: String::from("pw"),
            }),
            user_name: Some(String::from("user-1")),
            message: Some(MessageBody {
                text: String::from("tok-1 hello"),
            }),
            support: Some(true),
            keepalive: Some(String::from("OK")),
        };

        let json = serde_json::to_string(&frame).unwrap();
        let decoded: OutboundFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_inbound_frame_round_trip() {
        let frame = InboundFrame {
            command: Command::AllTextMessages,
            request_id: Some(String::from("req-2")),
            processing_details: Some(String::from("ok")),
            room_id: Some(String::from("rid")),
            user_id: Some(String::from("uid")),
            room_creator_id: Some(String::from("cid")),
            created_at_nano: Some(42),
            build_number: Some(String::from("b17")),
            messages: Some(vec![MessageRecord {
                id: Some(7),
                text: Some(String::from("tok text")),
                supported_count: Some(1),
                rejected_count: Some(0),
                last_edited_at: Some(1),
                last_voted_at: Some(2),
                reply_to_user_id: Some(String::from("u2")),
                reply_to_message_id: Some(3),
                author_id: Some(String::from("u1")),
                created_at_nano: Some(4),
            }]),
            room_users: Some(vec![UserRecord {
                user_id: Some(String::from("u1")),
                user_name: Some(String::from("alice")),
                anonymous: Some(false),
                online: Some(true),
            }]),
        };

        let json = serde_json::to_string(&frame).unwrap();
        let decoded: InboundFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_unknown_command_kind() {
        let decoded: InboundFrame =
            serde_json::from_str(r#"{"c":"SOMETHING_NEW","rq":"r1"}"#).unwrap();
        assert_eq!(decoded.command, Command::Unknown);
    }

    #[test]
    fn test_construct_http_request() {
        let headers = vec![
            (String::from("origin"), String::from("http://localhost")),
            (String::from("Cookie"), String::from("session=abc; ")),
        ];
        let (request, host_with_port, host, use_tls) =
            construct_http_request("ws://localhost:8080/ws_entry", "dGhlIHNhbXBsZSBub25jZQ==", &headers)
                .unwrap();

        assert_eq!(host_with_port, "localhost:8080");
        assert_eq!(host, "localhost");
        assert!(!use_tls);
        assert!(request.starts_with("GET /ws_entry HTTP/1.1"));
        assert!(request.contains("Upgrade: websocket"));
        assert!(request.contains("origin: http://localhost"));
        assert!(request.contains("Cookie: session=abc; "));
    }

    #[test]
    fn test_construct_http_request_invalid_scheme() {
        assert!(construct_http_request("ftp://localhost:8080", "key", &[]).is_err());
    }

    // ---- tracking and audit ---------------------------------------------

    fn backlog_receipt(token: &str, user: &str, at: u64) -> Receipt {
        Receipt {
            token: token.to_string(),
            message_id: Some(1),
            received_at: at,
            user_name: user.to_string(),
            backlog: true,
        }
    }

    #[test]
    fn test_audit_backlog_only_delivery() {
        // A message sent before anyone joined: no live receipts, then one
        // backlog receipt per joiner.
        let tracker = RoomTracker::new();
        tracker.record_sent("tok-early", 1_000);

        assert!(tracker.receipts_for("tok-early").is_empty());

        for (i, user) in ["u0", "u1", "u2", "u3"].iter().enumerate() {
            let joined_at = 2_000 + i as u64 * 100;
            tracker.record_join(user, joined_at);
            tracker.record_receipt(backlog_receipt("tok-early", user, joined_at));
        }

        let audit = tracker.audit(4);
        assert_eq!(audit.total_sent, 1);

        let message = &audit.messages[0];
        assert_eq!(message.receipt_count, 4);
        assert_eq!(message.backlog_count, 4);
        assert_eq!(message.verdict, DeliveryVerdict::Complete);
        // Backlog receipts count as zero delay; they happened at join.
        assert_eq!(message.max_delay_ms, Some(0));
        assert_eq!(audit.max_delay_ms, Some(0));
    }

    #[test]
    fn test_audit_shortfall_categories() {
        // Two of four users missing, both joined after the send: the known
        // backlog-window case.
        let tracker = RoomTracker::new();
        tracker.record_sent("tok-a", 1_000);
        tracker.record_join("u0", 500);
        tracker.record_join("u1", 600);
        tracker.record_join("u2", 2_000);
        tracker.record_join("u3", 2_100);
        for user in ["u0", "u1"] {
            tracker.record_receipt(Receipt {
                token: String::from("tok-a"),
                message_id: Some(1),
                received_at: 1_050,
                user_name: user.to_string(),
                backlog: false,
            });
        }
        let audit = tracker.audit(4);
        assert_eq!(audit.messages[0].verdict, DeliveryVerdict::BacklogWindow);

        // Same shortfall with every user joined before the send: unexplained.
        let tracker = RoomTracker::new();
        tracker.record_sent("tok-b", 1_000);
        for user in ["u0", "u1", "u2", "u3"] {
            tracker.record_join(user, 500);
        }
        for user in ["u0", "u1"] {
            tracker.record_receipt(Receipt {
                token: String::from("tok-b"),
                message_id: Some(1),
                received_at: 1_050,
                user_name: user.to_string(),
                backlog: false,
            });
        }
        let audit = tracker.audit(4);
        assert_eq!(audit.messages[0].verdict, DeliveryVerdict::Deficient);
    }

    #[test]
    fn test_audit_undelivered_and_excess() {
        let tracker = RoomTracker::new();
        tracker.record_sent("tok-lost", 1_000);
        let audit = tracker.audit(2);
        assert_eq!(audit.messages[0].verdict, DeliveryVerdict::Undelivered);

        // More receipts than users in the room is a tracking/protocol bug.
        let tracker = RoomTracker::new();
        tracker.record_sent("tok-dup", 1_000);
        for user in ["u0", "u1", "u0"] {
            tracker.record_receipt(Receipt {
                token: String::from("tok-dup"),
                message_id: Some(1),
                received_at: 1_010,
                user_name: user.to_string(),
                backlog: false,
            });
        }
        let audit = tracker.audit(2);
        assert_eq!(audit.messages[0].verdict, DeliveryVerdict::Excess);
    }

    #[test]
    fn test_audit_delay_math() {
        let tracker = RoomTracker::new();
        tracker.record_sent("tok-1", 1_000);
        tracker.record_receipt(Receipt {
            token: String::from("tok-1"),
            message_id: Some(1),
            received_at: 1_100,
            user_name: String::from("u0"),
            backlog: false,
        });
        tracker.record_receipt(backlog_receipt("tok-1", "u1", 5_000));

        let audit = tracker.audit(2);
        let message = &audit.messages[0];
        assert_eq!(message.verdict, DeliveryVerdict::Complete);
        assert_eq!(message.max_delay_ms, Some(100));
        assert_eq!(message.avg_delay_ms, Some(50));
    }

    // ---- channel behavior -----------------------------------------------

    #[tokio::test]
    async fn test_connect_timeout() {
        // A listener that accepts and then goes silent: the handshake never
        // completes, so the bounded poll has to give up.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut config = fast_channel_config();
        config.connect_attempts = 5;
        config.connect_interval = Duration::from_millis(20);

        let result = connect_client(
            addr,
            RoomTracker::new(),
            Arc::new(AtomicBool::new(false)),
            config,
            "user-timeout",
        )
        .await;

        match result {
            Err(Error::ConnectTimeout { attempts, .. }) => assert_eq!(attempts, 5),
            other => panic!("expected ConnectTimeout, got: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_ack_timeout_when_never_acked() {
        let (addr, _state) = spawn_chat_server(ServerBehavior {
            ack: false,
            echo: false,
            backlog: false,
        })
        .await;

        let mut config = fast_channel_config();
        config.ack_attempts = 3;
        config.ack_interval = Duration::from_millis(20);

        let client = connect_client(
            addr,
            RoomTracker::new(),
            Arc::new(AtomicBool::new(false)),
            config,
            "user-noack",
        )
        .await
        .unwrap();

        let join = OutboundFrame::create_or_join("room-under-test", "pw", "user-noack", "req-9");
        client.send(&join).await.unwrap();

        match client.await_ack(Command::RequestProcessed, "req-9").await {
            Err(Error::AckTimeout {
                command, attempts, ..
            }) => {
                assert_eq!(command, Command::RequestProcessed);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected AckTimeout, got: {:?}", other.err()),
        }

        client.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (addr, state) = spawn_chat_server(ServerBehavior {
            ack: true,
            echo: false,
            backlog: false,
        })
        .await;

        let client = connect_client(
            addr,
            RoomTracker::new(),
            Arc::new(AtomicBool::new(false)),
            fast_channel_config(),
            "user-close",
        )
        .await
        .unwrap();

        client.close().await;
        client.close().await;
        client.close().await;

        sleep(Duration::from_millis(200)).await;
        assert_eq!(state.close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keepalive_once_per_idle_window_and_none_after_stop() {
        let (addr, state) = spawn_chat_server(ServerBehavior {
            ack: true,
            echo: false,
            backlog: false,
        })
        .await;

        let mut config = fast_channel_config();
        config.keepalive_interval = Duration::from_millis(400);
        config.keepalive_check = Duration::from_millis(20);

        let stop = Arc::new(AtomicBool::new(false));
        let client = connect_client(
            addr,
            RoomTracker::new(),
            Arc::clone(&stop),
            config,
            "user-idle",
        )
        .await
        .unwrap();

        // One idle window elapses, the second hasn't yet.
        sleep(Duration::from_millis(650)).await;
        assert_eq!(state.keepalive_count.load(Ordering::SeqCst), 1);

        // Once the stop flag is observed, the loop sends nothing more even
        // though the session stays open.
        stop.store(true, Ordering::SeqCst);
        sleep(Duration::from_millis(900)).await;
        assert_eq!(state.keepalive_count.load(Ordering::SeqCst), 1);

        client.close().await;
    }

    #[tokio::test]
    async fn test_receipt_delay_from_echo() {
        let (addr, _state) = spawn_chat_server(ServerBehavior {
            ack: true,
            echo: true,
            backlog: false,
        })
        .await;

        let tracker = RoomTracker::new();
        let client = connect_client(
            addr,
            tracker.clone(),
            Arc::new(AtomicBool::new(false)),
            fast_channel_config(),
            "user-echo",
        )
        .await
        .unwrap();

        let join = OutboundFrame::create_or_join("room-under-test", "pw", "user-echo", "req-join");
        client.send(&join).await.unwrap();
        client
            .await_ack(Command::RequestProcessed, "req-join")
            .await
            .unwrap();

        let sent_at = now_millis();
        tracker.record_sent("abc123", sent_at);

        let frame = OutboundFrame::text_message(
            "room-under-test",
            "pw",
            "req-echo",
            format!("abc123{}some text", TOKEN_SPLITTER),
        );
        client.send(&frame).await.unwrap();
        client
            .await_ack(Command::RequestProcessed, "req-echo")
            .await
            .unwrap();

        // Wait for the echo to flow back through the dispatch path.
        let receipts = timeout(Duration::from_secs(2), async {
            loop {
                let receipts = tracker.receipts_for("abc123");
                if !receipts.is_empty() {
                    return receipts;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("echo receipt never arrived");

        assert_eq!(receipts.len(), 1);
        let receipt = &receipts[0];
        assert!(!receipt.backlog);
        assert_eq!(receipt.user_name, "user-echo");
        assert!(receipt.received_at >= sent_at);

        client.close().await;
    }

    // ---- actors ---------------------------------------------------------

    #[tokio::test]
    async fn test_placement_error_fails_room_creation() {
        let bootstrap = Arc::new(StaticBootstrap {
            token: String::from("test-session-token"),
            backend_addr: String::from("127.0.0.1:1"),
            placement_error: Some(String::from("no backend available")),
        });

        let config = Arc::new(LoadConfig {
            server_root: String::from("http://127.0.0.1:1"),
            channel: fast_channel_config(),
            ..Default::default()
        });

        let mut room = RoomActor::new(config, bootstrap.clone(), bootstrap);
        let err = room.create(1).await.unwrap_err();

        match err {
            Error::PlacementFailed { reason, .. } => {
                assert_eq!(reason, "no backend available");
            }
            other => panic!("expected PlacementFailed, got: {}", other),
        }
        assert_eq!(room.state(), RoomState::Created);
    }

    #[tokio::test]
    async fn test_blank_session_fails_room_creation() {
        let bootstrap = Arc::new(StaticBootstrap {
            token: String::from("   "),
            backend_addr: String::from("127.0.0.1:1"),
            placement_error: None,
        });

        let config = Arc::new(LoadConfig {
            server_root: String::from("http://127.0.0.1:1"),
            channel: fast_channel_config(),
            ..Default::default()
        });

        let mut room = RoomActor::new(config, bootstrap.clone(), bootstrap);
        assert!(matches!(
            room.create(1).await,
            Err(Error::SessionMissing)
        ));
    }

    #[tokio::test]
    async fn test_user_stop_is_idempotent() {
        let (addr, state) = spawn_chat_server(ServerBehavior {
            ack: true,
            echo: true,
            backlog: true,
        })
        .await;

        let bootstrap = StaticBootstrap::for_backend(addr);
        let config = Arc::new(fast_load_config(addr));
        let tracker = RoomTracker::new();

        let user = Arc::new(UserActor::new(
            Arc::clone(&config),
            bootstrap.clone(),
            bootstrap,
            String::from("room-under-test"),
            tracker,
            0,
        ));

        let handle = tokio::spawn(Arc::clone(&user).run());

        timeout(Duration::from_secs(5), async {
            while user.state() != UserState::Active {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("user never became active");

        user.signal_stop();
        user.signal_stop();
        user.signal_stop();

        handle.await.unwrap().unwrap();
        assert!(user.is_stopped());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(state.close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_room_lifecycle() {
        let (addr, _state) = spawn_chat_server(ServerBehavior {
            ack: true,
            echo: true,
            backlog: true,
        })
        .await;

        let bootstrap = StaticBootstrap::for_backend(addr);
        let config = Arc::new(fast_load_config(addr));
        let total_users = config.total_room_users();

        let room = RoomActor::new(Arc::clone(&config), bootstrap.clone(), bootstrap);
        let audit = room.run(1).await.expect("room lifecycle failed");

        assert_eq!(audit.total_users, total_users);
        assert!(audit.total_sent > 0, "no messages were sent");

        for message in &audit.messages {
            // Receipts never exceed the room's population, and any shortfall
            // is explained by the staged joins.
            assert!(message.receipt_count <= total_users);
            assert!(
                matches!(
                    message.verdict,
                    DeliveryVerdict::Complete | DeliveryVerdict::BacklogWindow
                ),
                "unexpected verdict {:?} for token {}",
                message.verdict,
                message.token
            );
        }

        // Delays exist and are non-negative by construction.
        assert!(audit.max_delay_ms.is_some());
    }
}

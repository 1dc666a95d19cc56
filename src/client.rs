use crate::command::{Command, InboundFrame, MessageRecord, OutboundFrame};
use crate::config::{ChannelConfig, TOKEN_SPLITTER};
use crate::error::Error;
use crate::frame::Frame;
use crate::handshake::connect_session;
use crate::read::ReadStream;
use crate::tracking::{Receipt, RoomTracker};
use crate::utils::now_millis;
use crate::write::Writer;
use futures::StreamExt;
use log::{error, trace};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex as StdMutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::{oneshot, Mutex};
use tokio::time::sleep;
use tokio_stream::wrappers::UnboundedReceiverStream;

// Serialized once; a failure here means the wire types are broken and no
// session could ever keep itself alive, so the process dies.
static KEEPALIVE_PAYLOAD: LazyLock<Vec<u8>> = LazyLock::new(|| {
    serde_json::to_vec(&OutboundFrame::keepalive()).expect("keep-alive payload must serialize")
});

pub struct ConnectOptions {
    pub endpoint: String,
    /// Origin header value for the upgrade request.
    pub origin: String,
    /// Full cookie header value, e.g. "session=<token>; ".
    pub session_cookie: String,
    pub room_name: String,
    pub user_name: String,
    pub tracker: RoomTracker,
    /// Stop flag shared with the owning actor; the keepalive loop watches it.
    pub stop: Arc<AtomicBool>,
    /// Sink for transport errors observed by the session's background tasks.
    pub errors: Arc<StdMutex<Vec<String>>>,
    pub config: ChannelConfig,
}

/// One duplex session against a chat backend: owns the write half, a log of
/// every inbound frame for ack lookups, and the background read, dispatch
/// and keepalive tasks.
pub struct ChannelClient {
    writer: Arc<Mutex<Writer>>,
    received: Arc<StdMutex<Vec<InboundFrame>>>,
    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    last_sent_at: Arc<AtomicU64>,
    errors: Arc<StdMutex<Vec<String>>>,
    config: ChannelConfig,
    room_name: String,
}

impl ChannelClient {
    /// Opens the session. The TCP/TLS connect and upgrade run on their own
    /// task; this call polls for the session to come up, a bounded number of
    /// attempts at a fixed interval, and yields `ConnectTimeout` when the
    /// bound is exhausted first.
    pub async fn connect(options: ConnectOptions) -> Result<Self, Error> {
        let (ready_tx, mut ready_rx) = oneshot::channel();

        let endpoint = options.endpoint.clone();
        let headers = vec![
            (String::from("origin"), options.origin.clone()),
            (String::from("Cookie"), options.session_cookie.clone()),
        ];

        {
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                let _ = ready_tx.send(connect_session(&endpoint, &headers).await);
            });
        }

        let mut attempts = 0;
        let (buf_reader, writer) = loop {
            match ready_rx.try_recv() {
                Ok(Ok(halves)) => break halves,
                Ok(Err(err)) => return Err(err),
                Err(oneshot::error::TryRecvError::Empty) => {
                    if attempts >= options.config.connect_attempts {
                        return Err(Error::ConnectTimeout {
                            endpoint,
                            attempts: options.config.connect_attempts,
                        });
                    }
                    attempts += 1;
                    sleep(options.config.connect_interval).await;
                }
                Err(oneshot::error::TryRecvError::Closed) => return Err(Error::ChannelClosed),
            }
        };

        let writer = Arc::new(Mutex::new(writer));
        let connected = Arc::new(AtomicBool::new(true));
        let (frame_tx, frame_rx) = unbounded_channel();

        let mut read_stream = ReadStream::new(
            buf_reader,
            frame_tx,
            Arc::clone(&writer),
            Arc::clone(&connected),
        );

        {
            let errors = Arc::clone(&options.errors);
            let room_name = options.room_name.clone();
            tokio::spawn(async move {
                if let Err(err) = read_stream.poll_frames().await {
                    trace!(target: "room", "[{}] $$$ channel read ended: {}", room_name, err);
                    errors.lock().unwrap().push(err.to_string());
                }
            });
        }

        let client = ChannelClient {
            writer,
            received: Arc::new(StdMutex::new(Vec::new())),
            connected,
            stop: Arc::clone(&options.stop),
            last_sent_at: Arc::new(AtomicU64::new(now_millis())),
            errors: Arc::clone(&options.errors),
            config: options.config.clone(),
            room_name: options.room_name.clone(),
        };

        client.spawn_dispatch(frame_rx, options.tracker.clone(), options.user_name.clone());
        client.spawn_keepalive();

        trace!(target: "room", "[{}] $$$ opened channel for '{}'", client.room_name, options.user_name);

        Ok(client)
    }

    /// Serializes and transmits one command frame. Fails when the session is
    /// not open. Every successful send refreshes the idle clock the
    /// keepalive loop watches.
    pub async fn send(&self, frame: &OutboundFrame) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::ChannelClosed);
        }

        let payload =
            serde_json::to_vec(frame).map_err(|e| Error::codec("serialize outbound frame", e))?;

        self.writer
            .lock()
            .await
            .write_frame(Frame::text(payload))
            .await?;

        self.last_sent_at.store(now_millis(), Ordering::SeqCst);

        Ok(())
    }

    /// Scans the received-frame log for a frame matching command kind and
    /// request id.
    pub fn find_ack(&self, command: Command, request_id: &str) -> Option<InboundFrame> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .find(|frame| {
                frame.command == command && frame.request_id.as_deref() == Some(request_id)
            })
            .cloned()
    }

    /// Bounded-retry ack wait: `ack_attempts` lookups spaced `ack_interval`
    /// apart. Exhausting the bound yields `AckTimeout`, never a false
    /// success.
    pub async fn await_ack(&self, command: Command, request_id: &str) -> Result<InboundFrame, Error> {
        let attempts = self.config.ack_attempts;

        for _ in 0..attempts {
            if let Some(frame) = self.find_ack(command, request_id) {
                return Ok(frame);
            }
            sleep(self.config.ack_interval).await;
        }

        Err(Error::AckTimeout {
            command,
            request_id: request_id.to_string(),
            attempts,
        })
    }

    /// Snapshot of every frame received so far.
    pub fn received_frames(&self) -> Vec<InboundFrame> {
        self.received.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Signals stop and sends a single Close frame. Safe to call more than
    /// once; only the call that observes the session open emits the frame.
    pub async fn close(&self) {
        self.stop.store(true, Ordering::SeqCst);

        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.writer.lock().await.write_frame(Frame::close()).await;
        }
    }

    fn spawn_dispatch(
        &self,
        frame_rx: UnboundedReceiver<Vec<u8>>,
        tracker: RoomTracker,
        user_name: String,
    ) {
        let received = Arc::clone(&self.received);
        let room_name = self.room_name.clone();

        tokio::spawn(async move {
            let mut frames = UnboundedReceiverStream::new(frame_rx);

            while let Some(payload) = frames.next().await {
                let frame: InboundFrame = match serde_json::from_slice(&payload) {
                    Ok(frame) => frame,
                    Err(err) => {
                        error!(target: "room", "[{}] !!! error while parsing frame from channel: {}", room_name, err);
                        continue;
                    }
                };

                trace!(target: "room", "[{}] ++++++ got frame: {:?}", room_name, frame);

                received.lock().unwrap().push(frame.clone());
                record_receipts(&tracker, &user_name, &frame);
            }
        });
    }

    fn spawn_keepalive(&self) {
        let writer = Arc::clone(&self.writer);
        let connected = Arc::clone(&self.connected);
        let stop = Arc::clone(&self.stop);
        let last_sent_at = Arc::clone(&self.last_sent_at);
        let errors = Arc::clone(&self.errors);
        let interval_ms = self.config.keepalive_interval.as_millis() as u64;
        let check = self.config.keepalive_check;
        let room_name = self.room_name.clone();

        tokio::spawn(async move {
            while connected.load(Ordering::SeqCst) && !stop.load(Ordering::SeqCst) {
                if now_millis().saturating_sub(last_sent_at.load(Ordering::SeqCst)) > interval_ms {
                    let frame = Frame::text(KEEPALIVE_PAYLOAD.clone());
                    if let Err(err) = writer.lock().await.write_frame(frame).await {
                        trace!(target: "room", "[{}] $$$ keepalive send failed: {}", room_name, err);
                        errors.lock().unwrap().push(err.to_string());
                        break;
                    }
                    last_sent_at.store(now_millis(), Ordering::SeqCst);
                } else {
                    sleep(check).await;
                }
            }
        });
    }
}

/// Turns text-message deliveries into receipts: a single echo produces one
/// live receipt, a bulk all-messages frame one backlog receipt per listed
/// message. The token is the leading segment of the body before the
/// splitter.
fn record_receipts(tracker: &RoomTracker, user_name: &str, frame: &InboundFrame) {
    match frame.command {
        Command::TextMessage => {
            let received_at = now_millis();
            if let Some(record) = frame.messages.as_ref().and_then(|m| m.first()) {
                record_one(tracker, user_name, record, received_at, false);
            }
        }
        Command::AllTextMessages => {
            let received_at = now_millis();
            for record in frame.messages.as_deref().unwrap_or_default() {
                record_one(tracker, user_name, record, received_at, true);
            }
        }
        _ => {}
    }
}

fn record_one(
    tracker: &RoomTracker,
    user_name: &str,
    record: &MessageRecord,
    received_at: u64,
    backlog: bool,
) {
    let Some(text) = record.text.as_deref() else {
        return;
    };

    let token = text.split(TOKEN_SPLITTER).next().unwrap_or_default();
    if token.is_empty() {
        return;
    }

    tracker.record_receipt(Receipt {
        token: token.to_string(),
        message_id: record.id,
        received_at,
        user_name: user_name.to_string(),
        backlog,
    });
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One observed delivery of a sent message to one user.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub token: String,
    /// Server-assigned message sequence id, when the record carried one.
    pub message_id: Option<i64>,
    pub received_at: u64,
    pub user_name: String,
    /// True when the message arrived inside the join-time backlog rather
    /// than as a live echo.
    pub backlog: bool,
}

/// Shared per-room delivery state: the send log, the receipt log, and user
/// join times. Constructed by the room, handed by reference to every user
/// actor and channel receive path. Each map sits behind its own lock, held
/// only for the map operation itself, never across I/O or sleeps.
#[derive(Clone, Default)]
pub struct RoomTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    sent: Mutex<HashMap<String, u64>>,
    received: Mutex<HashMap<String, Vec<Receipt>>>,
    joins: Mutex<Vec<(String, u64)>>,
}

impl RoomTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the send timestamp for a fresh token. Tokens are generated
    /// once per send, so keys are never reused.
    pub fn record_sent(&self, token: &str, sent_at: u64) {
        let mut sent = self.inner.sent.lock().unwrap();
        sent.insert(token.to_string(), sent_at);
    }

    pub fn record_receipt(&self, receipt: Receipt) {
        let mut received = self.inner.received.lock().unwrap();
        received
            .entry(receipt.token.clone())
            .or_default()
            .push(receipt);
    }

    pub fn record_join(&self, user_name: &str, joined_at: u64) {
        let mut joins = self.inner.joins.lock().unwrap();
        joins.push((user_name.to_string(), joined_at));
    }

    pub fn sent_count(&self) -> usize {
        self.inner.sent.lock().unwrap().len()
    }

    pub fn sent_at(&self, token: &str) -> Option<u64> {
        self.inner.sent.lock().unwrap().get(token).copied()
    }

    pub fn receipts_for(&self, token: &str) -> Vec<Receipt> {
        self.inner
            .received
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .unwrap_or_default()
    }

    /// All sent tokens with their timestamps, oldest first.
    pub fn sent_sorted(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .inner
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(token, at)| (token.clone(), *at))
            .collect();
        entries.sort_by_key(|(_, at)| *at);
        entries
    }

    fn joins_snapshot(&self) -> Vec<(String, u64)> {
        self.inner.joins.lock().unwrap().clone()
    }

    /// Joins the send log with the receipts at teardown: per-message delivery
    /// verdicts and delays, plus room-wide extremes. Delay of a backlog
    /// receipt is zero, it happened at join, not in response to the send.
    pub fn audit(&self, total_users: usize) -> RoomAudit {
        let joins = self.joins_snapshot();
        let mut messages = Vec::new();
        let mut all_delays: Vec<u64> = Vec::new();

        for (token, sent_at) in self.sent_sorted() {
            let receipts = self.receipts_for(&token);

            let delays: Vec<u64> = receipts
                .iter()
                .map(|r| {
                    if r.backlog {
                        0
                    } else {
                        r.received_at.saturating_sub(sent_at)
                    }
                })
                .collect();
            all_delays.extend_from_slice(&delays);

            let backlog_count = receipts.iter().filter(|r| r.backlog).count();
            let verdict = classify(receipts.len(), total_users, sent_at, &joins);

            messages.push(MessageAudit {
                token,
                sent_at,
                receipt_count: receipts.len(),
                backlog_count,
                max_delay_ms: delays.iter().copied().max(),
                avg_delay_ms: average(&delays),
                verdict,
            });
        }

        RoomAudit {
            total_sent: messages.len(),
            total_users,
            max_delay_ms: all_delays.iter().copied().max(),
            avg_delay_ms: average(&all_delays),
            messages,
        }
    }
}

fn average(delays: &[u64]) -> Option<u64> {
    if delays.is_empty() {
        return None;
    }
    let sum: u64 = delays.iter().sum();
    Some(((sum as f64) / (delays.len() as f64)).round() as u64)
}

fn classify(
    receipt_count: usize,
    total_users: usize,
    sent_at: u64,
    joins: &[(String, u64)],
) -> DeliveryVerdict {
    if receipt_count == 0 {
        return DeliveryVerdict::Undelivered;
    }
    if receipt_count > total_users {
        return DeliveryVerdict::Excess;
    }
    if receipt_count == total_users {
        return DeliveryVerdict::Complete;
    }

    // A user that joined after the send may have received the message only
    // once its backlog window allowed, or not at all if the room's message
    // list was already cut. Shortfalls within that population are the known
    // case; anything deeper is unexplained.
    let joined_after = joins.iter().filter(|(_, at)| *at > sent_at).count();
    if receipt_count >= total_users.saturating_sub(joined_after) {
        DeliveryVerdict::BacklogWindow
    } else {
        DeliveryVerdict::Deficient
    }
}

/// Outcome category for one sent message at audit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryVerdict {
    /// Every user produced a receipt.
    Complete,
    /// Short of the user total, but explained by users joining after the
    /// send. Logged as a warning.
    BacklogWindow,
    /// Short of the user total with no backlog-window explanation.
    Deficient,
    /// No user produced a receipt.
    Undelivered,
    /// More receipts than users in the room; a protocol or tracking bug.
    Excess,
}

#[derive(Debug, Clone)]
pub struct MessageAudit {
    pub token: String,
    pub sent_at: u64,
    pub receipt_count: usize,
    pub backlog_count: usize,
    pub max_delay_ms: Option<u64>,
    pub avg_delay_ms: Option<u64>,
    pub verdict: DeliveryVerdict,
}

#[derive(Debug, Clone)]
pub struct RoomAudit {
    pub total_sent: usize,
    pub total_users: usize,
    pub max_delay_ms: Option<u64>,
    pub avg_delay_ms: Option<u64>,
    pub messages: Vec<MessageAudit>,
}

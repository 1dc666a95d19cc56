use crate::bootstrap::{PlacementService, SessionProvider};
use crate::client::{ChannelClient, ConnectOptions};
use crate::command::{Command, OutboundFrame};
use crate::config::LoadConfig;
use crate::error::Error;
use crate::tracking::{DeliveryVerdict, RoomAudit, RoomTracker};
use crate::user::UserActor;
use crate::utils::generate_unique_id;
use log::{error, info, warn};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Created,
    Populating,
    Active,
    Draining,
    Closed,
}

/// One simulated room: creates itself against the service, populates its
/// users in staged batches, lives out its lifespan, then coordinates
/// teardown and audits what was delivered.
pub struct RoomActor {
    config: Arc<LoadConfig>,
    session: Arc<dyn SessionProvider>,
    placement: Arc<dyn PlacementService>,
    room_name: String,
    users: Vec<Arc<UserActor>>,
    tracker: RoomTracker,
    state: RoomState,
}

impl RoomActor {
    pub fn new(
        config: Arc<LoadConfig>,
        session: Arc<dyn SessionProvider>,
        placement: Arc<dyn PlacementService>,
    ) -> Self {
        RoomActor {
            config,
            session,
            placement,
            room_name: format!("room-{}", generate_unique_id()),
            users: Vec::new(),
            tracker: RoomTracker::new(),
            state: RoomState::Created,
        }
    }

    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn tracker(&self) -> &RoomTracker {
        &self.tracker
    }

    /// The full lifecycle: Created -> Populating -> Active -> Draining ->
    /// Closed, then the delivery audit. Creation failures propagate to the
    /// spawner; a teardown that leaves stragglers is fatal for this room
    /// because the audit data can no longer be trusted.
    pub async fn run(mut self, room_number: usize) -> Result<RoomAudit, Error> {
        info!(target: "room", "[{}] === creating new room #{} / '{}'", self.room_name, room_number, self.room_name);

        if let Err(err) = self.create(room_number).await {
            error!(target: "room", "[{}] !!! failed to create room #{}: {}", self.room_name, room_number, err);
            return Err(err);
        }

        self.populate().await;

        info!(target: "room", "[{}] === room is fully populated ({} users). Will be active for next {}s",
            self.room_name, self.users.len(), self.config.room_lifespan.as_secs());

        self.state = RoomState::Active;
        sleep(self.config.room_lifespan).await;

        self.state = RoomState::Draining;
        for user in &self.users {
            user.signal_stop();
        }

        let mut checks = 0;
        let all_stopped = loop {
            if self.users.iter().all(|user| user.is_stopped()) {
                break true;
            }
            checks += 1;
            if checks >= self.config.teardown_attempts {
                break false;
            }
            sleep(self.config.teardown_interval).await;
        };

        if !all_stopped {
            let stragglers = self.users.iter().filter(|user| !user.is_stopped()).count();
            let err = Error::TeardownIncomplete {
                room: self.room_name.clone(),
                stragglers,
            };
            error!(target: "room", "[{}] !!! {}", self.room_name, err);
            return Err(err);
        }

        self.state = RoomState::Closed;

        let audit = self.audit();

        info!(target: "room", "[{}] === shutting down room #{} / '{}'", self.room_name, room_number, self.room_name);

        Ok(audit)
    }

    /// Acquires session and placement, then opens a transient channel to
    /// issue the create-or-join command and closes it after the ack. Single
    /// attempt; any failure is propagated to the caller.
    pub async fn create(&mut self, room_number: usize) -> Result<(), Error> {
        let session_token = match self.session.acquire_session().await {
            Ok(token) => token,
            Err(err) => {
                error!(target: "room", "[{}] !!! creating room failed. Failed to request bootstrap page: {}",
                    self.room_name, err);
                return Err(err);
            }
        };

        if session_token.trim().is_empty() {
            error!(target: "room", "[{}] !!! creating room failed. Got empty user session cookie", self.room_name);
            return Err(Error::SessionMissing);
        }

        let placement = match self.placement.pick_backend(&self.room_name).await {
            Ok(placement) => placement,
            Err(err) => {
                error!(target: "room", "[{}] !!! creating room failed. Failed to pick backend instance: {}",
                    self.room_name, err);
                return Err(err);
            }
        };

        let creator_name = format!("user-room-creator-{}", generate_unique_id());
        let request_id = generate_unique_id();

        let client = match ChannelClient::connect(ConnectOptions {
            endpoint: self.config.ws_url(&placement.backend_addr),
            origin: self.config.origin().to_string(),
            session_cookie: format!(
                "{}={}; ",
                self.config.session_cookie_name, session_token
            ),
            room_name: self.room_name.clone(),
            user_name: creator_name.clone(),
            tracker: self.tracker.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(StdMutex::new(Vec::new())),
            config: self.config.channel.clone(),
        })
        .await
        {
            Ok(client) => client,
            Err(err) => {
                error!(target: "room", "[{}] !!! creating room failed. Didn't connect channel after waiting: {}",
                    self.room_name, err);
                return Err(self.creation_failed(err));
            }
        };

        let frame = OutboundFrame::create_or_join(
            &self.room_name,
            &self.config.room_password,
            &creator_name,
            &request_id,
        );

        if let Err(err) = client.send(&frame).await {
            error!(target: "room", "[{}] !!! creating room '{}' failed on backend '{}': {}",
                self.room_name, self.room_name, placement.backend_addr, err);
            client.close().await;
            return Err(self.creation_failed(err));
        }

        if let Err(err) = client
            .await_ack(Command::RequestProcessed, &request_id)
            .await
        {
            error!(target: "room", "[{}] !!! creating room failed. Haven't got 'request processed' ack after waiting",
                self.room_name);
            client.close().await;
            return Err(self.creation_failed(err));
        }

        info!(target: "room", "[{}] === created room #{} '{}' on backend '{}'",
            self.room_name, room_number, self.room_name, placement.backend_addr);

        client.close().await;

        Ok(())
    }

    /// Staged population: `users_per_step` fresh actors per step, each
    /// started on its own task right away, one step every `step_delay`. A
    /// user that fails to start is logged and left behind; the room carries
    /// on.
    async fn populate(&mut self) {
        self.state = RoomState::Populating;

        let mut next_user_number = 0;

        for _ in 0..self.config.user_steps {
            for _ in 0..self.config.users_per_step {
                let user = Arc::new(UserActor::new(
                    Arc::clone(&self.config),
                    Arc::clone(&self.session),
                    Arc::clone(&self.placement),
                    self.room_name.clone(),
                    self.tracker.clone(),
                    next_user_number,
                ));
                self.users.push(Arc::clone(&user));

                let room_name = self.room_name.clone();
                tokio::spawn(async move {
                    let user_name = user.user_name().to_string();
                    if let Err(err) = user.run().await {
                        error!(target: "room", "[{}] !!! test user '{}' failed: {}", room_name, user_name, err);
                    }
                });

                next_user_number += 1;
            }

            sleep(self.config.step_delay).await;
        }
    }

    /// Joins the send log with the receipts and reports the outcome, one
    /// line per message plus room-wide delay extremes and any channel errors
    /// the users collected.
    fn audit(&self) -> RoomAudit {
        let audit = self.tracker.audit(self.users.len());

        info!(target: "room", "[{}] ## total messages sent to room: {}. Max delay: {}ms, avg delay: {}ms",
            self.room_name,
            audit.total_sent,
            audit.max_delay_ms.map(|v| v as i64).unwrap_or(-1),
            audit.avg_delay_ms.map(|v| v as i64).unwrap_or(-1));

        for message in &audit.messages {
            match message.verdict {
                DeliveryVerdict::Complete => {
                    info!(target: "room", "[{}] # message '{}' was received by {} users. Max: {}ms, avg: {}ms",
                        self.room_name,
                        message.token,
                        message.receipt_count,
                        message.max_delay_ms.map(|v| v as i64).unwrap_or(-1),
                        message.avg_delay_ms.map(|v| v as i64).unwrap_or(-1));
                }
                DeliveryVerdict::BacklogWindow => {
                    warn!(target: "room", "[{}] # message '{}' was received by {} of {} users; the remainder joined after it was sent",
                        self.room_name, message.token, message.receipt_count, audit.total_users);
                }
                DeliveryVerdict::Deficient => {
                    error!(target: "room", "[{}] !! message '{}' was received by '{}' users instead of expected '{}'",
                        self.room_name, message.token, message.receipt_count, audit.total_users);
                }
                DeliveryVerdict::Undelivered => {
                    error!(target: "room", "[{}] !! message was not received by any user: '{}'",
                        self.room_name, message.token);
                }
                DeliveryVerdict::Excess => {
                    error!(target: "room", "[{}] !! message '{}' produced {} receipts for {} users",
                        self.room_name, message.token, message.receipt_count, audit.total_users);
                }
            }
        }

        for user in &self.users {
            let errors = user.channel_errors();
            if !errors.is_empty() {
                error!(target: "room", "[{}] !! got channel errors for user '{}': {:?}",
                    self.room_name, user.user_name(), errors);
            }
        }

        audit
    }

    fn creation_failed(&self, source: Error) -> Error {
        if source.is_bootstrap() {
            return source;
        }
        Error::RoomCreationFailed {
            room: self.room_name.clone(),
            source: Box::new(source),
        }
    }
}

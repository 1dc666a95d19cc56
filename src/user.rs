use crate::bootstrap::{PlacementService, SessionProvider};
use crate::client::{ChannelClient, ConnectOptions};
use crate::command::{Command, OutboundFrame};
use crate::config::{LoadConfig, TOKEN_SPLITTER};
use crate::error::Error;
use crate::tracking::RoomTracker;
use crate::utils::{generate_unique_id, now_millis};
use log::{error, trace};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::time::sleep;

// Filler appended after the token and splitter in every generated body.
const FILLER_TEXT: &str = "test text message aasdasd asdsadada dadadadsa d \
adsa sad adsadsadsadasasdasdasdasd 1111111111111 \
asdsasdaasdasdsadasdasdsadas dsadsa !@#$_@!(@!$(! asdsad";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Created = 0,
    JoiningSession = 1,
    JoiningRoom = 2,
    Active = 3,
    Stopping = 4,
    Stopped = 5,
}

impl UserState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => UserState::Created,
            1 => UserState::JoiningSession,
            2 => UserState::JoiningRoom,
            3 => UserState::Active,
            4 => UserState::Stopping,
            _ => UserState::Stopped,
        }
    }
}

/// One simulated participant: joins the room over its own channel session,
/// sends acknowledged messages on a randomized cadence until told to stop.
pub struct UserActor {
    config: Arc<LoadConfig>,
    session: Arc<dyn SessionProvider>,
    placement: Arc<dyn PlacementService>,
    room_name: String,
    user_name: String,
    tracker: RoomTracker,
    stop: Arc<AtomicBool>,
    state: AtomicU8,
    channel_errors: Arc<StdMutex<Vec<String>>>,
}

impl UserActor {
    pub fn new(
        config: Arc<LoadConfig>,
        session: Arc<dyn SessionProvider>,
        placement: Arc<dyn PlacementService>,
        room_name: String,
        tracker: RoomTracker,
        user_number: usize,
    ) -> Self {
        UserActor {
            config,
            session,
            placement,
            room_name,
            user_name: format!("user-{}-{}", user_number, generate_unique_id()),
            tracker,
            stop: Arc::new(AtomicBool::new(false)),
            state: AtomicU8::new(UserState::Created as u8),
            channel_errors: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn state(&self) -> UserState {
        UserState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == UserState::Stopped
    }

    /// Cooperative stop: the message loop and the channel's keepalive loop
    /// observe this flag at their next boundary; an in-flight ack wait is
    /// left to finish or time out. Calling it again changes nothing.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Transport errors the channel's background tasks collected, reported
    /// by the owning room at audit time.
    pub fn channel_errors(&self) -> Vec<String> {
        self.channel_errors.lock().unwrap().clone()
    }

    /// Full lifecycle. Whatever happens inside, the actor reports Stopped on
    /// the way out, so room teardown never waits on a failed user.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let result = self.run_inner().await;
        self.set_state(UserState::Stopped);
        result
    }

    async fn run_inner(&self) -> Result<(), Error> {
        self.set_state(UserState::JoiningSession);

        let session_token = match self.session.acquire_session().await {
            Ok(token) => token,
            Err(err) => {
                error!(target: "room", "[{}] !!! failed starting test user '{}'. Failed to request bootstrap page: {}",
                    self.room_name, self.user_name, err);
                return Err(err);
            }
        };

        if session_token.trim().is_empty() {
            error!(target: "room", "[{}] !!! failed starting test user '{}'. Got empty user session cookie",
                self.room_name, self.user_name);
            return Err(Error::SessionMissing);
        }

        let placement = match self.placement.pick_backend(&self.room_name).await {
            Ok(placement) => placement,
            Err(err) => {
                error!(target: "room", "[{}] !!! failed starting test user '{}'. Failed to pick backend instance: {}",
                    self.room_name, self.user_name, err);
                return Err(err);
            }
        };

        self.set_state(UserState::JoiningRoom);

        let client = match ChannelClient::connect(ConnectOptions {
            endpoint: self.config.ws_url(&placement.backend_addr),
            origin: self.config.origin().to_string(),
            session_cookie: format!("{}={}; ", self.config.session_cookie_name, session_token),
            room_name: self.room_name.clone(),
            user_name: self.user_name.clone(),
            tracker: self.tracker.clone(),
            stop: Arc::clone(&self.stop),
            errors: Arc::clone(&self.channel_errors),
            config: self.config.channel.clone(),
        })
        .await
        {
            Ok(client) => client,
            Err(err) => {
                error!(target: "room", "[{}] !!! failed starting test user '{}'. Didn't connect channel after waiting: {}",
                    self.room_name, self.user_name, err);
                return Err(self.join_failed(err));
            }
        };

        let join_request_id = generate_unique_id();
        let join = OutboundFrame::create_or_join(
            &self.room_name,
            &self.config.room_password,
            &self.user_name,
            &join_request_id,
        );

        if let Err(err) = client.send(&join).await {
            error!(target: "room", "[{}] !!! failed to start test user '{}' (join room) on backend '{}': {}",
                self.room_name, self.user_name, placement.backend_addr, err);
            client.close().await;
            return Err(self.join_failed(err));
        }

        if let Err(err) = client
            .await_ack(Command::RequestProcessed, &join_request_id)
            .await
        {
            error!(target: "room", "[{}] !!! failed to start test user '{}' (join room). Haven't got 'request processed' ack after waiting",
                self.room_name, self.user_name);
            client.close().await;
            return Err(self.join_failed(err));
        }

        self.tracker.record_join(&self.user_name, now_millis());
        self.set_state(UserState::Active);

        trace!(target: "room", "[{}] --- started test user '{}' on backend '{}'",
            self.room_name, self.user_name, placement.backend_addr);

        // Send text messages until stopped.
        while !self.stop.load(Ordering::SeqCst) {
            let request_id = generate_unique_id();
            let token = generate_unique_id();

            // The send event is tracked before the frame goes out, so a
            // receipt can never precede its send record.
            self.tracker.record_sent(&token, now_millis());

            let frame = OutboundFrame::text_message(
                &self.room_name,
                &self.config.room_password,
                &request_id,
                format!("{}{}{}", token, TOKEN_SPLITTER, FILLER_TEXT),
            );

            if let Err(err) = client.send(&frame).await {
                error!(target: "room", "[{}] !!! failed to send text message, user '{}', backend '{}': {}",
                    self.room_name, self.user_name, placement.backend_addr, err);
                client.close().await;
                return Err(self.send_failed(err));
            }

            if let Err(err) = client
                .await_ack(Command::RequestProcessed, &request_id)
                .await
            {
                error!(target: "room", "[{}] !!! failed to send text message. Haven't got 'request processed' ack after waiting",
                    self.room_name);
                client.close().await;
                return Err(self.send_failed(err));
            }

            trace!(target: "room", "[{}] --- sent text message. User '{}', backend '{}'",
                self.room_name, self.user_name, placement.backend_addr);

            let delay_ms = {
                let min = self.config.send_delay_min.as_millis() as u64;
                let span = (self.config.send_delay_span.as_millis() as u64).max(1);
                min + rand::rng().random_range(0..span)
            };
            sleep(Duration::from_millis(delay_ms)).await;
        }

        self.set_state(UserState::Stopping);
        client.close().await;

        Ok(())
    }

    fn set_state(&self, state: UserState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn join_failed(&self, source: Error) -> Error {
        if source.is_bootstrap() {
            return source;
        }
        Error::JoinFailed {
            room: self.room_name.clone(),
            user: self.user_name.clone(),
            source: Box::new(source),
        }
    }

    fn send_failed(&self, source: Error) -> Error {
        Error::SendFailed {
            user: self.user_name.clone(),
            source: Box::new(source),
        }
    }
}

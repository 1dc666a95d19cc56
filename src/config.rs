use std::time::Duration;

/// Prefix splitter between the unique token and the filler text of every
/// generated message body. Inbound bodies are split on this to recover the
/// token.
pub const TOKEN_SPLITTER: &str = "-!unique-part-ends!-";

/// Shape and pacing of the generated load.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Root URL of the service under test, e.g. "https://chat.example.org".
    /// Session bootstrap hits this URL directly; the scheme also decides
    /// ws vs wss for the chat channel.
    pub server_root: String,
    /// Path of the duplex chat endpoint on a backend instance.
    pub ws_path: String,
    /// Path of the backend placement endpoint on the server root.
    pub pick_backend_path: String,
    /// Name of the session cookie issued by the bootstrap page.
    pub session_cookie_name: String,
    pub room_password: String,

    pub spawner_count: usize,
    pub rooms_per_spawner: usize,
    /// How many times a finished room is recreated before its task ends.
    pub room_recreate_count: usize,

    pub room_lifespan: Duration,
    /// Population happens in `user_steps` batches of `users_per_step` users,
    /// one batch every `step_delay`.
    pub user_steps: usize,
    pub users_per_step: usize,
    pub step_delay: Duration,

    /// Pause between two messages of one user: `send_delay_min` plus a
    /// uniformly random part of `send_delay_span`.
    pub send_delay_min: Duration,
    pub send_delay_span: Duration,

    /// Bounded wait for all users to report stopped at teardown.
    pub teardown_attempts: u32,
    pub teardown_interval: Duration,

    pub http_timeout: Duration,

    pub channel: ChannelConfig,
}

/// Timing bounds of one duplex channel session.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub connect_attempts: u32,
    pub connect_interval: Duration,
    pub ack_attempts: u32,
    pub ack_interval: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_check: Duration,
}

impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig {
            server_root: String::from("https://chat.example.org"),
            ws_path: String::from("/ws_entry"),
            pick_backend_path: String::from("/pick_backend"),
            session_cookie_name: String::from("session"),
            room_password: String::from("123qwe_SOME$!%"),
            spawner_count: 50,
            rooms_per_spawner: 10,
            room_recreate_count: 1,
            room_lifespan: Duration::from_secs(15 * 60),
            user_steps: 2,
            users_per_step: 2,
            step_delay: Duration::from_secs(1),
            send_delay_min: Duration::from_secs(2),
            send_delay_span: Duration::from_secs(3),
            teardown_attempts: 50,
            teardown_interval: Duration::from_secs(1),
            http_timeout: Duration::from_secs(5),
            channel: ChannelConfig::default(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            connect_attempts: 100,
            connect_interval: Duration::from_millis(100),
            ack_attempts: 50,
            ack_interval: Duration::from_millis(100),
            keepalive_interval: Duration::from_secs(5),
            keepalive_check: Duration::from_millis(50),
        }
    }
}

impl LoadConfig {
    /// The origin header value sent on channel handshakes.
    pub fn origin(&self) -> &str {
        &self.server_root
    }

    /// Chat channel URL for a picked backend instance.
    pub fn ws_url(&self, backend_addr: &str) -> String {
        let scheme = if self.server_root.starts_with("https://") {
            "wss://"
        } else {
            "ws://"
        };
        format!("{}{}{}", scheme, backend_addr, self.ws_path)
    }

    pub fn total_room_users(&self) -> usize {
        self.user_steps * self.users_per_step
    }
}

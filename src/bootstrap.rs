use crate::config::LoadConfig;
use crate::error::Error;
use async_trait::async_trait;
use log::{error, info};
use reqwest::header::SET_COOKIE;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Placement lookup result: which backend instance hosts a room. A non-empty
/// error message means failure regardless of what the address field holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlacementResponse {
    #[serde(rename = "bA", default)]
    pub backend_addr: String,
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(rename = "aN", default, skip_serializing_if = "Option::is_none")]
    pub alternative_postfixes: Option<Vec<String>>,
}

impl PlacementResponse {
    pub fn error(&self) -> Option<&str> {
        self.error_message
            .as_deref()
            .filter(|msg| !msg.trim().is_empty())
    }
}

/// Issues session tokens for new participants. The HTTP implementation pulls
/// them from the bootstrap page's cookies; tests substitute static ones.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire_session(&self) -> Result<String, Error>;
}

/// Maps a room name to the backend instance that should host it.
#[async_trait]
pub trait PlacementService: Send + Sync {
    async fn pick_backend(&self, room_name: &str) -> Result<PlacementResponse, Error>;
}

/// The real collaborators, both served over plain HTTP against the service
/// root.
pub struct HttpBootstrap {
    client: reqwest::Client,
    server_root: String,
    pick_backend_path: String,
    cookie_name: String,
}

impl HttpBootstrap {
    pub fn new(config: &LoadConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(config.http_timeout)
            .build()?;

        Ok(HttpBootstrap {
            client,
            server_root: config.server_root.clone(),
            pick_backend_path: config.pick_backend_path.clone(),
            cookie_name: config.session_cookie_name.clone(),
        })
    }
}

#[async_trait]
impl SessionProvider for HttpBootstrap {
    async fn acquire_session(&self) -> Result<String, Error> {
        let started = Instant::now();

        let response = self.client.get(&self.server_root).send().await.map_err(|e| {
            error!(target: "http", "!!! error while requesting bootstrap page: {}", e);
            Error::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(target: "http", "!!! error while requesting bootstrap page - got non 200 response code: {}", status);
            return Err(Error::HttpStatus {
                endpoint: self.server_root.clone(),
                status: status.as_u16(),
            });
        }

        let prefix = format!("{}=", self.cookie_name);
        let token = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|cookie| {
                cookie
                    .strip_prefix(&prefix)
                    .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
            });

        // Drain the body so the connection can be reused.
        let _ = response.bytes().await;

        info!(target: "http", "response from bootstrap page: {}ms", started.elapsed().as_millis());

        token.ok_or(Error::SessionMissing)
    }
}

#[async_trait]
impl PlacementService for HttpBootstrap {
    async fn pick_backend(&self, room_name: &str) -> Result<PlacementResponse, Error> {
        let started = Instant::now();
        let endpoint = format!(
            "{}{}?roomName={}",
            self.server_root, self.pick_backend_path, room_name
        );

        let response = self
            .client
            .get(&endpoint)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                error!(target: "http", "!!! error while requesting 'pick backend instance'. RoomName: '{}': {}", room_name, e);
                Error::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(target: "http", "!!! error while requesting 'pick backend instance' - got non 200 response code: {}. RoomName: '{}'", status, room_name);
            return Err(Error::HttpStatus {
                endpoint,
                status: status.as_u16(),
            });
        }

        let placement: PlacementResponse = response.json().await.map_err(|e| {
            error!(target: "http", "!!! error while parsing 'pick backend instance' response. RoomName: '{}': {}", room_name, e);
            Error::from(e)
        })?;

        let elapsed = started.elapsed().as_millis();

        if let Some(message) = placement.error() {
            error!(target: "http", "!!! got error inside 'pick backend instance' response: '{}', RoomName: '{}'. Request took {}ms", message, room_name, elapsed);
            return Err(Error::PlacementFailed {
                room: room_name.to_string(),
                reason: message.to_string(),
            });
        }

        info!(target: "http", "response from 'pick backend instance': {}ms, roomName: {}", elapsed, room_name);

        Ok(placement)
    }
}

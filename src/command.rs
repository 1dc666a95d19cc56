use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Every command kind the service speaks, under its wire code. Codes outside
/// this set deserialize to `Unknown`; such frames are stored but never acted
/// on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RoomCreateJoin,
    RoomCreate,
    RoomJoin,
    RoomChangeUserName,
    RoomChangeUserDescription,
    RoomMembersChanged,
    TextMessage,
    TextMessageEdit,
    TextMessageDelete,
    TextMessageSupportOrReject,
    AllTextMessages,
    Error,
    RequestProcessed,
    MessagesLimitApproaching,
    MessagesLimitReached,
    Unknown,
}

impl Command {
    pub fn code(&self) -> &'static str {
        match self {
            Command::RoomCreateJoin => "R_C_J",
            Command::RoomCreate => "R_C",
            Command::RoomJoin => "R_J",
            Command::RoomChangeUserName => "R_CH_UN",
            Command::RoomChangeUserDescription => "R_CH_D",
            Command::RoomMembersChanged => "R_M_CH",
            Command::TextMessage => "TM",
            Command::TextMessageEdit => "TM_E",
            Command::TextMessageDelete => "TM_D",
            Command::TextMessageSupportOrReject => "TM_S_R",
            Command::AllTextMessages => "ALL_TM",
            Command::Error => "ER",
            Command::RequestProcessed => "RP",
            Command::MessagesLimitApproaching => "N_M_LIMIT_A",
            Command::MessagesLimitReached => "N_M_LIMIT_R",
            Command::Unknown => "?",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "R_C_J" => Command::RoomCreateJoin,
            "R_C" => Command::RoomCreate,
            "R_J" => Command::RoomJoin,
            "R_CH_UN" => Command::RoomChangeUserName,
            "R_CH_D" => Command::RoomChangeUserDescription,
            "R_M_CH" => Command::RoomMembersChanged,
            "TM" => Command::TextMessage,
            "TM_E" => Command::TextMessageEdit,
            "TM_D" => Command::TextMessageDelete,
            "TM_S_R" => Command::TextMessageSupportOrReject,
            "ALL_TM" => Command::AllTextMessages,
            "ER" => Command::Error,
            "RP" => Command::RequestProcessed,
            "N_M_LIMIT_A" => Command::MessagesLimitApproaching,
            "N_M_LIMIT_R" => Command::MessagesLimitReached,
            _ => Command::Unknown,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Command::from_code(&code))
    }
}

/// Room addressing as the service expects it on join/create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDescriptor {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "p")]
    pub password: String,
}

/// Body of an outbound text message. Only the text travels; the service
/// fills in ids and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(rename = "t")]
    pub text: String,
}

/// A frame this client sends. Fields are conditionally present depending on
/// the operation; keepalive frames set only the marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OutboundFrame {
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    #[serde(rename = "rq", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomDescriptor>,
    #[serde(rename = "uN", default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageBody>,
    #[serde(rename = "srM", default, skip_serializing_if = "Option::is_none")]
    pub support: Option<bool>,
    #[serde(rename = "kA", default, skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<String>,
}

impl OutboundFrame {
    pub fn create_or_join(
        room_name: &str,
        password: &str,
        user_name: &str,
        request_id: &str,
    ) -> Self {
        OutboundFrame {
            command: Some(Command::RoomCreateJoin),
            request_id: Some(request_id.to_string()),
            room: Some(RoomDescriptor {
                name: room_name.to_string(),
                password: password.to_string(),
            }),
            user_name: Some(user_name.to_string()),
            ..Default::default()
        }
    }

    pub fn text_message(room_name: &str, password: &str, request_id: &str, text: String) -> Self {
        OutboundFrame {
            command: Some(Command::TextMessage),
            request_id: Some(request_id.to_string()),
            room: Some(RoomDescriptor {
                name: room_name.to_string(),
                password: password.to_string(),
            }),
            message: Some(MessageBody { text }),
            ..Default::default()
        }
    }

    pub fn keepalive() -> Self {
        OutboundFrame {
            keepalive: Some(String::from("OK")),
            ..Default::default()
        }
    }
}

/// One message record as delivered by the service, either as a live echo or
/// inside a join-time backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MessageRecord {
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "sC", default, skip_serializing_if = "Option::is_none")]
    pub supported_count: Option<i32>,
    #[serde(rename = "rC", default, skip_serializing_if = "Option::is_none")]
    pub rejected_count: Option<i32>,
    #[serde(rename = "lE", default, skip_serializing_if = "Option::is_none")]
    pub last_edited_at: Option<i64>,
    #[serde(rename = "lV", default, skip_serializing_if = "Option::is_none")]
    pub last_voted_at: Option<i64>,
    #[serde(rename = "rU", default, skip_serializing_if = "Option::is_none")]
    pub reply_to_user_id: Option<String>,
    #[serde(rename = "rM", default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    #[serde(rename = "uId", default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(rename = "cAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at_nano: Option<i64>,
}

impl MessageRecord {
    pub fn from_text(text: String) -> Self {
        MessageRecord {
            text: Some(text),
            ..Default::default()
        }
    }
}

/// One room member as delivered in membership updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserRecord {
    #[serde(rename = "uId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(rename = "an", default, skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<bool>,
    #[serde(rename = "o", default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
}

/// A frame the service sends. Everything but the command kind is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "c")]
    pub command: Command,
    #[serde(rename = "rq", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "pd", default, skip_serializing_if = "Option::is_none")]
    pub processing_details: Option<String>,
    #[serde(rename = "rId", default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(rename = "uId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "rCuId", default, skip_serializing_if = "Option::is_none")]
    pub room_creator_id: Option<String>,
    #[serde(rename = "cAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at_nano: Option<i64>,
    #[serde(rename = "bN", default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<String>,
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageRecord>>,
    #[serde(rename = "rU", default, skip_serializing_if = "Option::is_none")]
    pub room_users: Option<Vec<UserRecord>>,
}

impl InboundFrame {
    pub fn ack(request_id: &str) -> Self {
        InboundFrame {
            command: Command::RequestProcessed,
            request_id: Some(request_id.to_string()),
            ..Default::default()
        }
    }
}

impl Default for InboundFrame {
    fn default() -> Self {
        InboundFrame {
            command: Command::Unknown,
            request_id: None,
            processing_details: None,
            room_id: None,
            user_id: None,
            room_creator_id: None,
            created_at_nano: None,
            build_number: None,
            messages: None,
            room_users: None,
        }
    }
}

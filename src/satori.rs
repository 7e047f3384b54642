// ============================================================================
// Satori 协议数据模型
// 下游应用看到的统一资源结构，全部为扁平 serde 结构体
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod signal;

/// 本网关对外暴露的两个逻辑平台
pub mod platforms {
    /// 群聊与单聊 (v2 接口)
    pub const QQ: &str = "qq";
    /// 频道 (v1 接口)
    pub const QQGUILD: &str = "qqguild";
}

pub const ADAPTER_NAME: &str = "qq";

// ----------------------------------------------------------------------------
// 用户 / 群组 / 频道
// ----------------------------------------------------------------------------

/// 用户对象
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_bot: Option<bool>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// 群组对象
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Guild {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Guild {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// 频道类型，线上格式为整数
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum ChannelType {
    #[default]
    Text,
    Direct,
    Category,
    Voice,
}

impl From<ChannelType> for u8 {
    fn from(t: ChannelType) -> Self {
        match t {
            ChannelType::Text => 0,
            ChannelType::Direct => 1,
            ChannelType::Category => 2,
            ChannelType::Voice => 3,
        }
    }
}

impl TryFrom<u8> for ChannelType {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Text),
            1 => Ok(Self::Direct),
            2 => Ok(Self::Category),
            3 => Ok(Self::Voice),
            other => Err(format!("未知频道类型: {}", other)),
        }
    }
}

/// 频道对象
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type", default)]
    pub channel_type: ChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Channel {
    pub fn new(id: impl Into<String>, channel_type: ChannelType) -> Self {
        Self {
            id: id.into(),
            channel_type,
            ..Default::default()
        }
    }
}

/// 群组成员
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GuildMember {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// 加入时间（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<i64>,
}

/// 群组角色
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GuildRole {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ----------------------------------------------------------------------------
// 消息
// ----------------------------------------------------------------------------

/// 消息对象，content 为消息元素的文本形式
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild: Option<Guild>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<GuildMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Message {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            ..Default::default()
        }
    }
}

// ----------------------------------------------------------------------------
// 登录信息
// ----------------------------------------------------------------------------

/// 登录状态，线上格式为整数
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum LoginStatus {
    #[default]
    Offline,
    Online,
    Connect,
    Disconnect,
    Reconnect,
}

impl From<LoginStatus> for u8 {
    fn from(s: LoginStatus) -> Self {
        match s {
            LoginStatus::Offline => 0,
            LoginStatus::Online => 1,
            LoginStatus::Connect => 2,
            LoginStatus::Disconnect => 3,
            LoginStatus::Reconnect => 4,
        }
    }
}

impl TryFrom<u8> for LoginStatus {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Offline),
            1 => Ok(Self::Online),
            2 => Ok(Self::Connect),
            3 => Ok(Self::Disconnect),
            4 => Ok(Self::Reconnect),
            other => Err(format!("未知登录状态: {}", other)),
        }
    }
}

/// 登录信息
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Login {
    pub sn: i64,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default)]
    pub status: LoginStatus,
    pub adapter: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub self_id: String,
}

// ----------------------------------------------------------------------------
// 交互与分页
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Argv {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Button {
    pub id: String,
}

/// 分页列表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PagedList<T> {
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl<T> PagedList<T> {
    pub fn new(data: Vec<T>, next: Option<String>) -> Self {
        Self { data, next }
    }
}

/// 双向分页列表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidiPagedList<T> {
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

// ----------------------------------------------------------------------------
// 事件
// ----------------------------------------------------------------------------

/// 事件类型常量
pub mod event_types {
    pub const MESSAGE_CREATED: &str = "message-created";
    pub const MESSAGE_UPDATED: &str = "message-updated";
    pub const MESSAGE_DELETED: &str = "message-deleted";

    pub const GUILD_ADDED: &str = "guild-added";
    pub const GUILD_UPDATED: &str = "guild-updated";
    pub const GUILD_REMOVED: &str = "guild-removed";

    pub const CHANNEL_ADDED: &str = "channel-added";
    pub const CHANNEL_UPDATED: &str = "channel-updated";
    pub const CHANNEL_REMOVED: &str = "channel-removed";

    pub const GUILD_MEMBER_ADDED: &str = "guild-member-added";
    pub const GUILD_MEMBER_UPDATED: &str = "guild-member-updated";
    pub const GUILD_MEMBER_REMOVED: &str = "guild-member-removed";

    pub const LOGIN_UPDATED: &str = "login-updated";

    pub const FRIEND_ADDED: &str = "friend-added";
    pub const FRIEND_REMOVED: &str = "friend-removed";

    pub const REACTION_ADDED: &str = "reaction-added";
    pub const REACTION_REMOVED: &str = "reaction-removed";

    pub const INTERACTION_BUTTON: &str = "interaction/button";

    pub const INTERNAL: &str = "internal";
}

/// 统一事件结构
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Event {
    pub sn: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    /// 毫秒时间戳，为 0 时由事件中心补齐
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<Login>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild: Option<Guild>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<GuildMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<GuildRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argv: Option<Argv>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<Button>,
    /// 平台原生事件类型
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub native_type: Option<String>,
    /// 平台原生事件数据
    #[serde(rename = "_data", default, skip_serializing_if = "Option::is_none")]
    pub native_data: Option<Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    /// 以消息为中心构建事件，同时展开 channel/guild/member/user
    pub fn from_message(event_type: &str, message: Message) -> Self {
        Self {
            event_type: event_type.to_string(),
            channel: message.channel.clone(),
            guild: message.guild.clone(),
            member: message.member.clone(),
            user: message.user.clone(),
            message: Some(message),
            ..Default::default()
        }
    }

    /// 无法识别的平台事件
    pub fn internal(native_type: impl Into<String>, native_data: Value) -> Self {
        Self {
            event_type: event_types::INTERNAL.to_string(),
            native_type: Some(native_type.into()),
            native_data: Some(native_data),
            ..Default::default()
        }
    }

    pub fn platform(&self) -> Option<&str> {
        self.login.as_ref().map(|l| l.platform.as_str())
    }
}

/// 当前毫秒时间戳
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enums_serialize_as_integers() {
        let channel = Channel::new("c1", ChannelType::Direct);
        assert_eq!(
            serde_json::to_value(&channel).unwrap(),
            json!({"id": "c1", "type": 1})
        );

        let login = Login {
            sn: 1,
            platform: "qq".into(),
            status: LoginStatus::Online,
            adapter: "qq".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&login).unwrap();
        assert_eq!(value["status"], json!(1));
        assert!(value.get("user").is_none());
    }

    #[test]
    fn absent_event_fields_are_omitted() {
        let event = Event::internal("SOME_EVENT", json!({"a": 1}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "internal");
        assert_eq!(value["_type"], "SOME_EVENT");
        assert_eq!(value["_data"], json!({"a": 1}));
        assert!(value.get("channel").is_none());
        assert!(value.get("message").is_none());
    }

    #[test]
    fn unknown_channel_type_is_rejected() {
        assert!(serde_json::from_value::<Channel>(json!({"id": "x", "type": 9})).is_err());
    }
}

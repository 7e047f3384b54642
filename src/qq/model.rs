//! 开放平台的请求与响应结构
//!
//! 字段命名与开放平台文档一致；平台时常增加字段，未列出的一律忽略。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 兼容字符串与数字两种写法的 ID
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn i64_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().unwrap_or_default(),
        Value::String(s) => s.parse().unwrap_or_default(),
        _ => 0,
    })
}

// ----------------------------------------------------------------------------
// 用户 / 频道 / 成员
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QqUser {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: Option<bool>,
    #[serde(default)]
    pub union_openid: Option<String>,
}

/// 群聊 / 单聊消息的发送者
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QqAuthor {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: Option<bool>,
    #[serde(default)]
    pub member_openid: Option<String>,
    #[serde(default)]
    pub user_openid: Option<String>,
}

impl QqAuthor {
    /// 群聊用 member_openid，单聊用 user_openid，频道用 id
    pub fn openid(&self) -> &str {
        self.member_openid
            .as_deref()
            .or(self.user_openid.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QqGuild {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub member_count: Option<i64>,
    #[serde(default)]
    pub op_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QqChannel {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// 0 文字 2 语音 4 分组 10005 直播 10006 应用 10007 论坛
    #[serde(rename = "type", default)]
    pub channel_type: i64,
    #[serde(default)]
    pub sub_type: Option<i64>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub op_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QqMember {
    #[serde(default)]
    pub user: Option<QqUser>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// ISO8601
    #[serde(default)]
    pub joined_at: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub op_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QqRole {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<i64>,
    #[serde(default)]
    pub hoist: Option<i64>,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub member_limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QqRoles {
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<QqRole>,
}

/// 创建身份组的响应
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreatedRole {
    #[serde(default, deserialize_with = "string_or_number")]
    pub role_id: String,
    #[serde(default)]
    pub role: Option<QqRole>,
}

/// 修改身份组的响应
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdatedRole {
    #[serde(default)]
    pub role: Option<QqRole>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct RoleBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hoist: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ChannelBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// 禁言时长；秒数以字符串形式传递
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct MuteBody {
    pub mute_seconds: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Dms {
    #[serde(default, deserialize_with = "string_or_number")]
    pub guild_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub channel_id: String,
    #[serde(default)]
    pub create_time: Option<String>,
}

// ----------------------------------------------------------------------------
// 消息
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Attachment {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MessageReference {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_get_message_error: Option<bool>,
}

/// 频道、私信、群聊、单聊消息共用的结构
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct QqMessage {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub src_guild_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub group_openid: Option<String>,
    #[serde(default)]
    pub content: String,
    /// ISO8601
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub edited_timestamp: Option<String>,
    #[serde(default)]
    pub author: Option<QqAuthor>,
    #[serde(default)]
    pub member: Option<QqMember>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub mentions: Vec<QqUser>,
    #[serde(default)]
    pub mention_everyone: Option<bool>,
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
    #[serde(default)]
    pub seq: Option<i64>,
}

/// 消息撤回事件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MessageDelete {
    pub message: QqMessage,
    #[serde(default)]
    pub op_user: Option<QqUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Emoji {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    /// 1 系统表情 2 emoji
    #[serde(rename = "type", default = "default_emoji_type")]
    pub emoji_type: i64,
}

fn default_emoji_type() -> i64 {
    1
}

impl Emoji {
    /// 解析 `type:id` 或 `id`
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        match s.split_once(':') {
            Some((t, id)) if !id.is_empty() => Some(Self {
                id: id.to_string(),
                emoji_type: t.parse().ok()?,
            }),
            Some(_) => None,
            None => Some(Self {
                id: s.to_string(),
                emoji_type: default_emoji_type(),
            }),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.emoji_type, self.id)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReactionTarget {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub target_type: Value,
}

/// 表情表态事件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MessageReaction {
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub guild_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub channel_id: String,
    #[serde(default)]
    pub target: ReactionTarget,
    #[serde(default)]
    pub emoji: Emoji,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReactionUsers {
    #[serde(default)]
    pub users: Vec<QqUser>,
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub is_end: bool,
}

/// 机器人被拉入 / 移出群
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GroupRobotEvent {
    #[serde(default)]
    pub group_openid: String,
    #[serde(default)]
    pub op_member_openid: Option<String>,
    #[serde(default, deserialize_with = "i64_or_string")]
    pub timestamp: i64,
}

/// 用户添加 / 删除机器人
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FriendEvent {
    #[serde(default)]
    pub openid: String,
    #[serde(default, deserialize_with = "i64_or_string")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InteractionResolved {
    #[serde(default)]
    pub button_id: Option<String>,
    #[serde(default)]
    pub button_data: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InteractionData {
    #[serde(default)]
    pub resolved: InteractionResolved,
}

/// 按钮回调
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Interaction {
    #[serde(default)]
    pub id: String,
    /// 0 频道 1 群聊 2 单聊
    #[serde(default)]
    pub chat_type: i64,
    #[serde(default)]
    pub data: InteractionData,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub group_openid: Option<String>,
    #[serde(default)]
    pub group_member_openid: Option<String>,
    #[serde(default)]
    pub user_openid: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

// ----------------------------------------------------------------------------
// 发送
// ----------------------------------------------------------------------------

/// 频道 / 私信消息请求体
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct GuildSend {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
}

impl GuildSend {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.image.is_none()
    }
}

/// v2 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MsgType {
    #[default]
    Text,
    Markdown,
    Ark,
    Embed,
    Media,
}

impl MsgType {
    pub fn code(&self) -> u8 {
        match self {
            Self::Text => 0,
            Self::Markdown => 2,
            Self::Ark => 3,
            Self::Embed => 4,
            Self::Media => 7,
        }
    }
}

impl Serialize for MsgType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MediaInfo {
    pub file_info: String,
}

/// 按钮模板
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct Keyboard {
    pub id: String,
}

/// 群聊 / 单聊消息请求体
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct V2Send {
    pub content: String,
    pub msg_type: MsgType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
}

impl V2Send {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.media.is_none() && self.keyboard.is_none()
    }
}

/// 发送成功后的响应
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SentMessage {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// 富媒体上传请求体；file_type 1 图片 2 视频 3 语音 4 文件
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct MediaUpload {
    pub file_type: u8,
    pub url: String,
    pub srv_send_msg: bool,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct UploadedMedia {
    #[serde(default)]
    pub file_uuid: Option<String>,
    #[serde(default)]
    pub file_info: String,
    #[serde(default)]
    pub ttl: i64,
}

// ----------------------------------------------------------------------------
// 网关
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Gateway {
    pub url: String,
    #[serde(default)]
    pub shards: Option<u32>,
}

/// 网关帧 `{op, d, s, t, id}`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Payload {
    pub op: i64,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Ready {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub user: QqUser,
    #[serde(default)]
    pub shard: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_message_decodes() {
        let message: QqMessage = serde_json::from_value(json!({
            "id": "ROBOT1.0_abc",
            "content": " hi",
            "timestamp": "2023-11-06T13:37:18+08:00",
            "group_id": "G",
            "group_openid": "G1",
            "author": {"id": "A", "member_openid": "M1"},
            "attachments": [{"content_type": "image/png", "url": "//x/y.png", "height": 10}]
        }))
        .unwrap();
        assert_eq!(message.group_openid.as_deref(), Some("G1"));
        assert_eq!(message.author.unwrap().openid(), "M1");
        assert_eq!(message.attachments[0].height, Some(10));
    }

    #[test]
    fn emoji_parsing() {
        assert_eq!(
            Emoji::parse("2:128076"),
            Some(Emoji {
                id: "128076".into(),
                emoji_type: 2
            })
        );
        assert_eq!(Emoji::parse("4").unwrap().emoji_type, 1);
        assert_eq!(Emoji::parse("x:1"), None);
        assert_eq!(Emoji::parse(""), None);
    }

    #[test]
    fn v2_body_serializes_numeric_type() {
        let body = V2Send {
            content: "hi".into(),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"content": "hi", "msg_type": 0})
        );
    }
}

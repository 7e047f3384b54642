//! 平台事件 -> Satori 事件

use super::normalize::{self, Mode};
use crate::identity::{IdentityMaps, OpenIdKind};
use crate::qq::model::{
    FriendEvent, GroupRobotEvent, Interaction, MessageDelete, MessageReaction, QqAuthor, QqChannel,
    QqGuild, QqMember, QqMessage, QqUser,
};
use crate::satori::{
    Button, Channel, ChannelType, Event, Guild, GuildMember, Message, User, event_types, platforms,
};
use crate::warn;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 转换结果，附带事件所属的逻辑平台
#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    pub platform: &'static str,
    pub event: Event,
}

impl Translated {
    fn guild(event: Event) -> Self {
        Self {
            platform: platforms::QQGUILD,
            event,
        }
    }

    fn qq(event: Event) -> Self {
        Self {
            platform: platforms::QQ,
            event,
        }
    }
}

pub struct Translator<'a> {
    identities: &'a IdentityMaps,
    self_user: Option<User>,
}

impl<'a> Translator<'a> {
    pub fn new(identities: &'a IdentityMaps, self_user: Option<User>) -> Self {
        Self {
            identities,
            self_user,
        }
    }

    /// 会话控制类事件返回 None；无法识别或解析失败的转为 internal
    pub fn translate(&self, kind: &str, data: &Value) -> Option<Translated> {
        if matches!(kind, "READY" | "RESUMED") {
            return None;
        }
        let translated = match kind {
            "GUILD_CREATE" => decode(kind, data).map(|g| guild_event(event_types::GUILD_ADDED, g)),
            "GUILD_UPDATE" => decode(kind, data).map(|g| guild_event(event_types::GUILD_UPDATED, g)),
            "GUILD_DELETE" => decode(kind, data).map(|g| guild_event(event_types::GUILD_REMOVED, g)),

            "CHANNEL_CREATE" => {
                decode(kind, data).map(|c| channel_event(event_types::CHANNEL_ADDED, c))
            }
            "CHANNEL_UPDATE" => {
                decode(kind, data).map(|c| channel_event(event_types::CHANNEL_UPDATED, c))
            }
            "CHANNEL_DELETE" => {
                decode(kind, data).map(|c| channel_event(event_types::CHANNEL_REMOVED, c))
            }

            "GUILD_MEMBER_ADD" => {
                decode(kind, data).map(|m| member_event(event_types::GUILD_MEMBER_ADDED, m))
            }
            "GUILD_MEMBER_UPDATE" => {
                decode(kind, data).map(|m| member_event(event_types::GUILD_MEMBER_UPDATED, m))
            }
            "GUILD_MEMBER_REMOVE" => {
                decode(kind, data).map(|m| member_event(event_types::GUILD_MEMBER_REMOVED, m))
            }

            "MESSAGE_CREATE" | "AT_MESSAGE_CREATE" => {
                decode(kind, data).map(|m| self.guild_message(m))
            }
            "DIRECT_MESSAGE_CREATE" => decode(kind, data).map(|m| self.direct_message(m)),
            "GROUP_AT_MESSAGE_CREATE" => {
                decode(kind, data).map(|m| self.group_message(m, Mode::GroupAt))
            }
            "GROUP_MESSAGE_CREATE" => {
                decode(kind, data).map(|m| self.group_message(m, Mode::Group))
            }
            "C2C_MESSAGE_CREATE" => decode(kind, data).map(|m| self.c2c_message(m)),

            "MESSAGE_DELETE" | "PUBLIC_MESSAGE_DELETE" | "DIRECT_MESSAGE_DELETE" => {
                decode(kind, data).map(|d| message_deleted(kind, d))
            }

            "MESSAGE_REACTION_ADD" => {
                decode(kind, data).map(|r| reaction_event(event_types::REACTION_ADDED, r))
            }
            "MESSAGE_REACTION_REMOVE" => {
                decode(kind, data).map(|r| reaction_event(event_types::REACTION_REMOVED, r))
            }

            "GROUP_ADD_ROBOT" => {
                decode(kind, data).map(|g| self.group_robot(event_types::GUILD_ADDED, g))
            }
            "GROUP_DEL_ROBOT" => {
                decode(kind, data).map(|g| self.group_robot(event_types::GUILD_REMOVED, g))
            }
            "FRIEND_ADD" => decode(kind, data).map(|f| self.friend(event_types::FRIEND_ADDED, f)),
            "FRIEND_DEL" => {
                decode(kind, data).map(|f| self.friend(event_types::FRIEND_REMOVED, f))
            }

            "INTERACTION_CREATE" => decode(kind, data).map(|i| self.interaction(i)),

            _ => None,
        };
        Some(translated.unwrap_or_else(|| internal(kind, data)))
    }

    fn guild_message(&self, message: QqMessage) -> Translated {
        let content = normalize::content(&message, Mode::Guild, self.self_user.as_ref());
        let guild_id = message.guild_id.clone().unwrap_or_default();
        let channel_id = message.channel_id.clone().unwrap_or_default();
        let mut out = base_message(&message, content, author_user(message.author.as_ref(), false));
        out.channel = Some(Channel::new(channel_id, ChannelType::Text));
        out.guild = Some(Guild::new(guild_id));
        out.member = message.member.as_ref().map(member_of);
        Translated::guild(Event::from_message(event_types::MESSAGE_CREATED, out))
    }

    fn direct_message(&self, message: QqMessage) -> Translated {
        let content = normalize::content(&message, Mode::Guild, self.self_user.as_ref());
        let guild_id = message.guild_id.clone().unwrap_or_default();
        let channel_id = message.channel_id.clone().unwrap_or_default();
        self.identities.record_direct(&channel_id, &guild_id);

        let mut out = base_message(&message, content, author_user(message.author.as_ref(), false));
        out.channel = Some(Channel::new(channel_id, ChannelType::Direct));
        Translated::guild(Event::from_message(event_types::MESSAGE_CREATED, out))
    }

    fn group_message(&self, message: QqMessage, mode: Mode) -> Translated {
        let content = normalize::content(&message, mode, self.self_user.as_ref());
        let group = message.group_openid.clone().unwrap_or_default();
        self.identities.record_openid(&group, OpenIdKind::Group);

        let mut out = base_message(&message, content, author_user(message.author.as_ref(), true));
        out.channel = Some(Channel::new(group.clone(), ChannelType::Text));
        out.guild = Some(Guild::new(group));
        Translated::qq(Event::from_message(event_types::MESSAGE_CREATED, out))
    }

    fn c2c_message(&self, message: QqMessage) -> Translated {
        let content = normalize::content(&message, Mode::C2c, self.self_user.as_ref());
        let user = author_user(message.author.as_ref(), true);
        let openid = user.as_ref().map(|u| u.id.clone()).unwrap_or_default();
        self.identities.record_openid(&openid, OpenIdKind::Private);

        let mut out = base_message(&message, content, user);
        out.channel = Some(Channel::new(openid, ChannelType::Direct));
        Translated::qq(Event::from_message(event_types::MESSAGE_CREATED, out))
    }

    fn group_robot(&self, event_type: &str, data: GroupRobotEvent) -> Translated {
        self.identities
            .record_openid(&data.group_openid, OpenIdKind::Group);
        Translated::qq(Event {
            timestamp: data.timestamp * 1000,
            guild: Some(Guild::new(data.group_openid)),
            operator: data.op_member_openid.map(User::new),
            ..Event::new(event_type)
        })
    }

    fn friend(&self, event_type: &str, data: FriendEvent) -> Translated {
        self.identities
            .record_openid(&data.openid, OpenIdKind::Private);
        Translated::qq(Event {
            timestamp: data.timestamp * 1000,
            user: Some(User::new(data.openid)),
            ..Event::new(event_type)
        })
    }

    fn interaction(&self, data: Interaction) -> Translated {
        let resolved = data.data.resolved;
        let button_id = resolved
            .button_id
            .or(resolved.button_data)
            .unwrap_or_default();
        let mut event = Event {
            timestamp: data.timestamp.as_deref().and_then(iso_millis).unwrap_or(0),
            button: Some(Button { id: button_id }),
            message: resolved.message_id.map(|id| Message::new(id, "")),
            ..Event::new(event_types::INTERACTION_BUTTON)
        };

        match data.chat_type {
            1 => {
                let group = data.group_openid.unwrap_or_default();
                self.identities.record_openid(&group, OpenIdKind::Group);
                event.channel = Some(Channel::new(group.clone(), ChannelType::Text));
                event.guild = Some(Guild::new(group));
                event.user = data.group_member_openid.map(User::new);
                Translated::qq(event)
            }
            2 => {
                let openid = data.user_openid.unwrap_or_default();
                self.identities.record_openid(&openid, OpenIdKind::Private);
                event.channel = Some(Channel::new(openid.clone(), ChannelType::Direct));
                event.user = Some(User::new(openid));
                Translated::qq(event)
            }
            _ => {
                event.channel = data
                    .channel_id
                    .map(|id| Channel::new(id, ChannelType::Text));
                event.guild = data.guild_id.map(Guild::new);
                event.user = resolved.user_id.map(User::new);
                Translated::guild(event)
            }
        }
    }
}

fn decode<T: DeserializeOwned>(kind: &str, data: &Value) -> Option<T> {
    match T::deserialize(data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(target: "Adapter", "解析事件 {} 失败，按 internal 处理: {}", kind, e);
            None
        }
    }
}

fn internal(kind: &str, data: &Value) -> Translated {
    let event = Event::internal(kind, data.clone());
    if ["GROUP_", "C2C_", "FRIEND_"]
        .iter()
        .any(|prefix| kind.starts_with(prefix))
    {
        Translated::qq(event)
    } else {
        Translated::guild(event)
    }
}

/// ISO8601 -> 毫秒
pub fn iso_millis(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.timestamp_millis())
}

/// 平台频道类型 -> Satori 频道类型
pub fn channel_type(vendor: i64) -> ChannelType {
    match vendor {
        2 => ChannelType::Voice,
        4 => ChannelType::Category,
        _ => ChannelType::Text,
    }
}

pub fn user_of(user: &QqUser) -> User {
    User {
        id: user.id.clone(),
        name: user.username.clone(),
        avatar: user.avatar.clone(),
        is_bot: user.bot,
        ..Default::default()
    }
}

pub fn guild_of(guild: &QqGuild) -> Guild {
    Guild {
        id: guild.id.clone(),
        name: guild.name.clone(),
        avatar: guild.icon.clone(),
    }
}

pub fn channel_of(channel: &QqChannel) -> Channel {
    Channel {
        id: channel.id.clone(),
        channel_type: channel_type(channel.channel_type),
        name: channel.name.clone(),
        parent_id: channel.parent_id.clone().filter(|p| !p.is_empty() && p != "0"),
    }
}

pub fn member_of(member: &QqMember) -> GuildMember {
    GuildMember {
        user: member.user.as_ref().map(user_of),
        nick: member.nick.clone().filter(|n| !n.is_empty()),
        avatar: member.user.as_ref().and_then(|u| u.avatar.clone()),
        joined_at: member.joined_at.as_deref().and_then(iso_millis),
    }
}

/// 群聊 / 单聊以 openid 作为用户 ID
fn author_user(author: Option<&QqAuthor>, use_openid: bool) -> Option<User> {
    let author = author?;
    let id = if use_openid {
        author.openid().to_string()
    } else {
        author.id.clone()
    };
    Some(User {
        id,
        name: author.username.clone(),
        avatar: author.avatar.clone(),
        is_bot: author.bot,
        ..Default::default()
    })
}

fn base_message(message: &QqMessage, content: String, user: Option<User>) -> Message {
    Message {
        user,
        created_at: message.timestamp.as_deref().and_then(iso_millis),
        updated_at: message.edited_timestamp.as_deref().and_then(iso_millis),
        ..Message::new(message.id.clone(), content)
    }
}

fn operator(op_user_id: &Option<String>) -> Option<User> {
    op_user_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(User::new)
}

fn guild_event(event_type: &str, guild: QqGuild) -> Translated {
    Translated::guild(Event {
        guild: Some(guild_of(&guild)),
        operator: operator(&guild.op_user_id),
        ..Event::new(event_type)
    })
}

fn channel_event(event_type: &str, channel: QqChannel) -> Translated {
    Translated::guild(Event {
        channel: Some(channel_of(&channel)),
        guild: channel.guild_id.clone().map(Guild::new),
        operator: operator(&channel.op_user_id),
        ..Event::new(event_type)
    })
}

fn member_event(event_type: &str, member: QqMember) -> Translated {
    Translated::guild(Event {
        guild: member.guild_id.clone().map(Guild::new),
        user: member.user.as_ref().map(user_of),
        operator: operator(&member.op_user_id),
        member: Some(member_of(&member)),
        ..Event::new(event_type)
    })
}

fn message_deleted(kind: &str, data: MessageDelete) -> Translated {
    let message = data.message;
    let direct = kind == "DIRECT_MESSAGE_DELETE";
    let mut out = Message {
        user: author_user(message.author.as_ref(), false),
        ..Message::new(message.id.clone(), "")
    };
    out.channel = message.channel_id.clone().map(|id| {
        let channel_type = if direct {
            ChannelType::Direct
        } else {
            ChannelType::Text
        };
        Channel::new(id, channel_type)
    });
    if !direct {
        out.guild = message.guild_id.clone().map(Guild::new);
    }

    let mut event = Event::from_message(event_types::MESSAGE_DELETED, out);
    event.operator = data.op_user.as_ref().map(user_of);
    Translated::guild(event)
}

fn reaction_event(event_type: &str, reaction: MessageReaction) -> Translated {
    let message = Message {
        channel: Some(Channel::new(reaction.channel_id.clone(), ChannelType::Text)),
        guild: Some(Guild::new(reaction.guild_id.clone())),
        ..Message::new(reaction.target.id.clone(), reaction.emoji.key())
    };
    let mut event = Event::from_message(event_type, message);
    event.user = Some(User::new(reaction.user_id));
    Translated::guild(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn translator(identities: &IdentityMaps) -> Translator<'_> {
        Translator::new(
            identities,
            Some(User {
                id: "bot".into(),
                name: Some("Bot".into()),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn group_at_message() {
        let ids = IdentityMaps::new();
        let out = translator(&ids)
            .translate(
                "GROUP_AT_MESSAGE_CREATE",
                &json!({
                    "id": "m1",
                    "content": " hi",
                    "timestamp": "2024-01-01T00:00:00+08:00",
                    "group_openid": "G1",
                    "author": {"id": "A", "member_openid": "M1"}
                }),
            )
            .unwrap();
        assert_eq!(out.platform, "qq");
        let event = out.event;
        assert_eq!(event.event_type, "message-created");
        assert_eq!(event.channel.as_ref().unwrap().id, "G1");
        assert_eq!(event.guild.as_ref().unwrap().id, "G1");
        assert_eq!(event.user.as_ref().unwrap().id, "M1");
        let message = event.message.unwrap();
        assert_eq!(message.content, r#"<at id="bot" name="Bot"/>hi"#);
        assert_eq!(message.created_at, Some(1704038400000));
        assert_eq!(ids.openid_kind("G1"), Some(OpenIdKind::Group));
    }

    #[test]
    fn c2c_message_is_direct() {
        let ids = IdentityMaps::new();
        let out = translator(&ids)
            .translate(
                "C2C_MESSAGE_CREATE",
                &json!({"id": "m2", "content": "yo", "author": {"user_openid": "U1"}}),
            )
            .unwrap();
        assert_eq!(out.platform, "qq");
        let channel = out.event.channel.unwrap();
        assert_eq!(channel.id, "U1");
        assert_eq!(channel.channel_type, ChannelType::Direct);
        assert_eq!(ids.openid_kind("U1"), Some(OpenIdKind::Private));
    }

    #[test]
    fn direct_message_records_guild() {
        let ids = IdentityMaps::new();
        let out = translator(&ids)
            .translate(
                "DIRECT_MESSAGE_CREATE",
                &json!({"id": "m3", "content": "x", "channel_id": "C9", "guild_id": "DG", "author": {"id": "u"}}),
            )
            .unwrap();
        assert_eq!(out.platform, "qqguild");
        assert_eq!(out.event.channel.unwrap().channel_type, ChannelType::Direct);
        assert_eq!(ids.direct_guild("C9").as_deref(), Some("DG"));
    }

    #[test]
    fn deletion_carries_operator() {
        let ids = IdentityMaps::new();
        let out = translator(&ids)
            .translate(
                "PUBLIC_MESSAGE_DELETE",
                &json!({
                    "message": {"id": "m4", "channel_id": "c", "guild_id": "g", "author": {"id": "u"}},
                    "op_user": {"id": "admin"}
                }),
            )
            .unwrap();
        assert_eq!(out.event.event_type, "message-deleted");
        assert_eq!(out.event.operator.unwrap().id, "admin");
        assert_eq!(out.event.message.unwrap().id, "m4");
    }

    #[test]
    fn reaction_content_is_emoji_key() {
        let ids = IdentityMaps::new();
        let out = translator(&ids)
            .translate(
                "MESSAGE_REACTION_ADD",
                &json!({
                    "user_id": "u", "guild_id": "g", "channel_id": "c",
                    "target": {"id": "m5", "type": 0},
                    "emoji": {"id": "4", "type": 1}
                }),
            )
            .unwrap();
        assert_eq!(out.event.event_type, "reaction-added");
        assert_eq!(out.event.message.unwrap().content, "1:4");
        assert_eq!(out.event.user.unwrap().id, "u");
    }

    #[test]
    fn group_robot_and_interaction() {
        let ids = IdentityMaps::new();
        let t = translator(&ids);
        let added = t
            .translate(
                "GROUP_ADD_ROBOT",
                &json!({"group_openid": "G2", "op_member_openid": "M", "timestamp": 1700000000}),
            )
            .unwrap();
        assert_eq!(added.platform, "qq");
        assert_eq!(added.event.event_type, "guild-added");
        assert_eq!(added.event.timestamp, 1700000000000);

        let button = t
            .translate(
                "INTERACTION_CREATE",
                &json!({
                    "id": "i1", "chat_type": 2, "user_openid": "U2",
                    "data": {"resolved": {"button_id": "b1"}}
                }),
            )
            .unwrap();
        assert_eq!(button.platform, "qq");
        assert_eq!(button.event.event_type, "interaction/button");
        assert_eq!(button.event.button.unwrap().id, "b1");
        assert_eq!(button.event.user.unwrap().id, "U2");
    }

    #[test]
    fn channel_types_map() {
        let ids = IdentityMaps::new();
        let out = translator(&ids)
            .translate(
                "CHANNEL_CREATE",
                &json!({"id": "c1", "guild_id": "g", "name": "语音", "type": 2, "op_user_id": "op"}),
            )
            .unwrap();
        assert_eq!(out.event.channel.unwrap().channel_type, ChannelType::Voice);
        assert_eq!(out.event.operator.unwrap().id, "op");
    }

    #[test]
    fn unknown_events_are_internal() {
        let ids = IdentityMaps::new();
        let t = translator(&ids);
        assert!(t.translate("READY", &json!({})).is_none());

        let out = t.translate("GROUP_MSG_REJECT", &json!({"x": 1})).unwrap();
        assert_eq!(out.platform, "qq");
        assert_eq!(out.event.event_type, "internal");
        assert_eq!(out.event.native_type.as_deref(), Some("GROUP_MSG_REJECT"));
        assert_eq!(out.event.native_data, Some(json!({"x": 1})));

        let out = t.translate("FORUM_THREAD_CREATE", &json!({})).unwrap();
        assert_eq!(out.platform, "qqguild");

        let out = t.translate("MESSAGE_DELETE", &json!("garbage")).unwrap();
        assert_eq!(out.event.event_type, "internal");
    }
}

use super::{Action, ActionContext, empty, reply};
use crate::adapter::normalize::{self, Mode};
use crate::adapter::translate::{iso_millis, member_of};
use crate::cache::{ListDirection, ListOrder};
use crate::element;
use crate::error::{ApiError, ApiResult};
use crate::outgoing::{self, Scene};
use crate::qq::model::QqMessage;
use crate::satori::{BidiPagedList, Channel, ChannelType, Guild, Message, User, now_millis};
use crate::warn;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

pub const ACTIONS: &[Action] = &[
    Action {
        name: "message.create",
        handler: create,
    },
    Action {
        name: "message.get",
        handler: get,
    },
    Action {
        name: "message.list",
        handler: list,
    },
    Action {
        name: "message.delete",
        handler: delete,
    },
    Action {
        name: "message.update",
        handler: update,
    },
];

#[derive(Deserialize)]
struct CreateParams {
    channel_id: String,
    content: String,
}

#[derive(Deserialize)]
struct MessageParams {
    channel_id: String,
    message_id: String,
}

#[derive(Deserialize)]
struct ListParams {
    channel_id: String,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(default)]
    order: Option<String>,
}

#[derive(Deserialize)]
struct UpdateParams {
    channel_id: String,
    message_id: String,
    content: String,
}

const DEFAULT_LIST_LIMIT: u64 = 50;

fn create(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        let params: CreateParams = ctx.parse()?;
        let elements = element::parse(&params.content);
        let server = &ctx.server;

        if ctx.is_guild() {
            let body = outgoing::build_guild(&elements, server).await;
            if body.is_empty() {
                return Err(ApiError::bad_request("消息内容为空"));
            }
            let (sent, channel_type) = match server.identities.direct_guild(&params.channel_id) {
                Some(guild_id) => (server.api.post_dms(&guild_id, &body).await?, ChannelType::Direct),
                None => (
                    server.api.post_message(&params.channel_id, &body).await?,
                    ChannelType::Text,
                ),
            };
            let message = Message {
                channel: Some(Channel::new(params.channel_id, channel_type)),
                created_at: sent_time(&sent.timestamp),
                ..Message::new(sent.id, params.content)
            };
            return reply(vec![message]);
        }

        let kind = server
            .identities
            .openid_kind(&params.channel_id)
            .ok_or_else(|| ApiError::not_found(format!("未知的会话: {}", params.channel_id)))?;
        let scene = Scene::from_kind(kind);
        let body = outgoing::build_v2(&elements, scene, &params.channel_id, server).await?;
        if body.is_empty() {
            return Err(ApiError::bad_request("消息内容为空"));
        }
        let sent = match scene {
            Scene::Group => server.api.post_group_message(&params.channel_id, &body).await?,
            Scene::C2c => server.api.post_c2c_message(&params.channel_id, &body).await?,
        };

        let channel_type = match scene {
            Scene::Group => ChannelType::Text,
            Scene::C2c => ChannelType::Direct,
        };
        let message = Message {
            channel: Some(Channel::new(params.channel_id.clone(), channel_type)),
            guild: (scene == Scene::Group).then(|| Guild::new(params.channel_id.clone())),
            user: server.logins.user().or_else(|| Some(User::new(server.logins.self_id()))),
            created_at: Some(sent_time(&sent.timestamp).unwrap_or_else(now_millis)),
            ..Message::new(sent.id, params.content)
        };
        if let Some(store) = &server.messages
            && let Err(e) = store.record(&message).await
        {
            warn!(target: "Action", "写入消息记录失败: {}", e);
        }
        reply(vec![message])
    })
}

/// 发送结果中的时间可能是 ISO 字符串或秒级时间戳
fn sent_time(timestamp: &Option<Value>) -> Option<i64> {
    match timestamp.as_ref()? {
        Value::String(s) => iso_millis(s).or_else(|| s.parse::<i64>().ok().map(|t| t * 1000)),
        Value::Number(n) => n.as_i64().map(|t| t * 1000),
        _ => None,
    }
}

fn get(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        let params: MessageParams = ctx.parse()?;
        let server = &ctx.server;

        if ctx.is_guild() {
            let message = server
                .api
                .message(&params.channel_id, &params.message_id)
                .await?;
            return reply(guild_message(&message));
        }

        let store = server
            .messages
            .as_ref()
            .ok_or_else(|| ApiError::unsupported("message.get", &ctx.platform))?;
        match store.get(&params.channel_id, &params.message_id).await? {
            Some(message) => reply(message),
            None => Err(ApiError::not_found(format!("消息 {} 不存在", params.message_id))),
        }
    })
}

fn list(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        let params: ListParams = ctx.parse()?;
        let direction = match params.direction.as_deref() {
            None => ListDirection::default(),
            Some(s) => ListDirection::parse(s)
                .ok_or_else(|| ApiError::bad_request(format!("未知的 direction: {}", s)))?,
        };
        let order = match params.order.as_deref() {
            None => ListOrder::default(),
            Some(s) => ListOrder::parse(s)
                .ok_or_else(|| ApiError::bad_request(format!("未知的 order: {}", s)))?,
        };
        let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 100);
        let server = &ctx.server;

        if ctx.is_guild() {
            let vendor_direction = match direction {
                ListDirection::Before => "before",
                ListDirection::After => "after",
                ListDirection::Around => "around",
            };
            let messages = server
                .api
                .messages(
                    &params.channel_id,
                    vendor_direction,
                    params.next.as_deref().filter(|n| !n.is_empty()),
                    limit as u32,
                )
                .await?;
            let mut data: Vec<Message> = messages.iter().map(guild_message).collect();
            data.sort_by_key(|m| m.created_at.unwrap_or_default());
            let full = data.len() as u64 >= limit;
            let prev = data.first().filter(|_| full).map(|m| m.id.clone());
            let next = data.last().filter(|_| full).map(|m| m.id.clone());
            if order == ListOrder::Desc {
                data.reverse();
            }
            return reply(BidiPagedList { data, prev, next });
        }

        let store = server
            .messages
            .as_ref()
            .ok_or_else(|| ApiError::unsupported("message.list", &ctx.platform))?;
        let page = store
            .list(
                &params.channel_id,
                params.next.as_deref(),
                direction,
                limit,
                order,
            )
            .await?;
        reply(page)
    })
}

fn delete(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("message.delete")?;
        let params: MessageParams = ctx.parse()?;
        let server = &ctx.server;
        match server.identities.direct_guild(&params.channel_id) {
            Some(guild_id) => server.api.retract_dms(&guild_id, &params.message_id).await?,
            None => {
                server
                    .api
                    .retract_message(&params.channel_id, &params.message_id)
                    .await?
            }
        }
        empty()
    })
}

fn update(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("message.update")?;
        let params: UpdateParams = ctx.parse()?;
        let elements = element::parse(&params.content);
        let body = outgoing::build_guild(&elements, &ctx.server).await;
        ctx.server
            .api
            .update_message(&params.channel_id, &params.message_id, &body)
            .await?;
        empty()
    })
}

/// 频道消息转为 Satori 消息
fn guild_message(message: &QqMessage) -> Message {
    let user = message.author.as_ref().map(|a| User {
        id: a.id.clone(),
        name: a.username.clone(),
        avatar: a.avatar.clone(),
        is_bot: a.bot,
        ..Default::default()
    });
    Message {
        channel: message
            .channel_id
            .clone()
            .map(|id| Channel::new(id, ChannelType::Text)),
        guild: message.guild_id.clone().map(Guild::new),
        member: message.member.as_ref().map(member_of),
        user,
        created_at: message.timestamp.as_deref().and_then(iso_millis),
        updated_at: message.edited_timestamp.as_deref().and_then(iso_millis),
        ..Message::new(
            message.id.clone(),
            normalize::content(message, Mode::Guild, None),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sent_time_accepts_both_shapes() {
        assert_eq!(sent_time(&Some(json!(1700000000))), Some(1700000000000));
        assert_eq!(sent_time(&Some(json!("1700000000"))), Some(1700000000000));
        assert_eq!(
            sent_time(&Some(json!("2024-01-01T00:00:00Z"))),
            Some(1704067200000)
        );
        assert_eq!(sent_time(&None), None);
    }
}

use super::{Action, ActionContext, empty, reply};
use crate::adapter::translate::channel_of;
use crate::error::{ApiError, ApiResult};
use crate::identity::OpenIdKind;
use crate::qq::model::ChannelBody;
use crate::satori::{Channel, ChannelType, PagedList};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

pub const ACTIONS: &[Action] = &[
    Action {
        name: "channel.get",
        handler: get,
    },
    Action {
        name: "channel.list",
        handler: list,
    },
    Action {
        name: "channel.create",
        handler: create,
    },
    Action {
        name: "channel.update",
        handler: update,
    },
    Action {
        name: "channel.delete",
        handler: delete,
    },
];

#[derive(Deserialize)]
struct ChannelParams {
    channel_id: String,
}

#[derive(Deserialize)]
struct ListParams {
    guild_id: String,
}

#[derive(Deserialize)]
struct CreateParams {
    guild_id: String,
    data: ChannelData,
}

#[derive(Deserialize)]
struct UpdateParams {
    channel_id: String,
    data: ChannelData,
}

/// 下游传入的频道字段
#[derive(Deserialize, Default)]
struct ChannelData {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    channel_type: Option<ChannelType>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    position: Option<i64>,
}

impl ChannelData {
    fn into_body(self) -> ApiResult<ChannelBody> {
        let channel_type = match self.channel_type {
            None => None,
            Some(ChannelType::Text) => Some(0),
            Some(ChannelType::Voice) => Some(2),
            Some(ChannelType::Category) => Some(4),
            Some(ChannelType::Direct) => {
                return Err(ApiError::bad_request("不能创建私信频道"));
            }
        };
        Ok(ChannelBody {
            name: self.name,
            channel_type,
            sub_type: channel_type.map(|_| 0),
            position: self.position,
            parent_id: self.parent_id,
        })
    }
}

/// 群聊与单聊只有一个频道，即 openid 本身
fn synthetic_channel(ctx: &ActionContext, id: &str) -> ApiResult<Channel> {
    match ctx.server.identities.openid_kind(id) {
        Some(OpenIdKind::Group) => Ok(Channel::new(id, ChannelType::Text)),
        Some(OpenIdKind::Private) => Ok(Channel::new(id, ChannelType::Direct)),
        None => Err(ApiError::not_found(format!("未知的频道: {}", id))),
    }
}

fn get(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        let params: ChannelParams = ctx.parse()?;
        if !ctx.is_guild() {
            return reply(synthetic_channel(&ctx, &params.channel_id)?);
        }
        let channel = ctx.server.api.channel(&params.channel_id).await?;
        reply(channel_of(&channel))
    })
}

fn list(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        let params: ListParams = ctx.parse()?;
        if !ctx.is_guild() {
            let channel = synthetic_channel(&ctx, &params.guild_id)?;
            return reply(PagedList::new(vec![channel], None));
        }
        let channels = ctx.server.api.channels(&params.guild_id).await?;
        reply(PagedList::new(channels.iter().map(channel_of).collect(), None))
    })
}

fn create(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("channel.create")?;
        let params: CreateParams = ctx.parse()?;
        let body = params.data.into_body()?;
        let channel = ctx
            .server
            .api
            .create_channel(&params.guild_id, &body)
            .await?;
        reply(channel_of(&channel))
    })
}

fn update(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("channel.update")?;
        let params: UpdateParams = ctx.parse()?;
        let body = params.data.into_body()?;
        ctx.server
            .api
            .update_channel(&params.channel_id, &body)
            .await?;
        empty()
    })
}

fn delete(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("channel.delete")?;
        let params: ChannelParams = ctx.parse()?;
        ctx.server.api.delete_channel(&params.channel_id).await?;
        empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_data_maps_types() {
        let body = ChannelData {
            name: Some("语音".into()),
            channel_type: Some(ChannelType::Voice),
            ..Default::default()
        }
        .into_body()
        .unwrap();
        assert_eq!(body.channel_type, Some(2));
        assert_eq!(body.sub_type, Some(0));

        let direct = ChannelData {
            channel_type: Some(ChannelType::Direct),
            ..Default::default()
        };
        assert!(direct.into_body().is_err());
    }
}

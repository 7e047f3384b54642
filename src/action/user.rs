use super::{Action, ActionContext, reply};
use crate::error::{ApiError, ApiResult};
use crate::identity::OpenIdKind;
use crate::satori::{Channel, ChannelType};
use crate::debug;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

pub const ACTIONS: &[Action] = &[Action {
    name: "user.channel.create",
    handler: channel_create,
}];

#[derive(Deserialize)]
struct ChannelCreateParams {
    user_id: String,
    #[serde(default)]
    guild_id: Option<String>,
}

/// 单聊直接以 openid 为频道；频道私信需要先向平台创建会话
fn channel_create(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        let params: ChannelCreateParams = ctx.parse()?;
        let server = &ctx.server;

        if !ctx.is_guild() {
            server
                .identities
                .record_openid(&params.user_id, OpenIdKind::Private);
            return reply(Channel::new(params.user_id, ChannelType::Direct));
        }

        let guild_id = params
            .guild_id
            .filter(|g| !g.is_empty())
            .ok_or_else(|| ApiError::bad_request("频道私信需要提供来源 guild_id"))?;
        let dms = server.api.create_dms(&params.user_id, &guild_id).await?;
        debug!(target: "Action", "私信会话 {} -> {}", dms.channel_id, dms.guild_id);
        server.identities.record_direct(&dms.channel_id, &dms.guild_id);
        reply(Channel::new(dms.channel_id, ChannelType::Direct))
    })
}

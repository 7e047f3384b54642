use super::{Action, ActionContext, reply};
use crate::adapter::translate::guild_of;
use crate::error::ApiResult;
use crate::satori::PagedList;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

pub const ACTIONS: &[Action] = &[
    Action {
        name: "guild.get",
        handler: get,
    },
    Action {
        name: "guild.list",
        handler: list,
    },
];

/// 开放平台单页上限
const PAGE_SIZE: u32 = 100;

#[derive(Deserialize)]
struct GuildParams {
    guild_id: String,
}

#[derive(Deserialize, Default)]
struct ListParams {
    #[serde(default)]
    next: Option<String>,
}

fn get(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.get")?;
        let params: GuildParams = ctx.parse()?;
        let guild = ctx.server.api.guild(&params.guild_id).await?;
        reply(guild_of(&guild))
    })
}

fn list(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.list")?;
        let params: ListParams = ctx.parse()?;
        let guilds = ctx
            .server
            .api
            .guilds(params.next.as_deref().filter(|n| !n.is_empty()), PAGE_SIZE)
            .await?;
        // 满页时以最后一个 ID 作为下一页游标
        let next = (guilds.len() as u32 >= PAGE_SIZE)
            .then(|| guilds.last().map(|g| g.id.clone()))
            .flatten();
        reply(PagedList::new(guilds.iter().map(guild_of).collect(), next))
    })
}

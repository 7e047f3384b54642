use super::{Action, ActionContext, empty, reply};
use crate::adapter::translate::member_of;
use crate::error::ApiResult;
use crate::satori::PagedList;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

pub const ACTIONS: &[Action] = &[
    Action {
        name: "guild.member.get",
        handler: get,
    },
    Action {
        name: "guild.member.list",
        handler: list,
    },
    Action {
        name: "guild.member.kick",
        handler: kick,
    },
    Action {
        name: "guild.member.mute",
        handler: mute,
    },
    Action {
        name: "guild.member.role.set",
        handler: role_set,
    },
    Action {
        name: "guild.member.role.unset",
        handler: role_unset,
    },
];

const PAGE_SIZE: u32 = 400;

#[derive(Deserialize)]
struct MemberParams {
    guild_id: String,
    user_id: String,
}

#[derive(Deserialize)]
struct ListParams {
    guild_id: String,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct KickParams {
    guild_id: String,
    user_id: String,
    #[serde(default)]
    permanent: bool,
}

#[derive(Deserialize)]
struct MuteParams {
    guild_id: String,
    user_id: String,
    /// 毫秒，0 为解除禁言
    #[serde(default)]
    duration: u64,
}

#[derive(Deserialize)]
struct RoleParams {
    guild_id: String,
    user_id: String,
    role_id: String,
}

fn get(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.member.get")?;
        let params: MemberParams = ctx.parse()?;
        let member = ctx
            .server
            .api
            .member(&params.guild_id, &params.user_id)
            .await?;
        reply(member_of(&member))
    })
}

fn list(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.member.list")?;
        let params: ListParams = ctx.parse()?;
        let members = ctx
            .server
            .api
            .members(
                &params.guild_id,
                params.next.as_deref().filter(|n| !n.is_empty()),
                PAGE_SIZE,
            )
            .await?;
        let next = (members.len() as u32 >= PAGE_SIZE)
            .then(|| members.last().and_then(|m| m.user.as_ref()).map(|u| u.id.clone()))
            .flatten();
        reply(PagedList::new(members.iter().map(member_of).collect(), next))
    })
}

fn kick(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.member.kick")?;
        let params: KickParams = ctx.parse()?;
        ctx.server
            .api
            .kick_member(&params.guild_id, &params.user_id, params.permanent)
            .await?;
        empty()
    })
}

fn mute(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.member.mute")?;
        let params: MuteParams = ctx.parse()?;
        ctx.server
            .api
            .mute_member(&params.guild_id, &params.user_id, params.duration / 1000)
            .await?;
        empty()
    })
}

fn role_set(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.member.role.set")?;
        let params: RoleParams = ctx.parse()?;
        ctx.server
            .api
            .add_member_role(&params.guild_id, &params.user_id, &params.role_id)
            .await?;
        empty()
    })
}

fn role_unset(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.member.role.unset")?;
        let params: RoleParams = ctx.parse()?;
        ctx.server
            .api
            .remove_member_role(&params.guild_id, &params.user_id, &params.role_id)
            .await?;
        empty()
    })
}

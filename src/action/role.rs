use super::{Action, ActionContext, empty, reply};
use crate::error::ApiResult;
use crate::qq::model::{QqRole, RoleBody};
use crate::satori::{GuildRole, PagedList};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

pub const ACTIONS: &[Action] = &[
    Action {
        name: "guild.role.list",
        handler: list,
    },
    Action {
        name: "guild.role.create",
        handler: create,
    },
    Action {
        name: "guild.role.update",
        handler: update,
    },
    Action {
        name: "guild.role.delete",
        handler: delete,
    },
];

#[derive(Deserialize)]
struct ListParams {
    guild_id: String,
}

/// 下游传入的角色字段；color 与 hoist 为平台扩展
#[derive(Deserialize, Default)]
struct RoleData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    color: Option<i64>,
    #[serde(default)]
    hoist: Option<bool>,
}

impl From<RoleData> for RoleBody {
    fn from(data: RoleData) -> Self {
        Self {
            name: data.name,
            color: data.color,
            hoist: data.hoist.map(i64::from),
        }
    }
}

#[derive(Deserialize)]
struct CreateParams {
    guild_id: String,
    #[serde(default)]
    role: RoleData,
}

#[derive(Deserialize)]
struct UpdateParams {
    guild_id: String,
    role_id: String,
    #[serde(default)]
    role: RoleData,
}

#[derive(Deserialize)]
struct DeleteParams {
    guild_id: String,
    role_id: String,
}

fn role_of(role: &QqRole) -> GuildRole {
    GuildRole {
        id: role.id.clone(),
        name: role.name.clone(),
    }
}

fn list(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.role.list")?;
        let params: ListParams = ctx.parse()?;
        let roles = ctx.server.api.roles(&params.guild_id).await?;
        reply(PagedList::new(roles.roles.iter().map(role_of).collect(), None))
    })
}

fn create(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.role.create")?;
        let params: CreateParams = ctx.parse()?;
        let name = params.role.name.clone();
        let created = ctx
            .server
            .api
            .create_role(&params.guild_id, &params.role.into())
            .await?;
        let role = match created.role {
            Some(role) => role_of(&role),
            None => GuildRole {
                id: created.role_id,
                name,
            },
        };
        reply(role)
    })
}

fn update(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.role.update")?;
        let params: UpdateParams = ctx.parse()?;
        ctx.server
            .api
            .update_role(&params.guild_id, &params.role_id, &params.role.into())
            .await?;
        empty()
    })
}

fn delete(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("guild.role.delete")?;
        let params: DeleteParams = ctx.parse()?;
        ctx.server
            .api
            .delete_role(&params.guild_id, &params.role_id)
            .await?;
        empty()
    })
}

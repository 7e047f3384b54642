use super::{Action, ActionContext, empty, reply};
use crate::error::ApiResult;
use crate::hub::webhook::WebhookInfo;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

pub const ACTIONS: &[Action] = &[
    Action {
        name: "login.list",
        handler: login_list,
    },
    Action {
        name: "webhook.create",
        handler: webhook_create,
    },
    Action {
        name: "webhook.delete",
        handler: webhook_delete,
    },
];

#[derive(Deserialize)]
struct DeleteParams {
    url: String,
}

fn login_list(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move { reply(ctx.server.logins.all()) })
}

fn webhook_create(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        let info: WebhookInfo = ctx.parse()?;
        ctx.server.webhooks.create(info)?;
        empty()
    })
}

fn webhook_delete(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        let params: DeleteParams = ctx.parse()?;
        ctx.server.webhooks.delete(&params.url)?;
        empty()
    })
}

use super::{Action, ActionContext, reply};
use crate::error::{ApiError, ApiResult};
use futures_util::future::BoxFuture;
use serde_json::Value;

pub const ACTIONS: &[Action] = &[Action {
    name: "login.get",
    handler: get,
}];

fn get(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        let login = ctx
            .server
            .logins
            .login(&ctx.platform)
            .ok_or_else(|| ApiError::not_found(format!("未知平台: {}", ctx.platform)))?;
        reply(login)
    })
}

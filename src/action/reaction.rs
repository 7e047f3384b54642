use super::{Action, ActionContext, empty, reply};
use crate::adapter::translate::user_of;
use crate::error::{ApiError, ApiResult};
use crate::qq::model::Emoji;
use crate::satori::PagedList;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

pub const ACTIONS: &[Action] = &[
    Action {
        name: "reaction.create",
        handler: create,
    },
    Action {
        name: "reaction.delete",
        handler: delete,
    },
    Action {
        name: "reaction.clear",
        handler: clear,
    },
    Action {
        name: "reaction.list",
        handler: list,
    },
];

const PAGE_SIZE: u32 = 50;

#[derive(Deserialize)]
struct ReactionParams {
    channel_id: String,
    message_id: String,
    emoji: String,
}

#[derive(Deserialize)]
struct ClearParams {
    channel_id: String,
    message_id: String,
    /// 单个表情、逗号分隔的列表或数组
    #[serde(default)]
    emoji: Option<Value>,
}

#[derive(Deserialize)]
struct ListParams {
    channel_id: String,
    message_id: String,
    emoji: String,
    #[serde(default)]
    next: Option<String>,
}

fn parse_emoji(s: &str) -> ApiResult<Emoji> {
    Emoji::parse(s).ok_or_else(|| ApiError::bad_request(format!("无效的表情: {}", s)))
}

/// 展开 reaction.clear 的表情参数
fn emoji_list(value: Option<&Value>) -> ApiResult<Vec<Emoji>> {
    let raw: Vec<String> = match value {
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(ApiError::bad_request(format!("无效的表情: {}", other))),
            })
            .collect::<ApiResult<_>>()?,
        _ => return Err(ApiError::bad_request("reaction.clear 需要指定 emoji")),
    };
    let emojis = raw
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(parse_emoji)
        .collect::<ApiResult<Vec<_>>>()?;
    if emojis.is_empty() {
        return Err(ApiError::bad_request("reaction.clear 需要指定 emoji"));
    }
    Ok(emojis)
}

fn create(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("reaction.create")?;
        let params: ReactionParams = ctx.parse()?;
        let emoji = parse_emoji(&params.emoji)?;
        ctx.server
            .api
            .put_reaction(&params.channel_id, &params.message_id, &emoji)
            .await?;
        empty()
    })
}

/// 开放平台只能撤销机器人自己的表态
fn delete(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("reaction.delete")?;
        let params: ReactionParams = ctx.parse()?;
        let emoji = parse_emoji(&params.emoji)?;
        ctx.server
            .api
            .delete_reaction(&params.channel_id, &params.message_id, &emoji)
            .await?;
        empty()
    })
}

fn clear(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("reaction.clear")?;
        let params: ClearParams = ctx.parse()?;
        for emoji in emoji_list(params.emoji.as_ref())? {
            ctx.server
                .api
                .delete_reaction(&params.channel_id, &params.message_id, &emoji)
                .await?;
        }
        empty()
    })
}

fn list(ctx: ActionContext) -> BoxFuture<'static, ApiResult<Value>> {
    Box::pin(async move {
        ctx.require_guild("reaction.list")?;
        let params: ListParams = ctx.parse()?;
        let emoji = parse_emoji(&params.emoji)?;
        let page = ctx
            .server
            .api
            .reaction_users(
                &params.channel_id,
                &params.message_id,
                &emoji,
                params.next.as_deref().filter(|n| !n.is_empty()),
                PAGE_SIZE,
            )
            .await?;
        let next = if page.is_end { None } else { page.cookie.clone() };
        reply(PagedList::new(page.users.iter().map(user_of).collect(), next))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clear_accepts_list_forms() {
        let list = emoji_list(Some(&json!("1:4, 2:128076"))).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].key(), "2:128076");

        let list = emoji_list(Some(&json!(["4"]))).unwrap();
        assert_eq!(list[0].key(), "1:4");

        assert!(emoji_list(None).is_err());
        assert!(emoji_list(Some(&json!(""))).is_err());
        assert!(emoji_list(Some(&json!([1]))).is_err());
    }
}

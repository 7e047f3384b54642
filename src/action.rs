// ============================================================================
// 动作分发
// 资源动作与管理动作各有一张表，按名称查找处理函数
// ============================================================================

use crate::error::{ApiError, ApiResult};
use crate::satori::platforms;
use crate::server::Server;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub mod admin;
pub mod channel;
pub mod guild;
pub mod login;
pub mod member;
pub mod message;
pub mod reaction;
pub mod role;
pub mod user;

pub type ActionHandler = fn(ActionContext) -> BoxFuture<'static, ApiResult<Value>>;

/// 动作表中的一项
pub struct Action {
    pub name: &'static str,
    pub handler: ActionHandler,
}

/// 单次动作调用的上下文
pub struct ActionContext {
    pub server: Arc<Server>,
    /// 管理动作为空串
    pub platform: String,
    pub body: Value,
}

impl ActionContext {
    pub fn new(server: Arc<Server>, platform: impl Into<String>, body: Value) -> Self {
        Self {
            server,
            platform: platform.into(),
            body,
        }
    }

    /// 把请求体解析为具体参数
    pub fn parse<T: DeserializeOwned>(&self) -> ApiResult<T> {
        Ok(T::deserialize(&self.body)?)
    }

    pub fn is_guild(&self) -> bool {
        self.platform == platforms::QQGUILD
    }

    /// 仅频道平台支持的动作
    pub fn require_guild(&self, action: &str) -> ApiResult<()> {
        if self.is_guild() {
            Ok(())
        } else {
            Err(ApiError::unsupported(action, &self.platform))
        }
    }
}

/// 把处理结果序列化为响应体
pub fn reply<T: Serialize>(value: T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(|e| ApiError::internal(format!("响应序列化失败: {}", e)))
}

/// 无返回值的动作统一响应 `{}`
pub fn empty() -> ApiResult<Value> {
    Ok(Value::Object(Default::default()))
}

#[derive(Default)]
pub struct ActionRegistry {
    resources: RwLock<HashMap<String, ActionHandler>>,
    admin: RwLock<HashMap<String, ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置的全部动作
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for table in [
            message::ACTIONS,
            channel::ACTIONS,
            guild::ACTIONS,
            member::ACTIONS,
            role::ACTIONS,
            reaction::ACTIONS,
            user::ACTIONS,
            login::ACTIONS,
        ] {
            for action in table {
                registry.register(action.name, action.handler);
            }
        }
        for action in admin::ACTIONS {
            registry.register_admin(action.name, action.handler);
        }
        registry
    }

    pub fn register(&self, name: &str, handler: ActionHandler) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), handler);
    }

    pub fn register_admin(&self, name: &str, handler: ActionHandler) {
        self.admin
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<ActionHandler> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    pub fn get_admin(&self, name: &str) -> Option<ActionHandler> {
        self.admin
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_action_table() {
        let registry = ActionRegistry::with_defaults();
        for name in [
            "message.create",
            "message.get",
            "message.list",
            "message.delete",
            "message.update",
            "channel.get",
            "channel.list",
            "channel.create",
            "channel.update",
            "channel.delete",
            "guild.get",
            "guild.list",
            "guild.member.get",
            "guild.member.list",
            "guild.member.kick",
            "guild.member.mute",
            "guild.member.role.set",
            "guild.member.role.unset",
            "guild.role.list",
            "guild.role.create",
            "guild.role.update",
            "guild.role.delete",
            "user.channel.create",
            "reaction.create",
            "reaction.delete",
            "reaction.clear",
            "reaction.list",
            "login.get",
        ] {
            assert!(registry.get(name).is_some(), "缺少动作 {}", name);
        }
        for name in ["login.list", "webhook.create", "webhook.delete"] {
            assert!(registry.get_admin(name).is_some(), "缺少管理动作 {}", name);
        }
        assert!(registry.get("login.list").is_none());
        assert!(registry.get("nope").is_none());
    }
}

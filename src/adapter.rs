// ============================================================================
// 上游适配
// 网关与 Webhook 两种接入方式共用的登录状态与事件分发
// ============================================================================

use crate::satori::{ADAPTER_NAME, Event, Login, LoginStatus, User, event_types, platforms};
use crate::server::Server;
use crate::{debug, info, warn};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};

pub mod gateway;
pub mod normalize;
pub mod translate;
pub mod webhook;

use translate::{Translated, Translator};

/// 两个逻辑平台的登录序号
const LOGIN_SN: [(&str, i64); 2] = [(platforms::QQ, 1), (platforms::QQGUILD, 2)];

/// 群聊 / 单聊可用的动作
const QQ_FEATURES: &[&str] = &["message.create", "channel.get", "user.channel.create"];
/// 频道可用的动作
const QQGUILD_FEATURES: &[&str] = &[
    "message.create",
    "message.get",
    "message.list",
    "message.delete",
    "message.update",
    "guild.member.mute",
    "reaction.create",
    "reaction.delete",
    "reaction.list",
    "reaction.clear",
];

struct LoginState {
    self_id: String,
    user: Option<User>,
    status: LoginStatus,
}

/// 进程内的登录状态；两个平台共用同一个机器人身份
pub struct Logins {
    state: RwLock<LoginState>,
    message_cache: bool,
}

impl Logins {
    pub fn new(bot_id: &str, message_cache: bool) -> Self {
        Self {
            state: RwLock::new(LoginState {
                self_id: bot_id.to_string(),
                user: None,
                status: LoginStatus::Offline,
            }),
            message_cache,
        }
    }

    pub fn is_known_platform(platform: &str) -> bool {
        LOGIN_SN.iter().any(|(p, _)| *p == platform)
    }

    pub fn self_id(&self) -> String {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .self_id
            .clone()
    }

    pub fn status(&self) -> LoginStatus {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    pub fn user(&self) -> Option<User> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .user
            .clone()
    }

    /// 返回状态是否发生变化
    pub fn set_status(&self, status: LoginStatus) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let changed = state.status != status;
        state.status = status;
        changed
    }

    /// 记录机器人自身信息；未配置 bot_id 时以此为准
    pub fn set_user(&self, user: User) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.self_id.is_empty() {
            state.self_id = user.id.clone();
        }
        state.user = Some(User {
            id: state.self_id.clone(),
            ..user
        });
    }

    pub fn login(&self, platform: &str) -> Option<Login> {
        let sn = LOGIN_SN.iter().find(|(p, _)| *p == platform)?.1;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut features: Vec<String> = match platform {
            platforms::QQ => QQ_FEATURES.iter().map(|s| s.to_string()).collect(),
            _ => QQGUILD_FEATURES.iter().map(|s| s.to_string()).collect(),
        };
        if platform == platforms::QQ && self.message_cache {
            features.push("message.get".into());
            features.push("message.list".into());
        }
        Some(Login {
            sn,
            platform: platform.to_string(),
            user: state.user.clone(),
            status: state.status,
            adapter: ADAPTER_NAME.to_string(),
            features,
            self_id: state.self_id.clone(),
        })
    }

    pub fn all(&self) -> Vec<Login> {
        LOGIN_SN
            .iter()
            .filter_map(|(platform, _)| self.login(platform))
            .collect()
    }
}

/// 更新登录状态；有变化时为两个平台各广播一次 login-updated
pub fn set_status(server: &Server, status: LoginStatus) {
    if !server.logins.set_status(status) {
        return;
    }
    info!(target: "Adapter", "登录状态变为 {:?}", status);
    for login in server.logins.all() {
        let event = Event {
            login: Some(login),
            ..Event::new(event_types::LOGIN_UPDATED)
        };
        server.hub.broadcast(event);
    }
}

/// 附上登录信息后送入事件中心
pub fn emit(server: &Server, platform: &str, mut event: Event, native_id: Option<&str>) -> Option<i64> {
    event.login = server.logins.login(platform);
    server.hub.broadcast_native(native_id, event)
}

/// 处理一个上游分发事件
pub async fn dispatch(server: &Arc<Server>, kind: &str, data: Value, native_id: Option<&str>) {
    let translator = Translator::new(&server.identities, server.logins.user());
    let Some(Translated { platform, event }) = translator.translate(kind, &data) else {
        debug!(target: "Adapter", "忽略事件 {}", kind);
        return;
    };

    let record = if platform == platforms::QQ && event.event_type == event_types::MESSAGE_CREATED {
        event.message.clone()
    } else {
        None
    };

    if kind == "INTERACTION_CREATE"
        && let Some(id) = data.get("id").and_then(Value::as_str)
    {
        let api = server.api.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = api.ack_interaction(&id).await {
                warn!(target: "Adapter", "回应按钮回调失败: {}", e);
            }
        });
    }

    // 重复投递的事件不再入库
    if emit(server, platform, event, native_id).is_none() {
        return;
    }
    if let (Some(store), Some(message)) = (&server.messages, record)
        && let Err(e) = store.record(&message).await
    {
        warn!(target: "Adapter", "写入消息记录失败: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_logins_share_identity() {
        let logins = Logins::new("", true);
        assert!(logins.all().iter().all(|l| l.self_id.is_empty()));

        logins.set_user(User {
            id: "9527".into(),
            name: Some("bot".into()),
            ..Default::default()
        });
        assert!(logins.set_status(LoginStatus::Online));
        assert!(!logins.set_status(LoginStatus::Online));

        let all = logins.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].platform, "qq");
        assert_eq!(all[0].sn, 1);
        assert_eq!(all[1].platform, "qqguild");
        assert!(all.iter().all(|l| l.self_id == "9527"));
        assert!(all.iter().all(|l| l.status == LoginStatus::Online));
        assert!(all[0].features.contains(&"message.list".to_string()));
        assert!(logins.login("discord").is_none());
    }

    #[test]
    fn configured_bot_id_wins() {
        let logins = Logins::new("bot1", false);
        logins.set_user(User::new("other"));
        assert_eq!(logins.self_id(), "bot1");
        assert_eq!(logins.user().unwrap().id, "bot1");
        assert!(!logins.login("qq").unwrap().features.contains(&"message.get".to_string()));
    }
}

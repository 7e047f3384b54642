// lib.rs
//
// ================================================================================
// satori-qq - QQ 开放平台 ⇄ Satori 协议网关
//
// 上游：QQ 机器人网关 WebSocket / Webhook 回调
// 下游：Satori HTTP 动作、事件 WebSocket、Webhook 推送
// ================================================================================

#[macro_use]
pub mod log;

pub mod action;
pub mod adapter;
pub mod cache;
pub mod config;
pub mod element;
pub mod error;
pub mod hub;
pub mod identity;
pub mod outgoing;
pub mod qq;
pub mod resource;
pub mod satori;
pub mod scheduler;
pub mod server;

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use server::{Server, ServerBuilder};

pub mod prelude {
    //! 常用类型的预导入模块

    pub use super::action::{Action, ActionContext, ActionHandler, ActionRegistry};
    pub use super::config::AppConfig;
    pub use super::element::{Element, MediaKind};
    pub use super::error::{ApiError, ApiResult};
    pub use super::hub::{Delivery, EventHub, EventSink};
    pub use super::qq::{OpenApi, OpenApiError, OpenApiResult, QqApi};
    pub use super::satori::{
        Channel, ChannelType, Event, Guild, GuildMember, GuildRole, Login, LoginStatus, Message,
        PagedList, User,
    };
    pub use super::server::{Server, ServerBuilder};
}

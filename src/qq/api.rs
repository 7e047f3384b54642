// 开放平台接口封装
// 频道相关为 v1 接口，群聊 / 单聊为 v2 接口

use super::model::*;
use super::{OpenApiResult, QqApi, seg, with_query};
use http::Method;
use serde_json::{Value, json};

const NO_BODY: Option<&Value> = None;

impl QqApi {
    // --- 网关 ---

    pub async fn gateway(&self) -> OpenApiResult<Gateway> {
        self.call(Method::GET, "/gateway/bot", NO_BODY).await
    }

    // --- 用户 ---

    pub async fn me(&self) -> OpenApiResult<QqUser> {
        self.call(Method::GET, "/users/@me", NO_BODY).await
    }

    pub async fn guilds(&self, after: Option<&str>, limit: u32) -> OpenApiResult<Vec<QqGuild>> {
        let path = with_query(
            "/users/@me/guilds",
            &[
                ("after", after.map(str::to_string)),
                ("limit", Some(limit.to_string())),
            ],
        );
        self.call(Method::GET, &path, NO_BODY).await
    }

    // --- 频道 ---

    pub async fn guild(&self, guild_id: &str) -> OpenApiResult<QqGuild> {
        self.call(Method::GET, &format!("/guilds/{}", seg(guild_id)), NO_BODY)
            .await
    }

    pub async fn channels(&self, guild_id: &str) -> OpenApiResult<Vec<QqChannel>> {
        self.call(
            Method::GET,
            &format!("/guilds/{}/channels", seg(guild_id)),
            NO_BODY,
        )
        .await
    }

    pub async fn channel(&self, channel_id: &str) -> OpenApiResult<QqChannel> {
        self.call(Method::GET, &format!("/channels/{}", seg(channel_id)), NO_BODY)
            .await
    }

    pub async fn create_channel(
        &self,
        guild_id: &str,
        body: &ChannelBody,
    ) -> OpenApiResult<QqChannel> {
        self.call(
            Method::POST,
            &format!("/guilds/{}/channels", seg(guild_id)),
            Some(body),
        )
        .await
    }

    pub async fn update_channel(
        &self,
        channel_id: &str,
        body: &ChannelBody,
    ) -> OpenApiResult<QqChannel> {
        self.call(
            Method::PATCH,
            &format!("/channels/{}", seg(channel_id)),
            Some(body),
        )
        .await
    }

    pub async fn delete_channel(&self, channel_id: &str) -> OpenApiResult<()> {
        self.call_unit(
            Method::DELETE,
            &format!("/channels/{}", seg(channel_id)),
            NO_BODY,
        )
        .await
    }

    // --- 成员 ---

    pub async fn member(&self, guild_id: &str, user_id: &str) -> OpenApiResult<QqMember> {
        self.call(
            Method::GET,
            &format!("/guilds/{}/members/{}", seg(guild_id), seg(user_id)),
            NO_BODY,
        )
        .await
    }

    pub async fn members(
        &self,
        guild_id: &str,
        after: Option<&str>,
        limit: u32,
    ) -> OpenApiResult<Vec<QqMember>> {
        let path = with_query(
            &format!("/guilds/{}/members", seg(guild_id)),
            &[
                ("after", Some(after.unwrap_or("0").to_string())),
                ("limit", Some(limit.to_string())),
            ],
        );
        self.call(Method::GET, &path, NO_BODY).await
    }

    pub async fn kick_member(
        &self,
        guild_id: &str,
        user_id: &str,
        add_blacklist: bool,
    ) -> OpenApiResult<()> {
        self.call_unit(
            Method::DELETE,
            &format!("/guilds/{}/members/{}", seg(guild_id), seg(user_id)),
            Some(&json!({ "add_blacklist": add_blacklist })),
        )
        .await
    }

    pub async fn mute_member(&self, guild_id: &str, user_id: &str, seconds: u64) -> OpenApiResult<()> {
        let body = MuteBody {
            mute_seconds: seconds.to_string(),
        };
        self.call_unit(
            Method::PATCH,
            &format!("/guilds/{}/members/{}/mute", seg(guild_id), seg(user_id)),
            Some(&body),
        )
        .await
    }

    // --- 身份组 ---

    pub async fn roles(&self, guild_id: &str) -> OpenApiResult<QqRoles> {
        self.call(
            Method::GET,
            &format!("/guilds/{}/roles", seg(guild_id)),
            NO_BODY,
        )
        .await
    }

    pub async fn create_role(&self, guild_id: &str, body: &RoleBody) -> OpenApiResult<CreatedRole> {
        self.call(
            Method::POST,
            &format!("/guilds/{}/roles", seg(guild_id)),
            Some(body),
        )
        .await
    }

    pub async fn update_role(
        &self,
        guild_id: &str,
        role_id: &str,
        body: &RoleBody,
    ) -> OpenApiResult<UpdatedRole> {
        self.call(
            Method::PATCH,
            &format!("/guilds/{}/roles/{}", seg(guild_id), seg(role_id)),
            Some(body),
        )
        .await
    }

    pub async fn delete_role(&self, guild_id: &str, role_id: &str) -> OpenApiResult<()> {
        self.call_unit(
            Method::DELETE,
            &format!("/guilds/{}/roles/{}", seg(guild_id), seg(role_id)),
            NO_BODY,
        )
        .await
    }

    pub async fn add_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> OpenApiResult<()> {
        self.call_unit(
            Method::PUT,
            &format!(
                "/guilds/{}/members/{}/roles/{}",
                seg(guild_id),
                seg(user_id),
                seg(role_id)
            ),
            NO_BODY,
        )
        .await
    }

    pub async fn remove_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> OpenApiResult<()> {
        self.call_unit(
            Method::DELETE,
            &format!(
                "/guilds/{}/members/{}/roles/{}",
                seg(guild_id),
                seg(user_id),
                seg(role_id)
            ),
            NO_BODY,
        )
        .await
    }

    // --- 频道消息 ---

    pub async fn message(&self, channel_id: &str, message_id: &str) -> OpenApiResult<QqMessage> {
        // 单条消息外层包了一层 {message: ...}
        let value: Value = self
            .call(
                Method::GET,
                &format!("/channels/{}/messages/{}", seg(channel_id), seg(message_id)),
                NO_BODY,
            )
            .await?;
        let inner = match value {
            Value::Object(mut map) if map.contains_key("message") => {
                map.remove("message").unwrap_or_default()
            }
            other => other,
        };
        serde_json::from_value(inner).map_err(|e| super::OpenApiError::Decode(e.to_string()))
    }

    /// `direction` 为 before / after / around
    pub async fn messages(
        &self,
        channel_id: &str,
        direction: &str,
        anchor: Option<&str>,
        limit: u32,
    ) -> OpenApiResult<Vec<QqMessage>> {
        let path = with_query(
            &format!("/channels/{}/messages", seg(channel_id)),
            &[
                ("type", anchor.map(|_| direction.to_string())),
                ("id", anchor.map(str::to_string)),
                ("limit", Some(limit.to_string())),
            ],
        );
        self.call(Method::GET, &path, NO_BODY).await
    }

    pub async fn post_message(&self, channel_id: &str, body: &GuildSend) -> OpenApiResult<SentMessage> {
        self.call(
            Method::POST,
            &format!("/channels/{}/messages", seg(channel_id)),
            Some(body),
        )
        .await
    }

    pub async fn update_message(
        &self,
        channel_id: &str,
        message_id: &str,
        body: &GuildSend,
    ) -> OpenApiResult<()> {
        self.call_unit(
            Method::PATCH,
            &format!("/channels/{}/messages/{}", seg(channel_id), seg(message_id)),
            Some(body),
        )
        .await
    }

    pub async fn retract_message(&self, channel_id: &str, message_id: &str) -> OpenApiResult<()> {
        let path = with_query(
            &format!("/channels/{}/messages/{}", seg(channel_id), seg(message_id)),
            &[("hidetip", Some("false".to_string()))],
        );
        self.call_unit(Method::DELETE, &path, NO_BODY).await
    }

    // --- 私信 ---

    pub async fn create_dms(&self, recipient_id: &str, source_guild_id: &str) -> OpenApiResult<Dms> {
        self.call(
            Method::POST,
            "/users/@me/dms",
            Some(&json!({
                "recipient_id": recipient_id,
                "source_guild_id": source_guild_id,
            })),
        )
        .await
    }

    pub async fn post_dms(&self, guild_id: &str, body: &GuildSend) -> OpenApiResult<SentMessage> {
        self.call(
            Method::POST,
            &format!("/dms/{}/messages", seg(guild_id)),
            Some(body),
        )
        .await
    }

    pub async fn retract_dms(&self, guild_id: &str, message_id: &str) -> OpenApiResult<()> {
        let path = with_query(
            &format!("/dms/{}/messages/{}", seg(guild_id), seg(message_id)),
            &[("hidetip", Some("false".to_string()))],
        );
        self.call_unit(Method::DELETE, &path, NO_BODY).await
    }

    // --- 表情表态 ---

    fn reaction_path(channel_id: &str, message_id: &str, emoji: &Emoji) -> String {
        format!(
            "/channels/{}/messages/{}/reactions/{}/{}",
            seg(channel_id),
            seg(message_id),
            emoji.emoji_type,
            seg(&emoji.id)
        )
    }

    pub async fn put_reaction(&self, channel_id: &str, message_id: &str, emoji: &Emoji) -> OpenApiResult<()> {
        self.call_unit(
            Method::PUT,
            &Self::reaction_path(channel_id, message_id, emoji),
            NO_BODY,
        )
        .await
    }

    pub async fn delete_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &Emoji,
    ) -> OpenApiResult<()> {
        self.call_unit(
            Method::DELETE,
            &Self::reaction_path(channel_id, message_id, emoji),
            NO_BODY,
        )
        .await
    }

    pub async fn reaction_users(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &Emoji,
        cookie: Option<&str>,
        limit: u32,
    ) -> OpenApiResult<ReactionUsers> {
        let path = with_query(
            &Self::reaction_path(channel_id, message_id, emoji),
            &[
                ("cookie", cookie.map(str::to_string)),
                ("limit", Some(limit.to_string())),
            ],
        );
        self.call(Method::GET, &path, NO_BODY).await
    }

    // --- 互动 ---

    /// 回应按钮回调
    pub async fn ack_interaction(&self, interaction_id: &str) -> OpenApiResult<()> {
        self.call_unit(
            Method::PUT,
            &format!("/interactions/{}", seg(interaction_id)),
            Some(&json!({ "code": 0 })),
        )
        .await
    }

    // --- 群聊 / 单聊 (v2) ---

    pub async fn post_group_message(&self, group_openid: &str, body: &V2Send) -> OpenApiResult<SentMessage> {
        self.call(
            Method::POST,
            &format!("/v2/groups/{}/messages", seg(group_openid)),
            Some(body),
        )
        .await
    }

    pub async fn post_c2c_message(&self, openid: &str, body: &V2Send) -> OpenApiResult<SentMessage> {
        self.call(
            Method::POST,
            &format!("/v2/users/{}/messages", seg(openid)),
            Some(body),
        )
        .await
    }

    pub async fn upload_group_media(
        &self,
        group_openid: &str,
        body: &MediaUpload,
    ) -> OpenApiResult<UploadedMedia> {
        self.call(
            Method::POST,
            &format!("/v2/groups/{}/files", seg(group_openid)),
            Some(body),
        )
        .await
    }

    pub async fn upload_c2c_media(&self, openid: &str, body: &MediaUpload) -> OpenApiResult<UploadedMedia> {
        self.call(
            Method::POST,
            &format!("/v2/users/{}/files", seg(openid)),
            Some(body),
        )
        .await
    }
}

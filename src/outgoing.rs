// ============================================================================
// 出站消息构建
// 把消息元素树折叠为频道 (v1) 或群聊 / 单聊 (v2) 的请求体
// ============================================================================

use crate::element::escape::escape_text;
use crate::element::{Element, MediaKind};
use crate::error::ApiResult;
use crate::identity::OpenIdKind;
use crate::qq::model::{GuildSend, Keyboard, MediaInfo, MediaUpload, MessageReference, MsgType, V2Send};
use crate::server::Server;
use crate::{debug, warn};
use rand::Rng;

/// v2 消息的会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    Group,
    C2c,
}

impl Scene {
    pub fn from_kind(kind: OpenIdKind) -> Self {
        match kind {
            OpenIdKind::Group => Self::Group,
            OpenIdKind::Private => Self::C2c,
        }
    }

    /// 上传句柄缓存键前缀
    pub fn cache_prefix(&self) -> &'static str {
        match self {
            Self::Group => OpenIdKind::Group.as_str(),
            Self::C2c => OpenIdKind::Private.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Guild,
    V2(Scene),
}

#[derive(Debug, Clone, PartialEq)]
struct PendingMedia {
    kind: MediaKind,
    src: String,
    cache: bool,
}

/// 元素树遍历的中间结果，不含任何网络操作
#[derive(Debug, Default, PartialEq)]
struct Draft {
    content: String,
    quote: Option<String>,
    passive_id: Option<String>,
    passive_seq: Option<u64>,
    media: Option<PendingMedia>,
    keyboard: Option<String>,
}

impl Draft {
    fn build(elements: &[Element], target: Target) -> Self {
        let mut draft = Self::default();
        draft.walk(elements, target);
        draft
    }

    fn walk(&mut self, elements: &[Element], target: Target) {
        for element in elements {
            self.visit(element, target);
        }
    }

    fn visit(&mut self, element: &Element, target: Target) {
        match element {
            // 正文里的尖括号不能被平台当成提及或表情
            Element::Text(text) => self.content.push_str(&escape_text(text)),
            Element::Style { children, .. } => self.walk(children, target),
            Element::Break => self.content.push('\n'),
            Element::Paragraph { children, .. } => {
                if !self.content.is_empty() && !self.content.ends_with('\n') {
                    self.content.push('\n');
                }
                self.walk(children, target);
                self.content.push('\n');
            }
            Element::At { id, at_type, .. } => match target {
                Target::Guild if at_type.as_deref() == Some("all") => {
                    self.content.push_str("<qqbot-at-everyone />")
                }
                Target::Guild | Target::V2(Scene::Group) => {
                    if let Some(id) = id {
                        self.content.push_str(&format!("<@{}>", id));
                    }
                }
                Target::V2(Scene::C2c) => {}
            },
            Element::Sharp { id: Some(id), .. } if target == Target::Guild => {
                self.content.push_str(&format!("<#{}>", id));
            }
            Element::Sharp { .. } => {}
            Element::Link { href, .. } => self.content.push_str(href),
            Element::Media {
                kind, src, cache, ..
            } => {
                let accepted = match target {
                    Target::Guild => *kind == MediaKind::Image,
                    Target::V2(_) => true,
                };
                if accepted && self.media.is_none() && !src.is_empty() {
                    self.media = Some(PendingMedia {
                        kind: *kind,
                        src: src.clone(),
                        cache: *cache,
                    });
                }
            }
            Element::Quote { id, children, .. } => {
                if self.quote.is_none() {
                    self.quote = id.clone().or_else(|| first_message_id(children));
                }
            }
            Element::Passive { id, seq, .. } => self.set_passive(id.clone(), *seq),
            Element::Button { id, .. } => {
                if let (Target::V2(_), Some(id)) = (target, id)
                    && self.keyboard.is_none()
                {
                    self.keyboard = Some(id.clone());
                }
            }
            Element::Message { children, .. } => self.walk(children, target),
            Element::Author { .. } => {}
            Element::Extension {
                tag,
                attrs,
                children,
            } => match tag.as_str() {
                "qq:passive" => self.set_passive(
                    attrs.get("id").cloned(),
                    attrs.get("seq").and_then(|s| s.parse().ok()),
                ),
                "qqguild:emoji" => {
                    if target == Target::Guild
                        && let Some(id) = attrs.get("id")
                    {
                        self.content.push_str(&format!("<emoji:{}>", id));
                    }
                }
                _ => self.walk(children, target),
            },
        }
    }

    fn set_passive(&mut self, id: Option<String>, seq: Option<u64>) {
        if let Some(id) = id.filter(|i| !i.is_empty()) {
            self.passive_id = Some(id);
        }
        if seq.is_some() {
            self.passive_seq = seq;
        }
    }

    fn reference(&self) -> Option<MessageReference> {
        self.quote.clone().map(|message_id| MessageReference {
            message_id,
            ignore_get_message_error: Some(true),
        })
    }
}

fn first_message_id(children: &[Element]) -> Option<String> {
    children.iter().find_map(|child| match child {
        Element::Message { id, .. } => id.clone(),
        _ => None,
    })
}

/// 频道 / 私信消息：只取第一张图片，本地资源先发布为 URL
pub async fn build_guild(elements: &[Element], server: &Server) -> GuildSend {
    let draft = Draft::build(elements, Target::Guild);
    let image = match &draft.media {
        Some(media) => server
            .resources
            .normalize_src(&media.src, media.kind)
            .await
            .map(|r| r.url),
        None => None,
    };
    GuildSend {
        message_reference: draft.reference(),
        content: draft.content,
        image,
        msg_id: draft.passive_id,
    }
}

/// 群聊 / 单聊消息：至多一个媒体句柄
pub async fn build_v2(
    elements: &[Element],
    scene: Scene,
    openid: &str,
    server: &Server,
) -> ApiResult<V2Send> {
    let draft = Draft::build(elements, Target::V2(scene));
    let media = match &draft.media {
        Some(media) => upload_media(server, scene, openid, media).await?,
        None => None,
    };

    let msg_seq = draft.passive_seq.or_else(|| {
        draft
            .passive_id
            .is_some()
            .then(|| rand::rng().random_range(1..=65535))
    });

    Ok(V2Send {
        msg_type: if media.is_some() {
            MsgType::Media
        } else {
            MsgType::Text
        },
        media,
        keyboard: draft.keyboard.clone().map(|id| Keyboard { id }),
        message_reference: draft.reference(),
        msg_seq,
        msg_id: draft.passive_id,
        content: draft.content,
    })
}

fn file_type(kind: MediaKind) -> u8 {
    match kind {
        MediaKind::Image => 1,
        MediaKind::Video => 2,
        MediaKind::Audio => 3,
        MediaKind::File => 4,
    }
}

async fn upload_media(
    server: &Server,
    scene: Scene,
    openid: &str,
    media: &PendingMedia,
) -> ApiResult<Option<MediaInfo>> {
    let cache = server.media.for_kind(media.kind);
    let key = if media.cache {
        server
            .resources
            .src_key(&media.src, scene.cache_prefix())
            .await
    } else {
        None
    };

    if let Some(key) = &key
        && let Some(file_info) = cache.get(key).await?
    {
        debug!(target: "Outgoing", "命中上传缓存 {}", key);
        return Ok(Some(MediaInfo { file_info }));
    }

    let Some(resolved) = server.resources.normalize_src(&media.src, media.kind).await else {
        return Ok(None);
    };
    let body = MediaUpload {
        file_type: file_type(media.kind),
        url: resolved.url,
        srv_send_msg: false,
    };
    let uploaded = match scene {
        Scene::Group => server.api.upload_group_media(openid, &body).await?,
        Scene::C2c => server.api.upload_c2c_media(openid, &body).await?,
    };

    if let Some(key) = &key
        && !uploaded.file_info.is_empty()
        && let Err(e) = cache.put(key, &uploaded.file_info, uploaded.ttl).await
    {
        warn!(target: "Outgoing", "写入上传缓存失败: {}", e);
    }
    Ok(Some(MediaInfo {
        file_info: uploaded.file_info,
    }))
}

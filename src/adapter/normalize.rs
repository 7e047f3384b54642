//! 平台消息 -> 消息元素

use crate::element::escape::unescape;
use crate::element::{self, Attrs, Element, MediaKind};
use crate::qq::model::{Attachment, QqMessage, QqUser};
use crate::satori::User;
use regex::Regex;
use std::sync::OnceLock;

/// 消息来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 频道消息与私信
    Guild,
    /// 群聊中 @机器人
    GroupAt,
    /// 群聊中的普通消息
    Group,
    C2c,
}

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<@!?([^>\s]+)>|<#([^>\s]+)>|<emoji:(\d+)>|@everyone").expect("Invalid Regex")
    })
}

/// 渲染为消息元素
pub fn elements(message: &QqMessage, mode: Mode, self_user: Option<&User>) -> Vec<Element> {
    let mut out = Vec::new();

    if let Some(reference) = &message.message_reference
        && !reference.message_id.is_empty()
    {
        out.push(Element::quote(reference.message_id.clone()));
    }

    let mut content = message.content.as_str();
    if mode == Mode::GroupAt {
        if let Some(user) = self_user {
            out.push(Element::at(user.id.clone(), user.name.clone()));
        }
        content = content.trim_start();
    }

    parse_content(content, &message.mentions, &mut out);

    for attachment in &message.attachments {
        element::push_child(&mut out, attachment_element(attachment));
    }
    out
}

/// 渲染为消息元素的文本形式
pub fn content(message: &QqMessage, mode: Mode, self_user: Option<&User>) -> String {
    element::to_string(&elements(message, mode, self_user))
}

fn parse_content(content: &str, mentions: &[QqUser], out: &mut Vec<Element>) {
    let mut last = 0;
    for caps in mention_regex().captures_iter(content) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        element::push_child(out, vendor_text(&content[last..whole.start()]));
        last = whole.end();

        let node = if let Some(id) = caps.get(1) {
            let id = id.as_str();
            let name = mentions
                .iter()
                .find(|u| u.id == id)
                .and_then(|u| u.username.clone());
            Element::at(id, name)
        } else if let Some(id) = caps.get(2) {
            Element::sharp(id.as_str())
        } else if let Some(id) = caps.get(3) {
            let mut attrs = Attrs::new();
            attrs.insert("id".into(), id.as_str().to_string());
            Element::extension("qqguild:emoji", attrs)
        } else {
            Element::at_all()
        };
        out.push(node);
    }
    element::push_child(out, vendor_text(&content[last..]));
}

/// 平台正文中的实体先还原，序列化时再统一转义
fn vendor_text(raw: &str) -> Element {
    Element::text(unescape(raw).into_owned())
}

/// 附件按 content_type 前缀归类
pub fn attachment_element(attachment: &Attachment) -> Element {
    let content_type = attachment.content_type.as_deref().unwrap_or_default();
    let kind = if content_type.starts_with("image") {
        MediaKind::Image
    } else if content_type.starts_with("audio") || content_type.starts_with("voice") {
        MediaKind::Audio
    } else if content_type.starts_with("video") {
        MediaKind::Video
    } else {
        MediaKind::File
    };

    let mut element = Element::media(kind, ensure_scheme(&attachment.url));
    if let Element::Media {
        width,
        height,
        extra,
        ..
    } = &mut element
    {
        *width = attachment.width;
        *height = attachment.height;
        if kind == MediaKind::File
            && let Some(name) = attachment.filename.as_deref().filter(|n| !n.is_empty())
        {
            extra.insert("title".into(), name.to_string());
        }
    }
    element
}

/// 平台给出的附件地址经常缺少协议
pub fn ensure_scheme(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else if url.contains("://") || url.is_empty() {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qq::model::MessageReference;

    fn message(content: &str) -> QqMessage {
        QqMessage {
            id: "m".into(),
            content: content.into(),
            ..Default::default()
        }
    }

    #[test]
    fn guild_mentions_and_emoji() {
        let mut msg = message("<@!123> hi <#456> <emoji:4>@everyone");
        msg.mentions = vec![QqUser {
            id: "123".into(),
            username: Some("Nick".into()),
            ..Default::default()
        }];
        assert_eq!(
            content(&msg, Mode::Guild, None),
            r#"<at id="123" name="Nick"/> hi <sharp id="456"/> <qqguild:emoji id="4"/><at type="all"/>"#
        );
    }

    #[test]
    fn group_at_gets_leading_self_mention() {
        let mut msg = message(" hello");
        msg.message_reference = Some(MessageReference {
            message_id: "r1".into(),
            ignore_get_message_error: None,
        });
        let me = User {
            id: "bot".into(),
            name: Some("Bot".into()),
            ..Default::default()
        };
        assert_eq!(
            content(&msg, Mode::GroupAt, Some(&me)),
            r#"<quote id="r1"/><at id="bot" name="Bot"/>hello"#
        );
        assert_eq!(content(&msg, Mode::Group, Some(&me)), r#"<quote id="r1"/> hello"#);
    }

    #[test]
    fn attachments_become_media() {
        let mut msg = message("");
        msg.attachments = vec![
            Attachment {
                content_type: Some("image/jpeg".into()),
                url: "//gchat.qpic.cn/a.jpg".into(),
                width: Some(10),
                height: Some(20),
                ..Default::default()
            },
            Attachment {
                content_type: Some("voice".into()),
                url: "multimedia.nt.qq.com.cn/v".into(),
                ..Default::default()
            },
            Attachment {
                content_type: Some("application/zip".into()),
                url: "https://x/f.zip".into(),
                filename: Some("f.zip".into()),
                ..Default::default()
            },
        ];
        assert_eq!(
            content(&msg, Mode::C2c, None),
            concat!(
                r#"<img src="https://gchat.qpic.cn/a.jpg" width="10" height="20"/>"#,
                r#"<audio src="https://multimedia.nt.qq.com.cn/v"/>"#,
                r#"<file src="https://x/f.zip" title="f.zip"/>"#
            )
        );
    }

    #[test]
    fn markup_special_chars_are_escaped() {
        assert_eq!(content(&message("a < b & c"), Mode::Guild, None), "a &lt; b &amp; c");
    }

    #[test]
    fn vendor_entities_are_decoded_once() {
        assert_eq!(content(&message("a &lt; b"), Mode::Guild, None), "a &lt; b");
        assert_eq!(
            content(&message("&lt;@999&gt; &amp; <@1>"), Mode::Group, None),
            r#"&lt;@999&gt; &amp; <at id="1"/>"#
        );

        let parsed = element::parse(&content(&message("x &amp;lt; y"), Mode::C2c, None));
        assert_eq!(parsed, vec![Element::text("x &lt; y")]);
    }
}

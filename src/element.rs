// ============================================================================
// 消息元素
// Satori 消息内容的树形表示及其 XML 风格文本形式
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

pub mod escape;
pub mod parser;

use escape::{escape_attr, escape_text};

pub use parser::parse;

/// 扩展属性：未被识别的属性原样保留
pub type Attrs = BTreeMap<String, String>;

/// 资源元素种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    File,
}

impl MediaKind {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Image => "img",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::File => "file",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "img" | "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// 修饰元素
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Spoiler,
    Code,
    Superscript,
    Subscript,
}

impl Style {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Bold => "b",
            Self::Italic => "i",
            Self::Underline => "u",
            Self::Strikethrough => "s",
            Self::Spoiler => "spl",
            Self::Code => "code",
            Self::Superscript => "sup",
            Self::Subscript => "sub",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "b" | "strong" => Some(Self::Bold),
            "i" | "em" => Some(Self::Italic),
            "u" | "ins" => Some(Self::Underline),
            "s" | "del" => Some(Self::Strikethrough),
            "spl" => Some(Self::Spoiler),
            "code" => Some(Self::Code),
            "sup" => Some(Self::Superscript),
            "sub" => Some(Self::Subscript),
            _ => None,
        }
    }
}

/// Satori 消息元素
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// 纯文本
    Text(String),

    /// 提及用户 <at>
    At {
        id: Option<String>,
        name: Option<String>,
        role: Option<String>,
        at_type: Option<String>,
        extra: Attrs,
    },
    /// 提及频道 <sharp>
    Sharp {
        id: Option<String>,
        name: Option<String>,
        extra: Attrs,
    },
    /// 链接 <a>
    Link {
        href: String,
        children: Vec<Element>,
        extra: Attrs,
    },

    /// 资源 <img> <audio> <video> <file>
    Media {
        kind: MediaKind,
        src: String,
        cache: bool,
        timeout: Option<u64>,
        width: Option<u32>,
        height: Option<u32>,
        extra: Attrs,
    },

    /// 修饰 <b> <i> <u> <s> <spl> <code> <sup> <sub>
    Style {
        style: Style,
        children: Vec<Element>,
        extra: Attrs,
    },

    /// 换行 <br>
    Break,
    /// 段落 <p>
    Paragraph {
        children: Vec<Element>,
        extra: Attrs,
    },
    /// 消息容器 <message>
    Message {
        id: Option<String>,
        forward: bool,
        children: Vec<Element>,
        extra: Attrs,
    },
    /// 引用 <quote>
    Quote {
        id: Option<String>,
        children: Vec<Element>,
        extra: Attrs,
    },
    /// 作者 <author>
    Author {
        id: Option<String>,
        name: Option<String>,
        avatar: Option<String>,
        extra: Attrs,
    },
    /// 按钮 <button>
    Button {
        id: Option<String>,
        button_type: Option<String>,
        href: Option<String>,
        text: Option<String>,
        theme: Option<String>,
        children: Vec<Element>,
        extra: Attrs,
    },
    /// 被动消息关联 <passive>
    Passive {
        id: Option<String>,
        seq: Option<u64>,
        extra: Attrs,
    },

    /// 命名空间标签或未知标签
    Extension {
        tag: String,
        attrs: Attrs,
        children: Vec<Element>,
    },
}

/// 追加子元素，相邻文本合并、空文本丢弃
pub(crate) fn push_child(children: &mut Vec<Element>, element: Element) {
    if let Element::Text(text) = &element {
        if text.is_empty() {
            return;
        }
        if let Some(Element::Text(last)) = children.last_mut() {
            last.push_str(text);
            return;
        }
    }
    children.push(element);
}

fn take_number<T: std::str::FromStr>(attrs: &mut Attrs, key: &str) -> Option<T> {
    let parsed = attrs.get(key)?.parse::<T>().ok()?;
    attrs.remove(key);
    Some(parsed)
}

fn take_bool(attrs: &mut Attrs, key: &str) -> bool {
    match attrs.get(key).map(String::as_str) {
        Some("true") => {
            attrs.remove(key);
            true
        }
        Some("false") => {
            attrs.remove(key);
            false
        }
        _ => false,
    }
}

impl Element {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn at(id: impl Into<String>, name: Option<String>) -> Self {
        Self::At {
            id: Some(id.into()),
            name,
            role: None,
            at_type: None,
            extra: Attrs::new(),
        }
    }

    pub fn at_all() -> Self {
        Self::At {
            id: None,
            name: None,
            role: None,
            at_type: Some("all".to_string()),
            extra: Attrs::new(),
        }
    }

    pub fn sharp(id: impl Into<String>) -> Self {
        Self::Sharp {
            id: Some(id.into()),
            name: None,
            extra: Attrs::new(),
        }
    }

    pub fn media(kind: MediaKind, src: impl Into<String>) -> Self {
        Self::Media {
            kind,
            src: src.into(),
            cache: false,
            timeout: None,
            width: None,
            height: None,
            extra: Attrs::new(),
        }
    }

    pub fn quote(id: impl Into<String>) -> Self {
        Self::Quote {
            id: Some(id.into()),
            children: Vec::new(),
            extra: Attrs::new(),
        }
    }

    pub fn extension(tag: impl Into<String>, attrs: Attrs) -> Self {
        Self::Extension {
            tag: tag.into(),
            attrs,
            children: Vec::new(),
        }
    }

    /// 由标签名、属性和子元素构建元素
    pub fn from_parts(tag: &str, mut attrs: Attrs, children: Vec<Element>) -> Self {
        if let Some(kind) = MediaKind::from_tag(tag) {
            return Self::Media {
                kind,
                src: attrs.remove("src").unwrap_or_default(),
                cache: take_bool(&mut attrs, "cache"),
                timeout: take_number(&mut attrs, "timeout"),
                width: take_number(&mut attrs, "width"),
                height: take_number(&mut attrs, "height"),
                extra: attrs,
            };
        }
        if let Some(style) = Style::from_tag(tag) {
            return Self::Style {
                style,
                children,
                extra: attrs,
            };
        }
        match tag {
            "at" => Self::At {
                id: attrs.remove("id"),
                name: attrs.remove("name"),
                role: attrs.remove("role"),
                at_type: attrs.remove("type"),
                extra: attrs,
            },
            "sharp" => Self::Sharp {
                id: attrs.remove("id"),
                name: attrs.remove("name"),
                extra: attrs,
            },
            "a" => Self::Link {
                href: attrs.remove("href").unwrap_or_default(),
                children,
                extra: attrs,
            },
            "br" => Self::Break,
            "p" => Self::Paragraph {
                children,
                extra: attrs,
            },
            "message" => Self::Message {
                id: attrs.remove("id"),
                forward: take_bool(&mut attrs, "forward"),
                children,
                extra: attrs,
            },
            "quote" => Self::Quote {
                id: attrs.remove("id"),
                children,
                extra: attrs,
            },
            "author" => Self::Author {
                id: attrs.remove("id"),
                name: attrs.remove("name"),
                avatar: attrs.remove("avatar"),
                extra: attrs,
            },
            "button" => Self::Button {
                id: attrs.remove("id"),
                button_type: attrs.remove("type"),
                href: attrs.remove("href"),
                text: attrs.remove("text"),
                theme: attrs.remove("theme"),
                children,
                extra: attrs,
            },
            "passive" => Self::Passive {
                id: attrs.remove("id"),
                seq: take_number(&mut attrs, "seq"),
                extra: attrs,
            },
            _ => Self::Extension {
                tag: tag.to_string(),
                attrs,
                children,
            },
        }
    }

    /// 标签名，纯文本返回 None
    pub fn tag(&self) -> Option<&str> {
        Some(match self {
            Self::Text(_) => return None,
            Self::At { .. } => "at",
            Self::Sharp { .. } => "sharp",
            Self::Link { .. } => "a",
            Self::Media { kind, .. } => kind.tag(),
            Self::Style { style, .. } => style.tag(),
            Self::Break => "br",
            Self::Paragraph { .. } => "p",
            Self::Message { .. } => "message",
            Self::Quote { .. } => "quote",
            Self::Author { .. } => "author",
            Self::Button { .. } => "button",
            Self::Passive { .. } => "passive",
            Self::Extension { tag, .. } => tag,
        })
    }

    /// 子元素（叶子元素为空切片）
    pub fn children(&self) -> &[Element] {
        match self {
            Self::Link { children, .. }
            | Self::Style { children, .. }
            | Self::Paragraph { children, .. }
            | Self::Message { children, .. }
            | Self::Quote { children, .. }
            | Self::Button { children, .. }
            | Self::Extension { children, .. } => children,
            _ => &[],
        }
    }

    /// 扩展属性（或扩展节点的全部属性）
    pub fn attrs(&self) -> Option<&Attrs> {
        match self {
            Self::Text(_) | Self::Break => None,
            Self::At { extra, .. }
            | Self::Sharp { extra, .. }
            | Self::Link { extra, .. }
            | Self::Media { extra, .. }
            | Self::Style { extra, .. }
            | Self::Paragraph { extra, .. }
            | Self::Message { extra, .. }
            | Self::Quote { extra, .. }
            | Self::Author { extra, .. }
            | Self::Button { extra, .. }
            | Self::Passive { extra, .. } => Some(extra),
            Self::Extension { attrs, .. } => Some(attrs),
        }
    }

    /// 已识别属性，按固定顺序输出
    fn named_attrs(&self) -> Vec<(&'static str, AttrOut<'_>)> {
        let mut out = Vec::new();
        match self {
            Self::At {
                id,
                name,
                role,
                at_type,
                ..
            } => {
                for (k, v) in [opt("id", id), opt("name", name), opt("role", role), opt("type", at_type)]
                    .into_iter()
                    .flatten()
                {
                    out.push((k, AttrOut::Str(v)));
                }
            }
            Self::Sharp { id, name, .. } => {
                for (k, v) in [opt("id", id), opt("name", name)].into_iter().flatten() {
                    out.push((k, AttrOut::Str(v)));
                }
            }
            Self::Link { href, .. } => out.push(("href", AttrOut::Str(href))),
            Self::Media {
                src,
                cache,
                timeout,
                width,
                height,
                ..
            } => {
                out.push(("src", AttrOut::Str(src)));
                if *cache {
                    out.push(("cache", AttrOut::Flag));
                }
                if let Some(v) = timeout {
                    out.push(("timeout", AttrOut::Owned(v.to_string())));
                }
                if let Some(v) = width {
                    out.push(("width", AttrOut::Owned(v.to_string())));
                }
                if let Some(v) = height {
                    out.push(("height", AttrOut::Owned(v.to_string())));
                }
            }
            Self::Message { id, forward, .. } => {
                if let Some(v) = id {
                    out.push(("id", AttrOut::Str(v)));
                }
                if *forward {
                    out.push(("forward", AttrOut::Flag));
                }
            }
            Self::Quote { id, .. } => {
                if let Some(v) = id {
                    out.push(("id", AttrOut::Str(v)));
                }
            }
            Self::Author {
                id, name, avatar, ..
            } => {
                for (k, v) in [opt("id", id), opt("name", name), opt("avatar", avatar)]
                    .into_iter()
                    .flatten()
                {
                    out.push((k, AttrOut::Str(v)));
                }
            }
            Self::Button {
                id,
                button_type,
                href,
                text,
                theme,
                ..
            } => {
                for (k, v) in [
                    opt("id", id),
                    opt("type", button_type),
                    opt("href", href),
                    opt("text", text),
                    opt("theme", theme),
                ]
                .into_iter()
                .flatten()
                {
                    out.push((k, AttrOut::Str(v)));
                }
            }
            Self::Passive { id, seq, .. } => {
                if let Some(v) = id {
                    out.push(("id", AttrOut::Str(v)));
                }
                if let Some(v) = seq {
                    out.push(("seq", AttrOut::Owned(v.to_string())));
                }
            }
            _ => {}
        }
        out
    }
}

fn opt<'a>(key: &'static str, value: &'a Option<String>) -> Option<(&'static str, &'a str)> {
    value.as_deref().map(|v| (key, v))
}

enum AttrOut<'a> {
    Str(&'a str),
    Owned(String),
    Flag,
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(tag) = self.tag() else {
            if let Self::Text(text) = self {
                return f.write_str(&escape_text(text));
            }
            return Ok(());
        };

        write!(f, "<{}", tag)?;
        for (key, value) in self.named_attrs() {
            match value {
                AttrOut::Str(v) => write!(f, " {}=\"{}\"", key, escape_attr(v))?,
                AttrOut::Owned(v) => write!(f, " {}=\"{}\"", key, escape_attr(&v))?,
                AttrOut::Flag => write!(f, " {}", key)?,
            }
        }
        if let Some(extra) = self.attrs() {
            for (key, value) in extra {
                write!(f, " {}=\"{}\"", key, escape_attr(value))?;
            }
        }

        let children = self.children();
        if children.is_empty() {
            return f.write_str("/>");
        }
        f.write_str(">")?;
        for child in children {
            write!(f, "{}", child)?;
        }
        write!(f, "</{}>", tag)
    }
}

/// 元素列表转回文本形式
pub fn to_string(elements: &[Element]) -> String {
    let mut out = String::new();
    for element in elements {
        out.push_str(&element.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_at_round_trip_is_byte_exact() {
        let source = r#"<quote><message id="m1"/></quote><at id="u1" name="Nick"/>hello"#;
        let elements = parse(source);
        assert_eq!(elements.len(), 3);
        assert_eq!(to_string(&elements), source);
    }

    #[test]
    fn parse_of_serialized_tree_is_identity() {
        let mut extra = Attrs::new();
        extra.insert("data-x".into(), "a\"b<c>&".into());
        let tree = vec![
            Element::text("line 1 < 2 & \"q\""),
            Element::Break,
            Element::Paragraph {
                children: vec![
                    Element::Style {
                        style: Style::Bold,
                        children: vec![Element::text("bold")],
                        extra: Attrs::new(),
                    },
                    Element::sharp("c1"),
                ],
                extra: Attrs::new(),
            },
            Element::Media {
                kind: MediaKind::Video,
                src: "file:///tmp/a%20b.mp4".into(),
                cache: true,
                timeout: Some(30),
                width: None,
                height: Some(240),
                extra,
            },
            Element::Button {
                id: Some("b1".into()),
                button_type: Some("action".into()),
                href: None,
                text: None,
                theme: Some("primary".into()),
                children: vec![Element::text("Click")],
                extra: Attrs::new(),
            },
            Element::Passive {
                id: Some("ev".into()),
                seq: Some(3),
                extra: Attrs::new(),
            },
            Element::Extension {
                tag: "qq:markdown".into(),
                attrs: Attrs::from([("template".to_string(), "t1".to_string())]),
                children: vec![Element::text("**md**"), Element::at_all()],
            },
        ];

        let text = to_string(&tree);
        assert_eq!(parse(&text), tree);
    }

    #[test]
    fn aliases_normalize_to_canonical_tags() {
        let elements = parse("<strong>x</strong><image src=\"u\"/>");
        assert_eq!(to_string(&elements), "<b>x</b><img src=\"u\"/>");
    }

    #[test]
    fn unknown_attributes_survive_on_known_tags() {
        let source = r#"<at id="1" foo="bar"/>"#;
        assert_eq!(to_string(&parse(source)), source);
    }
}

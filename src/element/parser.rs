//! 消息元素文本形式的容错解析器
//!
//! 单次正则扫描得到文本与标签流，再用栈折叠成树。
//! 结束标签与栈顶不匹配时，把中间未闭合的开始标签按原文退化为文本，
//! 它们已收集的子元素上移到外层。任何输入都能解析，不会报错。

use super::escape::unescape;
use super::{Attrs, Element, push_child};
use regex::Regex;
use std::sync::OnceLock;

static TAG_REGEX: OnceLock<Regex> = OnceLock::new();
static ATTR_REGEX: OnceLock<Regex> = OnceLock::new();

fn tag_regex() -> &'static Regex {
    TAG_REGEX.get_or_init(|| {
        Regex::new(r#"(?s)<!--.*?-->|<(/?)([^!\s>/]+)([^>]*?)\s*(/?)>"#).expect("Invalid Regex")
    })
}

fn attr_regex() -> &'static Regex {
    ATTR_REGEX.get_or_init(|| {
        Regex::new(r#"([^\s=]+)(?:="([^"]*)"|='([^']*)')?"#).expect("Invalid Regex")
    })
}

#[derive(Debug)]
enum Token<'a> {
    Text(&'a str),
    Tag {
        source: &'a str,
        name: &'a str,
        close: bool,
        empty: bool,
        attrs: Attrs,
    },
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut last = 0;

    for caps in tag_regex().captures_iter(source) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            tokens.push(Token::Text(&source[last..whole.start()]));
        }
        last = whole.end();

        // 注释整段丢弃
        let Some(name) = caps.get(2) else { continue };

        tokens.push(Token::Tag {
            source: whole.as_str(),
            name: name.as_str(),
            close: caps.get(1).is_some_and(|m| !m.as_str().is_empty()),
            empty: caps.get(4).is_some_and(|m| !m.as_str().is_empty()),
            attrs: parse_attrs(caps.get(3).map(|m| m.as_str()).unwrap_or("")),
        });
    }

    if last < source.len() {
        tokens.push(Token::Text(&source[last..]));
    }
    tokens
}

/// `name="v"` / `name='v'` / `name` / `no-name`
fn parse_attrs(raw: &str) -> Attrs {
    let mut attrs = Attrs::new();
    for caps in attr_regex().captures_iter(raw) {
        let Some(key) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        match caps.get(2).or_else(|| caps.get(3)) {
            Some(value) => {
                attrs.insert(key.to_string(), unescape(value.as_str()).into_owned());
            }
            None => match key.strip_prefix("no-") {
                Some(stripped) if !stripped.is_empty() => {
                    attrs.insert(stripped.to_string(), "false".to_string());
                }
                _ => {
                    attrs.insert(key.to_string(), "true".to_string());
                }
            },
        }
    }
    attrs
}

struct Frame<'a> {
    name: &'a str,
    source: &'a str,
    attrs: Attrs,
    children: Vec<Element>,
}

/// 把栈顶以上 `depth` 个帧退化为文本
fn rollback(stack: &mut Vec<Frame<'_>>, depth: usize) {
    for _ in 0..depth {
        let Some(frame) = stack.pop() else { return };
        let Some(parent) = stack.last_mut() else { return };
        push_child(&mut parent.children, Element::Text(frame.source.to_string()));
        for child in frame.children {
            push_child(&mut parent.children, child);
        }
    }
}

pub fn parse(source: &str) -> Vec<Element> {
    let mut stack = vec![Frame {
        name: "",
        source: "",
        attrs: Attrs::new(),
        children: Vec::new(),
    }];

    for token in tokenize(source) {
        match token {
            Token::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    push_child(&mut top.children, Element::Text(unescape(text).into_owned()));
                }
            }
            Token::Tag {
                source,
                name,
                close: true,
                ..
            } => {
                // 自栈顶向下寻找同名开始标签（不含根帧）
                let found = stack.iter().skip(1).rposition(|f| f.name == name);
                match found {
                    None => {
                        if let Some(top) = stack.last_mut() {
                            push_child(&mut top.children, Element::Text(source.to_string()));
                        }
                    }
                    Some(pos) => {
                        let index = pos + 1;
                        let depth = stack.len() - 1 - index;
                        rollback(&mut stack, depth);
                        if let Some(frame) = stack.pop() {
                            let element = Element::from_parts(frame.name, frame.attrs, frame.children);
                            if let Some(parent) = stack.last_mut() {
                                push_child(&mut parent.children, element);
                            }
                        }
                    }
                }
            }
            Token::Tag {
                source,
                name,
                empty,
                attrs,
                ..
            } => {
                if empty {
                    let element = Element::from_parts(name, attrs, Vec::new());
                    if let Some(top) = stack.last_mut() {
                        push_child(&mut top.children, element);
                    }
                } else {
                    stack.push(Frame {
                        name,
                        source,
                        attrs,
                        children: Vec::new(),
                    });
                }
            }
        }
    }

    let depth = stack.len() - 1;
    rollback(&mut stack, depth);
    stack.pop().map(|root| root.children).unwrap_or_default()
}

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;

/// 正文转义：& < >
pub fn escape_text(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// 属性值转义：& < > "
pub fn escape_attr(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

static ENTITY_REGEX: OnceLock<Regex> = OnceLock::new();

fn entity_regex() -> &'static Regex {
    ENTITY_REGEX.get_or_init(|| {
        Regex::new(r"&(?:#(\d+)|#[xX]([0-9a-fA-F]+)|(quot|lt|gt|amp|apos));").expect("Invalid Regex")
    })
}

/// 反转义命名实体与数字字符引用，无法识别的保持原样
pub fn unescape(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    entity_regex().replace_all(s, |caps: &Captures| {
        let decoded = if let Some(dec) = caps.get(1) {
            dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
        } else if let Some(hex) = caps.get(2) {
            u32::from_str_radix(hex.as_str(), 16).ok().and_then(char::from_u32)
        } else {
            match caps.get(3).map(|m| m.as_str()) {
                Some("quot") => Some('"'),
                Some("lt") => Some('<'),
                Some("gt") => Some('>'),
                Some("amp") => Some('&'),
                Some("apos") => Some('\''),
                _ => None,
            }
        };
        match decoded {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_keeps_quotes() {
        assert_eq!(escape_text(r#"a<b>&"c""#), r#"a&lt;b&gt;&amp;"c""#);
        assert!(matches!(escape_text("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn attr_escapes_quotes() {
        assert_eq!(escape_attr(r#"say "hi" & <bye>"#), "say &quot;hi&quot; &amp; &lt;bye&gt;");
    }

    #[test]
    fn unescape_handles_numeric_references() {
        assert_eq!(unescape("&#60;&#x3E;&amp;&apos;&quot;"), "<>&'\"");
        assert_eq!(unescape("&unknown; &#xZZ;"), "&unknown; &#xZZ;");
    }

    #[test]
    fn escape_then_unescape_is_identity() {
        let raw = r#"<a href="x">&amp;</a>"#;
        assert_eq!(unescape(&escape_attr(raw)), raw);
        assert_eq!(unescape(&escape_text(raw)), raw);
    }
}

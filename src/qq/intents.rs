use crate::warn;

/// 事件订阅位
pub const INTENTS: &[(&str, u32)] = &[
    ("GUILDS", 1 << 0),
    ("GUILD_MEMBERS", 1 << 1),
    ("GUILD_MESSAGES", 1 << 9),
    ("GUILD_MESSAGE_REACTIONS", 1 << 10),
    ("DIRECT_MESSAGE", 1 << 12),
    ("GROUP_AND_C2C_EVENT", 1 << 25),
    ("INTERACTION", 1 << 26),
    ("MESSAGE_AUDIT", 1 << 27),
    ("FORUMS_EVENT", 1 << 28),
    ("AUDIO_ACTION", 1 << 29),
    ("PUBLIC_GUILD_MESSAGES", 1 << 30),
];

pub fn bit(name: &str) -> Option<u32> {
    let name = name.trim();
    INTENTS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, bit)| *bit)
}

/// 把配置中的名称列表合成为位掩码，未知名称跳过
pub fn parse<S: AsRef<str>>(names: &[S]) -> u32 {
    names.iter().fold(0, |acc, name| match bit(name.as_ref()) {
        Some(b) => acc | b,
        None => {
            warn!(target: "Gateway", "未知的 intent: {}，已忽略", name.as_ref());
            acc
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_fold_into_mask() {
        assert_eq!(parse(&["GUILDS", "GUILD_MEMBERS"]), 0b11);
        assert_eq!(parse(&["public_guild_messages"]), 1 << 30);
        assert_eq!(parse(&["GROUP_AND_C2C_EVENT", "NOPE"]), 1 << 25);
        assert_eq!(parse::<&str>(&[]), 0);
    }
}

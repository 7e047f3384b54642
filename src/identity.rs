use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// openid 所属的会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenIdKind {
    Group,
    Private,
}

impl OpenIdKind {
    /// 媒体缓存键前缀
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Private => "private",
        }
    }
}

/// 进程内短期身份映射，不落盘
#[derive(Default)]
pub struct IdentityMaps {
    // 私信频道 -> 私信所在的 guild
    direct_guilds: Mutex<HashMap<String, String>>,
    // openid -> group / private
    openids: Mutex<HashMap<String, OpenIdKind>>,
}

impl IdentityMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_direct(&self, channel_id: &str, guild_id: &str) {
        if channel_id.is_empty() || guild_id.is_empty() {
            return;
        }
        self.direct_guilds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel_id.to_string(), guild_id.to_string());
    }

    pub fn direct_guild(&self, channel_id: &str) -> Option<String> {
        self.direct_guilds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel_id)
            .cloned()
    }

    pub fn record_openid(&self, openid: &str, kind: OpenIdKind) {
        if openid.is_empty() {
            return;
        }
        self.openids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(openid.to_string(), kind);
    }

    pub fn openid_kind(&self, openid: &str) -> Option<OpenIdKind> {
        self.openids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(openid)
            .copied()
    }

    /// 已知的群 openid
    pub fn groups(&self) -> Vec<String> {
        let guard = self.openids.lock().unwrap_or_else(PoisonError::into_inner);
        let mut groups: Vec<String> = guard
            .iter()
            .filter(|(_, kind)| **kind == OpenIdKind::Group)
            .map(|(id, _)| id.clone())
            .collect();
        groups.sort();
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_record_overrides_kind() {
        let maps = IdentityMaps::new();
        maps.record_openid("A", OpenIdKind::Private);
        maps.record_openid("A", OpenIdKind::Group);
        maps.record_openid("B", OpenIdKind::Group);
        maps.record_openid("", OpenIdKind::Group);

        assert_eq!(maps.openid_kind("A"), Some(OpenIdKind::Group));
        assert_eq!(maps.openid_kind("missing"), None);
        assert_eq!(maps.groups(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn direct_channel_maps_to_guild() {
        let maps = IdentityMaps::new();
        maps.record_direct("dm-1", "guild-9");
        assert_eq!(maps.direct_guild("dm-1").as_deref(), Some("guild-9"));
        assert_eq!(maps.direct_guild("dm-2"), None);
    }
}

//! 开放平台媒体句柄缓存
//!
//! 键为 `<频道类型>:<sha256>`，值为上传后拿到的 file_info。
//! 图片、音频、视频各用一个库，互不影响各自的 TTL。

use super::{ensure_table, open_sqlite};
use crate::debug;
use crate::element::MediaKind;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, DatabaseConnection, DbErr, EntityTrait};
use std::path::Path;

mod entity {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "media_cache")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub cache_key: String,
        pub file_info: String,
        pub ttl: i64,
        pub saved_at: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// 缓存条目；ttl 为 0 表示永久
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub file_info: String,
    pub ttl: i64,
    pub saved_at: i64,
}

impl CacheEntry {
    pub fn new(file_info: impl Into<String>, ttl: i64) -> Self {
        Self {
            file_info: file_info.into(),
            ttl,
            saved_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.ttl > 0 && now >= self.saved_at + self.ttl
    }
}

pub struct MediaCache {
    name: &'static str,
    db: DatabaseConnection,
}

impl MediaCache {
    pub async fn open(path: &Path, name: &'static str) -> anyhow::Result<Self> {
        let db = open_sqlite(path).await?;
        ensure_table(&db, entity::Entity).await?;
        Ok(Self { name, db })
    }

    /// 读取缓存；过期条目在读取时删除
    pub async fn get(&self, key: &str) -> Result<Option<String>, DbErr> {
        let Some(row) = entity::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let entry = CacheEntry {
            file_info: row.file_info,
            ttl: row.ttl,
            saved_at: row.saved_at,
        };
        if entry.is_expired(chrono::Utc::now().timestamp()) {
            debug!(target: "Cache", "[{}] {} 已过期，删除", self.name, key);
            entity::Entity::delete_by_id(key.to_string())
                .exec(&self.db)
                .await?;
            return Ok(None);
        }
        Ok(Some(entry.file_info))
    }

    pub async fn put(&self, key: &str, file_info: &str, ttl: i64) -> Result<(), DbErr> {
        self.insert(key, CacheEntry::new(file_info, ttl)).await
    }

    pub async fn insert(&self, key: &str, entry: CacheEntry) -> Result<(), DbErr> {
        let model = entity::ActiveModel {
            cache_key: Set(key.to_string()),
            file_info: Set(entry.file_info),
            ttl: Set(entry.ttl),
            saved_at: Set(entry.saved_at),
        };
        entity::Entity::insert(model)
            .on_conflict(
                OnConflict::column(entity::Column::CacheKey)
                    .update_columns([
                        entity::Column::FileInfo,
                        entity::Column::Ttl,
                        entity::Column::SavedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        debug!(target: "Cache", "[{}] 写入 {}", self.name, key);
        Ok(())
    }
}

/// 三类媒体缓存
pub struct MediaCaches {
    pub image: MediaCache,
    pub audio: MediaCache,
    pub video: MediaCache,
}

impl MediaCaches {
    /// 在 data 目录下打开 image.db / audio.db / video.db
    pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            image: MediaCache::open(&data_dir.join("image.db"), "image").await?,
            audio: MediaCache::open(&data_dir.join("audio.db"), "audio").await?,
            video: MediaCache::open(&data_dir.join("video.db"), "video").await?,
        })
    }

    /// 文件与图片共用一个库
    pub fn for_kind(&self, kind: MediaKind) -> &MediaCache {
        match kind {
            MediaKind::Image | MediaKind::File => &self.image,
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::open(&dir.path().join("image.db"), "image")
            .await
            .unwrap();

        cache.put("group:abc", "handle-1", 3600).await.unwrap();
        assert_eq!(cache.get("group:abc").await.unwrap().as_deref(), Some("handle-1"));

        cache.put("group:abc", "handle-2", 0).await.unwrap();
        assert_eq!(cache.get("group:abc").await.unwrap().as_deref(), Some("handle-2"));
        assert_eq!(cache.get("private:abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::open(&dir.path().join("audio.db"), "audio")
            .await
            .unwrap();
        let now = chrono::Utc::now().timestamp();

        cache
            .insert(
                "group:old",
                CacheEntry {
                    file_info: "stale".into(),
                    ttl: 10,
                    saved_at: now - 60,
                },
            )
            .await
            .unwrap();
        cache
            .insert(
                "group:forever",
                CacheEntry {
                    file_info: "kept".into(),
                    ttl: 0,
                    saved_at: 0,
                },
            )
            .await
            .unwrap();

        assert_eq!(cache.get("group:old").await.unwrap(), None);
        assert!(
            entity::Entity::find_by_id("group:old".to_string())
                .one(&cache.db)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(cache.get("group:forever").await.unwrap().as_deref(), Some("kept"));
    }

    #[test]
    fn expiry_boundary() {
        let entry = CacheEntry {
            file_info: String::new(),
            ttl: 5,
            saved_at: 100,
        };
        assert!(!entry.is_expired(104));
        assert!(entry.is_expired(105));
    }
}

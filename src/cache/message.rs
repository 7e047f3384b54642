//! 本地消息记录
//!
//! 群聊与单聊接口没有历史消息查询能力，message.get / message.list 依赖这里。

use super::{ensure_table, open_sqlite};
use crate::satori::{BidiPagedList, Channel, ChannelType, Guild, Message, User};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use std::path::Path;

mod entity {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "messages")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub channel_id: String,
        pub channel_type: i32,
        pub message_id: String,
        pub guild_id: Option<String>,
        pub user_id: Option<String>,
        pub user_name: Option<String>,
        pub content: String,
        pub created_at: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

use entity::{Column, Entity as MessageEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListDirection {
    #[default]
    Before,
    After,
    Around,
}

impl ListDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "before" => Some(Self::Before),
            "after" => Some(Self::After),
            "around" => Some(Self::Around),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
    #[default]
    Asc,
    Desc,
}

impl ListOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

pub struct MessageStore {
    db: DatabaseConnection,
    // 每个频道保留的条数
    limit: u64,
}

impl MessageStore {
    pub async fn open(path: &Path, limit: u64) -> anyhow::Result<Self> {
        let db = open_sqlite(path).await?;
        ensure_table(&db, MessageEntity).await?;
        Ok(Self {
            db,
            limit: limit.max(1),
        })
    }

    /// 记录一条消息，并裁剪该频道超出上限的旧消息
    pub async fn record(&self, message: &Message) -> Result<(), DbErr> {
        let Some(channel) = &message.channel else {
            return Ok(());
        };

        let model = entity::ActiveModel {
            channel_id: Set(channel.id.clone()),
            channel_type: Set(u8::from(channel.channel_type) as i32),
            message_id: Set(message.id.clone()),
            guild_id: Set(message.guild.as_ref().map(|g| g.id.clone())),
            user_id: Set(message.user.as_ref().map(|u| u.id.clone())),
            user_name: Set(message.user.as_ref().and_then(|u| u.name.clone())),
            content: Set(message.content.clone()),
            created_at: Set(message
                .created_at
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())),
            ..Default::default()
        };
        MessageEntity::insert(model).exec(&self.db).await?;

        // 找到第 limit+1 新的记录，删除它及更旧的
        let boundary = MessageEntity::find()
            .filter(Column::ChannelId.eq(channel.id.as_str()))
            .order_by_desc(Column::Id)
            .offset(self.limit)
            .one(&self.db)
            .await?;
        if let Some(row) = boundary {
            MessageEntity::delete_many()
                .filter(Column::ChannelId.eq(channel.id.as_str()))
                .filter(Column::Id.lte(row.id))
                .exec(&self.db)
                .await?;
        }
        Ok(())
    }

    pub async fn get(&self, channel_id: &str, message_id: &str) -> Result<Option<Message>, DbErr> {
        let row = MessageEntity::find()
            .filter(Column::ChannelId.eq(channel_id))
            .filter(Column::MessageId.eq(message_id))
            .order_by_desc(Column::Id)
            .one(&self.db)
            .await?;
        Ok(row.map(to_message))
    }

    /// 以消息 ID 为游标分页
    pub async fn list(
        &self,
        channel_id: &str,
        cursor: Option<&str>,
        direction: ListDirection,
        limit: u64,
        order: ListOrder,
    ) -> Result<BidiPagedList<Message>, DbErr> {
        let limit = limit.clamp(1, 100);

        let anchor = match cursor.filter(|c| !c.is_empty()) {
            Some(message_id) => MessageEntity::find()
                .filter(Column::ChannelId.eq(channel_id))
                .filter(Column::MessageId.eq(message_id))
                .one(&self.db)
                .await?
                .map(|row| row.id),
            None => None,
        };

        let mut rows = match (direction, anchor) {
            (ListDirection::After, Some(id)) => self.newer(channel_id, id, limit).await?,
            (ListDirection::Around, Some(id)) => {
                let half = (limit / 2).max(1);
                let mut rows = self.older(channel_id, Some(id + 1), half).await?;
                rows.extend(self.newer(channel_id, id, limit.saturating_sub(half)).await?);
                rows
            }
            (ListDirection::Before, anchor) => self.older(channel_id, anchor, limit).await?,
            // 无游标时 after / around 退化为最新消息
            (_, None) => self.older(channel_id, None, limit).await?,
        };

        let prev = match rows.first() {
            Some(first) if self.count_older(channel_id, first.id).await? > 0 => {
                Some(first.message_id.clone())
            }
            _ => None,
        };
        let next = match rows.last() {
            Some(last) if self.count_newer(channel_id, last.id).await? > 0 => {
                Some(last.message_id.clone())
            }
            _ => None,
        };

        if order == ListOrder::Desc {
            rows.reverse();
        }
        Ok(BidiPagedList {
            data: rows.into_iter().map(to_message).collect(),
            prev,
            next,
        })
    }

    /// id 小于 `before` 的最新 limit 条，按时间升序
    async fn older(
        &self,
        channel_id: &str,
        before: Option<i64>,
        limit: u64,
    ) -> Result<Vec<entity::Model>, DbErr> {
        let mut query = MessageEntity::find().filter(Column::ChannelId.eq(channel_id));
        if let Some(id) = before {
            query = query.filter(Column::Id.lt(id));
        }
        let mut rows = query
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        rows.reverse();
        Ok(rows)
    }

    async fn newer(
        &self,
        channel_id: &str,
        after: i64,
        limit: u64,
    ) -> Result<Vec<entity::Model>, DbErr> {
        MessageEntity::find()
            .filter(Column::ChannelId.eq(channel_id))
            .filter(Column::Id.gt(after))
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
    }

    async fn count_older(&self, channel_id: &str, id: i64) -> Result<u64, DbErr> {
        MessageEntity::find()
            .filter(Column::ChannelId.eq(channel_id))
            .filter(Column::Id.lt(id))
            .count(&self.db)
            .await
    }

    async fn count_newer(&self, channel_id: &str, id: i64) -> Result<u64, DbErr> {
        MessageEntity::find()
            .filter(Column::ChannelId.eq(channel_id))
            .filter(Column::Id.gt(id))
            .count(&self.db)
            .await
    }
}

fn to_message(row: entity::Model) -> Message {
    let channel_type = u8::try_from(row.channel_type)
        .ok()
        .and_then(|v| ChannelType::try_from(v).ok())
        .unwrap_or_default();
    Message {
        id: row.message_id,
        content: row.content,
        channel: Some(Channel::new(row.channel_id, channel_type)),
        guild: row.guild_id.map(Guild::new),
        user: row.user_id.map(|id| User {
            id,
            name: row.user_name,
            ..Default::default()
        }),
        created_at: Some(row.created_at),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(channel: &str, id: &str) -> Message {
        Message {
            id: id.to_string(),
            content: format!("content {}", id),
            channel: Some(Channel::new(channel, ChannelType::Text)),
            user: Some(User::new("u1")),
            created_at: Some(1),
            ..Default::default()
        }
    }

    async fn store(limit: u64) -> (tempfile::TempDir, MessageStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::open(&dir.path().join("cache/message.db"), limit)
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn record_trims_per_channel() {
        let (_dir, store) = store(3).await;
        for i in 1..=5 {
            store.record(&message("G1", &format!("m{}", i))).await.unwrap();
        }
        store.record(&message("G2", "other")).await.unwrap();

        assert!(store.get("G1", "m2").await.unwrap().is_none());
        let kept = store.get("G1", "m3").await.unwrap().unwrap();
        assert_eq!(kept.content, "content m3");
        assert!(store.get("G2", "other").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_pages_backwards_from_latest() {
        let (_dir, store) = store(100).await;
        for i in 1..=6 {
            store.record(&message("G1", &format!("m{}", i))).await.unwrap();
        }

        let page = store
            .list("G1", None, ListDirection::Before, 2, ListOrder::Asc)
            .await
            .unwrap();
        let ids: Vec<&str> = page.data.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m5", "m6"]);
        assert_eq!(page.prev.as_deref(), Some("m5"));
        assert_eq!(page.next, None);

        let older = store
            .list("G1", page.prev.as_deref(), ListDirection::Before, 2, ListOrder::Desc)
            .await
            .unwrap();
        let ids: Vec<&str> = older.data.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m4", "m3"]);
        assert_eq!(older.next.as_deref(), Some("m4"));

        let newer = store
            .list("G1", Some("m2"), ListDirection::After, 10, ListOrder::Asc)
            .await
            .unwrap();
        assert_eq!(newer.data.len(), 4);
        assert_eq!(newer.next, None);
    }
}

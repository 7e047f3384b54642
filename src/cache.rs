use anyhow::Context as _;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use std::path::Path;
use tokio::fs;

use crate::info;

pub mod media;
pub mod message;

pub use media::{CacheEntry, MediaCache, MediaCaches};
pub use message::{ListDirection, ListOrder, MessageStore};

/// 打开（必要时创建）一个 sqlite 文件
pub async fn open_sqlite(path: &Path) -> anyhow::Result<DatabaseConnection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("创建目录失败: {}", parent.display()))?;
    }

    // mode=rwc 允许 读/写/创建
    let db_url = format!("sqlite:{}?mode=rwc", path.display());
    let db = Database::connect(&db_url)
        .await
        .with_context(|| format!("连接数据库失败: {}", db_url))?;

    info!(target: "Database", "连接成功: {}", db_url);
    Ok(db)
}

/// 按实体结构建表
pub(crate) async fn ensure_table<E: EntityTrait>(
    db: &DatabaseConnection,
    entity: E,
) -> anyhow::Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut create_table_stmt = schema.create_table_from_entity(entity);
    create_table_stmt.if_not_exists();

    db.execute(builder.build(&create_table_stmt))
        .await
        .context("初始化数据表失败")?;
    Ok(())
}

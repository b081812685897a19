// ==========================================
// 精酿生产管理系统 - 生产批次数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: batch.status 为派生字段,只有状态派生引擎允许改写
// ==========================================

use crate::domain::batch::Batch;
use crate::domain::types::BatchStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

const DT_FMT: &str = "%Y-%m-%d %H:%M:%S";

fn parse_dt(idx: usize, s: String) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&s, DT_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ==========================================
// BatchRepository - 生产批次仓储
// ==========================================
pub struct BatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchRepository {
    const COLUMNS: &'static str =
        "batch_id, tenant_id, batch_code, recipe_name, status, created_at, updated_at";

    /// 创建新的BatchRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建批次
    pub fn create(&self, batch: &Batch) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::create_in(&conn, batch)
    }

    /// 创建批次 (事务内形态)
    pub fn create_in(conn: &Connection, batch: &Batch) -> RepositoryResult<String> {
        conn.execute(
            r#"INSERT INTO batch (
                batch_id, tenant_id, batch_code, recipe_name, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &batch.batch_id,
                &batch.tenant_id,
                &batch.batch_code,
                &batch.recipe_name,
                batch.status.to_db_str(),
                &batch.created_at.format(DT_FMT).to_string(),
                &batch.updated_at.format(DT_FMT).to_string(),
            ],
        )?;

        Ok(batch.batch_id.clone())
    }

    /// 按batch_id查询批次
    pub fn find_by_id(&self, tenant_id: &str, batch_id: &str) -> RepositoryResult<Option<Batch>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, tenant_id, batch_id)
    }

    /// 按batch_id查询批次 (事务内形态)
    pub fn find_by_id_in(
        conn: &Connection,
        tenant_id: &str,
        batch_id: &str,
    ) -> RepositoryResult<Option<Batch>> {
        let sql = format!(
            "SELECT {} FROM batch WHERE tenant_id = ? AND batch_id = ?",
            Self::COLUMNS
        );
        match conn.query_row(&sql, params![tenant_id, batch_id], Self::map_row) {
            Ok(batch) => Ok(Some(batch)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 改写批次的派生状态
    pub fn update_status_in(
        conn: &Connection,
        tenant_id: &str,
        batch_id: &str,
        status: BatchStatus,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE batch SET status = ?, updated_at = ? WHERE tenant_id = ? AND batch_id = ?",
            params![
                status.to_db_str(),
                updated_at.format(DT_FMT).to_string(),
                tenant_id,
                batch_id,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Batch".to_string(),
                id: batch_id.to_string(),
            });
        }
        Ok(())
    }

    /// 映射数据库行到Batch对象
    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Batch> {
        let status_str: String = row.get(4)?;
        let status = BatchStatus::from_db_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("无效的批次状态: {}", status_str).into(),
            )
        })?;

        Ok(Batch {
            batch_id: row.get(0)?,
            tenant_id: row.get(1)?,
            batch_code: row.get(2)?,
            recipe_name: row.get(3)?,
            status,
            created_at: parse_dt(5, row.get::<_, String>(5)?)?,
            updated_at: parse_dt(6, row.get::<_, String>(6)?)?,
        })
    }
}

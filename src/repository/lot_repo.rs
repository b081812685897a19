// ==========================================
// 精酿生产管理系统 - 酒液单元数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 约束: 所有查询使用参数化,防止 SQL 注入
// 说明: 每个读写原语提供两种形态:
//   - 实例方法: 自行加锁,适用于单条操作
//   - *_in 关联函数: 借用调用方持有的连接,适用于事务内组合
//     (rusqlite::Transaction 解引用为 Connection)
// ==========================================

use crate::domain::lot::{Lot, LotBatch};
use crate::domain::types::{LotPhase, LotStatus};
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

fn parse_phase(idx: usize, s: &str) -> rusqlite::Result<LotPhase> {
    LotPhase::from_db_str(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("无效的工艺阶段: {}", s).into(),
        )
    })
}

fn parse_status(idx: usize, s: &str) -> rusqlite::Result<LotStatus> {
    LotStatus::from_db_str(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("无效的单元状态: {}", s).into(),
        )
    })
}

// ==========================================
// LotRepository - 酒液单元仓储
// ==========================================
pub struct LotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LotRepository {
    const COLUMNS: &'static str = "lot_id, tenant_id, lot_code, phase, status, \
         planned_volume_l, parent_lot_id, is_blend_target, blended_at, created_at, updated_at";

    /// 创建新的LotRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建酒液单元
    pub fn create(&self, lot: &Lot) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::create_in(&conn, lot)
    }

    /// 创建酒液单元 (事务内形态)
    pub fn create_in(conn: &Connection, lot: &Lot) -> RepositoryResult<String> {
        conn.execute(
            r#"INSERT INTO lot (
                lot_id, tenant_id, lot_code, phase, status,
                planned_volume_l, parent_lot_id, is_blend_target, blended_at,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &lot.lot_id,
                &lot.tenant_id,
                &lot.lot_code,
                lot.phase.to_db_str(),
                lot.status.to_db_str(),
                &lot.planned_volume_l,
                &lot.parent_lot_id,
                if lot.is_blend_target { 1 } else { 0 },
                &lot.blended_at.map(|d| d.format(DT_FMT).to_string()),
                &lot.created_at.format(DT_FMT).to_string(),
                &lot.updated_at.format(DT_FMT).to_string(),
            ],
        )?;

        Ok(lot.lot_id.clone())
    }

    /// 按lot_id查询酒液单元
    pub fn find_by_id(&self, tenant_id: &str, lot_id: &str) -> RepositoryResult<Option<Lot>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, tenant_id, lot_id)
    }

    /// 按lot_id查询酒液单元 (事务内形态)
    pub fn find_by_id_in(
        conn: &Connection,
        tenant_id: &str,
        lot_id: &str,
    ) -> RepositoryResult<Option<Lot>> {
        let sql = format!(
            "SELECT {} FROM lot WHERE tenant_id = ? AND lot_id = ?",
            Self::COLUMNS
        );
        match conn.query_row(&sql, params![tenant_id, lot_id], Self::map_row) {
            Ok(lot) => Ok(Some(lot)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询批次关联的所有酒液单元 (按编号升序)
    pub fn find_by_batch_in(
        conn: &Connection,
        tenant_id: &str,
        batch_id: &str,
    ) -> RepositoryResult<Vec<Lot>> {
        let mut stmt = conn.prepare(
            r#"SELECT l.lot_id, l.tenant_id, l.lot_code, l.phase, l.status,
                      l.planned_volume_l, l.parent_lot_id, l.is_blend_target, l.blended_at,
                      l.created_at, l.updated_at
               FROM lot l
               INNER JOIN lot_batch lb ON lb.lot_id = l.lot_id
               WHERE l.tenant_id = ? AND lb.batch_id = ?
               ORDER BY l.lot_code"#,
        )?;
        let lots = stmt
            .query_map(params![tenant_id, batch_id], Self::map_row)?
            .collect::<Result<Vec<Lot>, _>>()?;

        Ok(lots)
    }

    /// 查询某单元的分罐子单元 (按编号升序)
    pub fn find_children_in(
        conn: &Connection,
        tenant_id: &str,
        parent_lot_id: &str,
    ) -> RepositoryResult<Vec<Lot>> {
        let sql = format!(
            "SELECT {} FROM lot WHERE tenant_id = ? AND parent_lot_id = ? ORDER BY lot_code",
            Self::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let lots = stmt
            .query_map(params![tenant_id, parent_lot_id], Self::map_row)?
            .collect::<Result<Vec<Lot>, _>>()?;

        Ok(lots)
    }

    /// 更新单元的阶段与状态
    pub fn update_phase_status_in(
        conn: &Connection,
        tenant_id: &str,
        lot_id: &str,
        phase: LotPhase,
        status: LotStatus,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE lot SET phase = ?, status = ?, updated_at = ? WHERE tenant_id = ? AND lot_id = ?",
            params![
                phase.to_db_str(),
                status.to_db_str(),
                updated_at.format(DT_FMT).to_string(),
                tenant_id,
                lot_id,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Lot".to_string(),
                id: lot_id.to_string(),
            });
        }
        Ok(())
    }

    /// 将单元标记为已完结 (阶段不变)
    pub fn mark_completed_in(
        conn: &Connection,
        tenant_id: &str,
        lot_id: &str,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE lot SET status = ?, updated_at = ? WHERE tenant_id = ? AND lot_id = ?",
            params![
                LotStatus::Completed.to_db_str(),
                updated_at.format(DT_FMT).to_string(),
                tenant_id,
                lot_id,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Lot".to_string(),
                id: lot_id.to_string(),
            });
        }
        Ok(())
    }

    /// 写入混酿编号并打上混酿标记
    pub fn apply_blend_code_in(
        conn: &Connection,
        tenant_id: &str,
        lot_id: &str,
        lot_code: &str,
        blended_at: NaiveDateTime,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"UPDATE lot
               SET lot_code = ?, is_blend_target = 1, blended_at = ?, updated_at = ?
               WHERE tenant_id = ? AND lot_id = ?"#,
            params![
                lot_code,
                blended_at.format(DT_FMT).to_string(),
                updated_at.format(DT_FMT).to_string(),
                tenant_id,
                lot_id,
            ],
        )?;

        Ok(())
    }

    /// 映射数据库行到Lot对象
    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Lot> {
        Ok(Lot {
            lot_id: row.get(0)?,
            tenant_id: row.get(1)?,
            lot_code: row.get(2)?,
            phase: parse_phase(3, &row.get::<_, String>(3)?)?,
            status: parse_status(4, &row.get::<_, String>(4)?)?,
            planned_volume_l: row.get(5)?,
            parent_lot_id: row.get(6)?,
            is_blend_target: row.get::<_, i32>(7)? == 1,
            blended_at: row
                .get::<_, Option<String>>(8)?
                .map(|s| parse_dt(8, s))
                .transpose()?,
            created_at: parse_dt(9, row.get::<_, String>(9)?)?,
            updated_at: parse_dt(10, row.get::<_, String>(10)?)?,
        })
    }
}

// ==========================================
// LotBatchRepository - 批次-酒液关联仓储
// ==========================================
// 红线: percentage 的重算属于引擎职责,仓储只负责读写
pub struct LotBatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LotBatchRepository {
    const COLUMNS: &'static str =
        "lot_batch_id, tenant_id, lot_id, batch_id, volume_l, percentage, created_at";

    /// 创建新的LotBatchRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建关联行
    pub fn create(&self, link: &LotBatch) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::create_in(&conn, link)
    }

    /// 创建关联行 (事务内形态)
    pub fn create_in(conn: &Connection, link: &LotBatch) -> RepositoryResult<String> {
        conn.execute(
            r#"INSERT INTO lot_batch (
                lot_batch_id, tenant_id, lot_id, batch_id, volume_l, percentage, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &link.lot_batch_id,
                &link.tenant_id,
                &link.lot_id,
                &link.batch_id,
                &link.volume_l,
                &link.percentage,
                &link.created_at.format(DT_FMT).to_string(),
            ],
        )?;

        Ok(link.lot_batch_id.clone())
    }

    /// 查询某酒液单元的全部关联行
    pub fn find_by_lot_in(
        conn: &Connection,
        tenant_id: &str,
        lot_id: &str,
    ) -> RepositoryResult<Vec<LotBatch>> {
        let sql = format!(
            "SELECT {} FROM lot_batch WHERE tenant_id = ? AND lot_id = ? ORDER BY created_at",
            Self::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let links = stmt
            .query_map(params![tenant_id, lot_id], Self::map_row)?
            .collect::<Result<Vec<LotBatch>, _>>()?;

        Ok(links)
    }

    /// 查询某批次与某单元之间的关联行 (多条时取最早)
    pub fn find_by_batch_and_lot_in(
        conn: &Connection,
        tenant_id: &str,
        batch_id: &str,
        lot_id: &str,
    ) -> RepositoryResult<Option<LotBatch>> {
        let sql = format!(
            r#"SELECT {} FROM lot_batch
               WHERE tenant_id = ? AND batch_id = ? AND lot_id = ?
               ORDER BY created_at LIMIT 1"#,
            Self::COLUMNS
        );
        match conn.query_row(&sql, params![tenant_id, batch_id, lot_id], Self::map_row) {
            Ok(link) => Ok(Some(link)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 更新关联行的百分比
    pub fn update_percentage_in(
        conn: &Connection,
        lot_batch_id: &str,
        percentage: f64,
    ) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE lot_batch SET percentage = ? WHERE lot_batch_id = ?",
            params![percentage, lot_batch_id],
        )?;

        Ok(())
    }

    /// 查询共享某酒液单元的全部批次ID
    pub fn batch_ids_for_lot_in(
        conn: &Connection,
        tenant_id: &str,
        lot_id: &str,
    ) -> RepositoryResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT batch_id FROM lot_batch WHERE tenant_id = ? AND lot_id = ?",
        )?;
        let ids = stmt
            .query_map(params![tenant_id, lot_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(ids)
    }

    /// 映射数据库行到LotBatch对象
    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<LotBatch> {
        Ok(LotBatch {
            lot_batch_id: row.get(0)?,
            tenant_id: row.get(1)?,
            lot_id: row.get(2)?,
            batch_id: row.get(3)?,
            volume_l: row.get(4)?,
            percentage: row.get(5)?,
            created_at: parse_dt(6, row.get::<_, String>(6)?)?,
        })
    }
}

// ==========================================
// 精酿生产管理系统 - 罐体数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 同一罐体任意时刻至多一条 ACTIVE 占用,由引擎在事务内保证
// ==========================================

use crate::domain::tank::{Tank, TankAssignment};
use crate::domain::types::{AssignmentStatus, LotPhase, TankStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
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

// ==========================================
// TankRepository - 罐体仓储
// ==========================================
pub struct TankRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TankRepository {
    const COLUMNS: &'static str = "tank_id, tenant_id, tank_code, capacity_l, status, \
         current_lot_id, current_phase, created_at, updated_at";

    /// 创建新的TankRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建罐体
    pub fn create(&self, tank: &Tank) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::create_in(&conn, tank)
    }

    /// 创建罐体 (事务内形态)
    pub fn create_in(conn: &Connection, tank: &Tank) -> RepositoryResult<String> {
        conn.execute(
            r#"INSERT INTO tank (
                tank_id, tenant_id, tank_code, capacity_l, status,
                current_lot_id, current_phase, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &tank.tank_id,
                &tank.tenant_id,
                &tank.tank_code,
                &tank.capacity_l,
                tank.status.to_db_str(),
                &tank.current_lot_id,
                &tank.current_phase.map(|p| p.to_db_str()),
                &tank.created_at.format(DT_FMT).to_string(),
                &tank.updated_at.format(DT_FMT).to_string(),
            ],
        )?;

        Ok(tank.tank_id.clone())
    }

    /// 按tank_id查询罐体
    pub fn find_by_id(&self, tenant_id: &str, tank_id: &str) -> RepositoryResult<Option<Tank>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, tenant_id, tank_id)
    }

    /// 按tank_id查询罐体 (事务内形态)
    pub fn find_by_id_in(
        conn: &Connection,
        tenant_id: &str,
        tank_id: &str,
    ) -> RepositoryResult<Option<Tank>> {
        let sql = format!(
            "SELECT {} FROM tank WHERE tenant_id = ? AND tank_id = ?",
            Self::COLUMNS
        );
        match conn.query_row(&sql, params![tenant_id, tank_id], Self::map_row) {
            Ok(tank) => Ok(Some(tank)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 将罐体标记为被某单元占用
    pub fn set_occupied_in(
        conn: &Connection,
        tenant_id: &str,
        tank_id: &str,
        lot_id: &str,
        phase: LotPhase,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE tank
               SET status = ?, current_lot_id = ?, current_phase = ?, updated_at = ?
               WHERE tenant_id = ? AND tank_id = ?"#,
            params![
                TankStatus::Occupied.to_db_str(),
                lot_id,
                phase.to_db_str(),
                updated_at.format(DT_FMT).to_string(),
                tenant_id,
                tank_id,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Tank".to_string(),
                id: tank_id.to_string(),
            });
        }
        Ok(())
    }

    /// 释放罐体 (清空占用信息,写入移出后状态)
    pub fn release_in(
        conn: &Connection,
        tenant_id: &str,
        tank_id: &str,
        status: TankStatus,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE tank
               SET status = ?, current_lot_id = NULL, current_phase = NULL, updated_at = ?
               WHERE tenant_id = ? AND tank_id = ?"#,
            params![
                status.to_db_str(),
                updated_at.format(DT_FMT).to_string(),
                tenant_id,
                tank_id,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Tank".to_string(),
                id: tank_id.to_string(),
            });
        }
        Ok(())
    }

    /// 同步罐体行政镜像 (幂等投影)
    ///
    /// 从权威记录 (tank + ACTIVE 占用合计) 重建 tank_report 行。
    /// 设计为事务提交后调用,失败由调用方记日志。
    pub fn sync_report_in(
        conn: &Connection,
        tenant_id: &str,
        tank_id: &str,
        synced_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let tank = Self::find_by_id_in(conn, tenant_id, tank_id)?.ok_or_else(|| {
            RepositoryError::NotFound {
                entity: "Tank".to_string(),
                id: tank_id.to_string(),
            }
        })?;

        let current_volume_l: f64 = conn.query_row(
            r#"SELECT COALESCE(SUM(planned_volume_l), 0.0)
               FROM tank_assignment
               WHERE tenant_id = ? AND tank_id = ? AND status = 'ACTIVE'"#,
            params![tenant_id, tank_id],
            |row| row.get(0),
        )?;

        let occupant_lot_code: Option<String> = match &tank.current_lot_id {
            Some(lot_id) => conn
                .query_row(
                    "SELECT lot_code FROM lot WHERE tenant_id = ? AND lot_id = ?",
                    params![tenant_id, lot_id],
                    |row| row.get(0),
                )
                .optional()?,
            None => None,
        };

        conn.execute(
            r#"INSERT OR REPLACE INTO tank_report (
                tank_id, tenant_id, tank_code, status, occupant_lot_code,
                current_phase, current_volume_l, capacity_l, synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &tank.tank_id,
                &tank.tenant_id,
                &tank.tank_code,
                tank.status.to_db_str(),
                &occupant_lot_code,
                &tank.current_phase.map(|p| p.to_db_str()),
                current_volume_l,
                &tank.capacity_l,
                synced_at.format(DT_FMT).to_string(),
            ],
        )?;

        Ok(())
    }

    /// 映射数据库行到Tank对象
    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Tank> {
        let status_str: String = row.get(4)?;
        let status = TankStatus::from_db_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("无效的罐体状态: {}", status_str).into(),
            )
        })?;

        Ok(Tank {
            tank_id: row.get(0)?,
            tenant_id: row.get(1)?,
            tank_code: row.get(2)?,
            capacity_l: row.get(3)?,
            status,
            current_lot_id: row.get(5)?,
            current_phase: row
                .get::<_, Option<String>>(6)?
                .map(|s| parse_phase(6, &s))
                .transpose()?,
            created_at: parse_dt(7, row.get::<_, String>(7)?)?,
            updated_at: parse_dt(8, row.get::<_, String>(8)?)?,
        })
    }
}

// ==========================================
// TankAssignmentRepository - 罐体占用仓储
// ==========================================
pub struct TankAssignmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TankAssignmentRepository {
    const COLUMNS: &'static str = "assignment_id, tenant_id, tank_id, lot_id, phase, status, \
         planned_start, planned_end, actual_end, planned_volume_l, actual_volume_l, \
         created_at, updated_at";

    /// 创建新的TankAssignmentRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建占用记录
    pub fn create(&self, assignment: &TankAssignment) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::create_in(&conn, assignment)
    }

    /// 创建占用记录 (事务内形态)
    pub fn create_in(conn: &Connection, assignment: &TankAssignment) -> RepositoryResult<String> {
        conn.execute(
            r#"INSERT INTO tank_assignment (
                assignment_id, tenant_id, tank_id, lot_id, phase, status,
                planned_start, planned_end, actual_end,
                planned_volume_l, actual_volume_l, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &assignment.assignment_id,
                &assignment.tenant_id,
                &assignment.tank_id,
                &assignment.lot_id,
                assignment.phase.to_db_str(),
                assignment.status.to_db_str(),
                &assignment.planned_start.format(DT_FMT).to_string(),
                &assignment.planned_end.map(|d| d.format(DT_FMT).to_string()),
                &assignment.actual_end.map(|d| d.format(DT_FMT).to_string()),
                &assignment.planned_volume_l,
                &assignment.actual_volume_l,
                &assignment.created_at.format(DT_FMT).to_string(),
                &assignment.updated_at.format(DT_FMT).to_string(),
            ],
        )?;

        Ok(assignment.assignment_id.clone())
    }

    /// 查询罐体的全部 ACTIVE 占用
    pub fn find_active_by_tank_in(
        conn: &Connection,
        tenant_id: &str,
        tank_id: &str,
    ) -> RepositoryResult<Vec<TankAssignment>> {
        let sql = format!(
            r#"SELECT {} FROM tank_assignment
               WHERE tenant_id = ? AND tank_id = ? AND status = 'ACTIVE'
               ORDER BY planned_start"#,
            Self::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let assignments = stmt
            .query_map(params![tenant_id, tank_id], Self::map_row)?
            .collect::<Result<Vec<TankAssignment>, _>>()?;

        Ok(assignments)
    }

    /// 查询单元在发酵阶段仍开放的占用 (PLANNED / ACTIVE)
    pub fn find_open_fermentation_by_lot_in(
        conn: &Connection,
        tenant_id: &str,
        lot_id: &str,
    ) -> RepositoryResult<Vec<TankAssignment>> {
        let sql = format!(
            r#"SELECT {} FROM tank_assignment
               WHERE tenant_id = ? AND lot_id = ?
                 AND phase = 'FERMENTATION' AND status IN ('PLANNED', 'ACTIVE')
               ORDER BY planned_start"#,
            Self::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let assignments = stmt
            .query_map(params![tenant_id, lot_id], Self::map_row)?
            .collect::<Result<Vec<TankAssignment>, _>>()?;

        Ok(assignments)
    }

    /// 查询单元在发酵阶段的 ACTIVE 占用 (原罐转相判定用)
    pub fn find_active_fermentation_by_lot_in(
        conn: &Connection,
        tenant_id: &str,
        lot_id: &str,
    ) -> RepositoryResult<Option<TankAssignment>> {
        let sql = format!(
            r#"SELECT {} FROM tank_assignment
               WHERE tenant_id = ? AND lot_id = ?
                 AND phase = 'FERMENTATION' AND status = 'ACTIVE'
               ORDER BY planned_start LIMIT 1"#,
            Self::COLUMNS
        );
        match conn.query_row(&sql, params![tenant_id, lot_id], Self::map_row) {
            Ok(assignment) => Ok(Some(assignment)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询单元的全部 ACTIVE 占用
    pub fn find_active_by_lot_in(
        conn: &Connection,
        tenant_id: &str,
        lot_id: &str,
    ) -> RepositoryResult<Vec<TankAssignment>> {
        let sql = format!(
            r#"SELECT {} FROM tank_assignment
               WHERE tenant_id = ? AND lot_id = ? AND status = 'ACTIVE'
               ORDER BY planned_start"#,
            Self::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let assignments = stmt
            .query_map(params![tenant_id, lot_id], Self::map_row)?
            .collect::<Result<Vec<TankAssignment>, _>>()?;

        Ok(assignments)
    }

    /// 关闭占用 (写入实际结束时间)
    pub fn complete_in(
        conn: &Connection,
        assignment_id: &str,
        actual_end: NaiveDateTime,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE tank_assignment
               SET status = ?, actual_end = ?, updated_at = ?
               WHERE assignment_id = ?"#,
            params![
                AssignmentStatus::Completed.to_db_str(),
                actual_end.format(DT_FMT).to_string(),
                updated_at.format(DT_FMT).to_string(),
                assignment_id,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "TankAssignment".to_string(),
                id: assignment_id.to_string(),
            });
        }
        Ok(())
    }

    /// 追加计划体积 (混酿目标吸收新体积时使用)
    pub fn add_planned_volume_in(
        conn: &Connection,
        assignment_id: &str,
        delta_l: f64,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE tank_assignment
               SET planned_volume_l = planned_volume_l + ?, updated_at = ?
               WHERE assignment_id = ?"#,
            params![
                delta_l,
                updated_at.format(DT_FMT).to_string(),
                assignment_id,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "TankAssignment".to_string(),
                id: assignment_id.to_string(),
            });
        }
        Ok(())
    }

    /// 映射数据库行到TankAssignment对象
    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<TankAssignment> {
        let status_str: String = row.get(5)?;
        let status = AssignmentStatus::from_db_str(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("无效的占用状态: {}", status_str).into(),
            )
        })?;

        Ok(TankAssignment {
            assignment_id: row.get(0)?,
            tenant_id: row.get(1)?,
            tank_id: row.get(2)?,
            lot_id: row.get(3)?,
            phase: parse_phase(4, &row.get::<_, String>(4)?)?,
            status,
            planned_start: parse_dt(6, row.get::<_, String>(6)?)?,
            planned_end: row
                .get::<_, Option<String>>(7)?
                .map(|s| parse_dt(7, s))
                .transpose()?,
            actual_end: row
                .get::<_, Option<String>>(8)?
                .map(|s| parse_dt(8, s))
                .transpose()?,
            planned_volume_l: row.get(9)?,
            actual_volume_l: row.get(10)?,
            created_at: parse_dt(11, row.get::<_, String>(11)?)?,
            updated_at: parse_dt(12, row.get::<_, String>(12)?)?,
        })
    }
}

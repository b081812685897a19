// ==========================================
// 精酿生产管理系统 - 转移流水与测量数据仓储
// ==========================================
// 红线: transfer_log 只追加,引擎不回读
// ==========================================

use crate::domain::transfer::{LotMeasurement, Transfer};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

const DT_FMT: &str = "%Y-%m-%d %H:%M:%S";

// ==========================================
// TransferRepository - 转移流水仓储
// ==========================================
pub struct TransferRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TransferRepository {
    /// 创建新的TransferRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加转移流水
    pub fn insert(&self, transfer: &Transfer) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_in(&conn, transfer)
    }

    /// 追加转移流水 (事务内形态)
    pub fn insert_in(conn: &Connection, transfer: &Transfer) -> RepositoryResult<String> {
        conn.execute(
            r#"INSERT INTO transfer_log (
                transfer_id, tenant_id, batch_id, lot_id,
                source_tank_id, dest_tank_id, volume_l, mode,
                transferred_at, note, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &transfer.transfer_id,
                &transfer.tenant_id,
                &transfer.batch_id,
                &transfer.lot_id,
                &transfer.source_tank_id,
                &transfer.dest_tank_id,
                &transfer.volume_l,
                transfer.mode.to_db_str(),
                &transfer.transferred_at.format(DT_FMT).to_string(),
                &transfer.note,
                &transfer.created_at.format(DT_FMT).to_string(),
            ],
        )?;

        Ok(transfer.transfer_id.clone())
    }
}

// ==========================================
// LotMeasurementRepository - 测量记录仓储
// ==========================================
// 测量写入为尽力而为的附带动作,设计为事务提交后调用
pub struct LotMeasurementRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LotMeasurementRepository {
    /// 创建新的LotMeasurementRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入测量记录
    pub fn insert(&self, measurement: &LotMeasurement) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_in(&conn, measurement)
    }

    /// 写入测量记录 (事务内形态)
    pub fn insert_in(conn: &Connection, measurement: &LotMeasurement) -> RepositoryResult<String> {
        conn.execute(
            r#"INSERT INTO lot_measurement (
                measurement_id, tenant_id, lot_id,
                final_gravity, temperature_c, measured_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &measurement.measurement_id,
                &measurement.tenant_id,
                &measurement.lot_id,
                &measurement.final_gravity,
                &measurement.temperature_c,
                &measurement.measured_at.format(DT_FMT).to_string(),
                &measurement.created_at.format(DT_FMT).to_string(),
            ],
        )?;

        Ok(measurement.measurement_id.clone())
    }
}

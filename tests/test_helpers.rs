// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、实体构造等功能
// ==========================================

#![allow(dead_code)]

use brewery_lot_engine::config::ConfigManager;
use brewery_lot_engine::domain::batch::Batch;
use brewery_lot_engine::domain::lot::{Lot, LotBatch};
use brewery_lot_engine::domain::tank::{Tank, TankAssignment};
use brewery_lot_engine::domain::types::{
    AssignmentStatus, BatchStatus, LotPhase, LotStatus, TankStatus,
};
use brewery_lot_engine::engine::codegen::UuidBlendCodeGenerator;
use brewery_lot_engine::engine::mode_resolver::TransitionRequest;
use brewery_lot_engine::api::PhaseTransitionApi;
use brewery_lot_engine::repository::batch_repo::BatchRepository;
use brewery_lot_engine::repository::lot_repo::{LotBatchRepository, LotRepository};
use brewery_lot_engine::repository::tank_repo::{TankAssignmentRepository, TankRepository};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 测试租户
pub const TENANT: &str = "T1";

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = Connection::open(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开测试数据库连接 (应用统一 PRAGMA)
pub fn open_test_connection(db_path: &str) -> Result<Connection, Box<dyn Error>> {
    let conn = brewery_lot_engine::db::open_sqlite_connection(db_path)?;
    Ok(conn)
}

/// 常用的一站式初始化: 临时库 + 配置 + 共享连接
pub fn setup_test_db() -> (NamedTempFile, Arc<Mutex<Connection>>) {
    let (temp_file, db_path) = create_test_db().expect("创建测试数据库失败");
    let conn = open_test_connection(&db_path).expect("打开数据库失败");
    insert_test_config(&conn).expect("插入配置失败");

    (temp_file, Arc::new(Mutex::new(conn)))
}

/// 基于共享连接构造流转 API (无时间线发布者)
pub fn build_api(conn: Arc<Mutex<Connection>>) -> PhaseTransitionApi {
    let config_manager =
        Arc::new(ConfigManager::from_connection(conn.clone()).expect("创建配置管理器失败"));
    PhaseTransitionApi::new(
        conn,
        config_manager,
        Arc::new(UuidBlendCodeGenerator),
        None,
    )
}

/// 初始化数据库 schema
fn init_schema(conn: &Connection) -> Result<(), Box<dyn Error>> {
    // 创建 schema_version 表
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
        [],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (1)",
        [],
    )?;

    // 创建 config_scope 表
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS config_scope (
            scope_id TEXT PRIMARY KEY,
            scope_type TEXT NOT NULL,
            scope_key TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(scope_type, scope_key)
        )
        "#,
        [],
    )?;

    // 插入 global scope
    conn.execute(
        r#"
        INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
        VALUES ('global', 'GLOBAL', 'global')
        "#,
        [],
    )?;

    // 创建 config_kv 表
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        )
        "#,
        [],
    )?;

    // 创建 batch 表
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS batch (
            batch_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            batch_code TEXT NOT NULL,
            recipe_name TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // 创建 lot 表
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS lot (
            lot_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            lot_code TEXT NOT NULL,
            phase TEXT NOT NULL,
            status TEXT NOT NULL,
            planned_volume_l REAL NOT NULL,
            parent_lot_id TEXT REFERENCES lot(lot_id),
            is_blend_target INTEGER NOT NULL DEFAULT 0,
            blended_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // 创建 lot_batch 表
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS lot_batch (
            lot_batch_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            lot_id TEXT NOT NULL REFERENCES lot(lot_id),
            batch_id TEXT NOT NULL REFERENCES batch(batch_id),
            volume_l REAL NOT NULL,
            percentage REAL NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // 创建 tank 表
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS tank (
            tank_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            tank_code TEXT NOT NULL,
            capacity_l REAL NOT NULL,
            status TEXT NOT NULL,
            current_lot_id TEXT,
            current_phase TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // 创建 tank_assignment 表
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS tank_assignment (
            assignment_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            tank_id TEXT NOT NULL REFERENCES tank(tank_id),
            lot_id TEXT NOT NULL REFERENCES lot(lot_id),
            phase TEXT NOT NULL,
            status TEXT NOT NULL,
            planned_start TEXT NOT NULL,
            planned_end TEXT,
            actual_end TEXT,
            planned_volume_l REAL NOT NULL,
            actual_volume_l REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // 创建 tank_report 表 (行政镜像)
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS tank_report (
            tank_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            tank_code TEXT NOT NULL,
            status TEXT NOT NULL,
            occupant_lot_code TEXT,
            current_phase TEXT,
            current_volume_l REAL NOT NULL DEFAULT 0.0,
            capacity_l REAL NOT NULL,
            synced_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // 创建 transfer_log 表 (只追加流水)
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS transfer_log (
            transfer_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            lot_id TEXT NOT NULL,
            source_tank_id TEXT,
            dest_tank_id TEXT NOT NULL,
            volume_l REAL NOT NULL,
            mode TEXT NOT NULL,
            transferred_at TEXT NOT NULL,
            note TEXT,
            created_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // 创建 lot_measurement 表
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS lot_measurement (
            measurement_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            lot_id TEXT NOT NULL,
            final_gravity REAL,
            temperature_c REAL,
            measured_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    Ok(())
}

/// 插入测试配置数据
pub fn insert_test_config(conn: &Connection) -> Result<(), Box<dyn Error>> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO config_kv (scope_id, key, value, updated_at) VALUES
        ('global', 'tank.post_transfer_status', 'NEEDS_CLEANING', datetime('now')),
        ('global', 'lot.blend_code_prefix', 'BLEND-', datetime('now'))
        "#,
        [],
    )?;

    Ok(())
}

// ==========================================
// 时间构造
// ==========================================

/// 2026-03 的业务时间点
pub fn dt(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

// ==========================================
// 实体构造
// ==========================================

/// 构造测试批次 (发酵中)
pub fn make_batch(batch_id: &str, batch_code: &str) -> Batch {
    Batch {
        batch_id: batch_id.to_string(),
        tenant_id: TENANT.to_string(),
        batch_code: batch_code.to_string(),
        recipe_name: Some("West Coast IPA".to_string()),
        status: BatchStatus::Fermenting,
        created_at: dt(1, 8),
        updated_at: dt(1, 8),
    }
}

/// 构造测试酒液单元 (发酵中,在产)
pub fn make_lot(lot_id: &str, lot_code: &str, volume_l: f64) -> Lot {
    Lot {
        lot_id: lot_id.to_string(),
        tenant_id: TENANT.to_string(),
        lot_code: lot_code.to_string(),
        phase: LotPhase::Fermentation,
        status: LotStatus::Active,
        planned_volume_l: volume_l,
        parent_lot_id: None,
        is_blend_target: false,
        blended_at: None,
        created_at: dt(1, 8),
        updated_at: dt(1, 8),
    }
}

/// 构造测试关联行
pub fn make_lot_batch(lot_batch_id: &str, lot_id: &str, batch_id: &str, volume_l: f64) -> LotBatch {
    LotBatch {
        lot_batch_id: lot_batch_id.to_string(),
        tenant_id: TENANT.to_string(),
        lot_id: lot_id.to_string(),
        batch_id: batch_id.to_string(),
        volume_l,
        percentage: 100.0,
        created_at: dt(1, 8),
    }
}

/// 构造测试罐体 (空闲)
pub fn make_tank(tank_id: &str, tank_code: &str, capacity_l: f64) -> Tank {
    Tank {
        tank_id: tank_id.to_string(),
        tenant_id: TENANT.to_string(),
        tank_code: tank_code.to_string(),
        capacity_l,
        status: TankStatus::Available,
        current_lot_id: None,
        current_phase: None,
        created_at: dt(1, 8),
        updated_at: dt(1, 8),
    }
}

/// 构造测试占用记录 (发酵, ACTIVE)
pub fn make_fermentation_assignment(
    assignment_id: &str,
    tank_id: &str,
    lot_id: &str,
    volume_l: f64,
) -> TankAssignment {
    TankAssignment {
        assignment_id: assignment_id.to_string(),
        tenant_id: TENANT.to_string(),
        tank_id: tank_id.to_string(),
        lot_id: lot_id.to_string(),
        phase: LotPhase::Fermentation,
        status: AssignmentStatus::Active,
        planned_start: dt(1, 8),
        planned_end: Some(dt(15, 8)),
        actual_end: None,
        planned_volume_l: volume_l,
        actual_volume_l: None,
        created_at: dt(1, 8),
        updated_at: dt(1, 8),
    }
}

// ==========================================
// 写库辅助
// ==========================================

pub fn insert_batch(conn: &Connection, batch: &Batch) {
    BatchRepository::create_in(conn, batch).expect("插入批次失败");
}

pub fn insert_lot(conn: &Connection, lot: &Lot) {
    LotRepository::create_in(conn, lot).expect("插入酒液单元失败");
}

pub fn insert_lot_batch(conn: &Connection, link: &LotBatch) {
    LotBatchRepository::create_in(conn, link).expect("插入关联行失败");
}

pub fn insert_tank(conn: &Connection, tank: &Tank) {
    TankRepository::create_in(conn, tank).expect("插入罐体失败");
}

pub fn insert_assignment(conn: &Connection, assignment: &TankAssignment) {
    TankAssignmentRepository::create_in(conn, assignment).expect("插入占用记录失败");
}

// ==========================================
// 请求构造
// ==========================================

/// 构造基础流转请求 (无分配项,无标志)
pub fn base_request(batch_id: &str) -> TransitionRequest {
    TransitionRequest {
        tenant_id: TENANT.to_string(),
        user_id: "tester".to_string(),
        batch_id: batch_id.to_string(),
        source_lot_id: None,
        source_tank_id: None,
        child_lot_id: None,
        allocations: Vec::new(),
        planned_start: dt(10, 8),
        planned_end: Some(dt(24, 8)),
        final_gravity: None,
        temperature_c: None,
        note: None,
        keep_same_tank: false,
        is_split: false,
        enable_blend: false,
        blend_target_lot_id: None,
    }
}

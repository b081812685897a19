// ==========================================
// 精酿生产管理系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、默认值管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::config_keys;
use crate::db::open_sqlite_connection;
use crate::domain::types::TankStatus;
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    // ===== 罐体流转配置 =====

    /// 获取酒液移出后的罐体状态
    ///
    /// # 说明
    /// 配置值为 AVAILABLE 或 NEEDS_CLEANING；格式错误时回落默认值 NEEDS_CLEANING
    pub fn get_post_transfer_tank_status(&self) -> Result<TankStatus, Box<dyn Error>> {
        let value =
            self.get_config_or_default(config_keys::TANK_POST_TRANSFER_STATUS, "NEEDS_CLEANING")?;
        match TankStatus::from_db_str(&value) {
            Some(TankStatus::Occupied) | None => {
                tracing::warn!(
                    config_key = config_keys::TANK_POST_TRANSFER_STATUS,
                    raw_value = %value,
                    "移出后罐体状态配置非法，使用默认值 NEEDS_CLEANING"
                );
                Ok(TankStatus::NeedsCleaning)
            }
            Some(status) => Ok(status),
        }
    }

    /// 获取混酿单元编号前缀
    pub fn get_blend_code_prefix(&self) -> Result<String, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::LOT_BLEND_CODE_PREFIX, "BLEND-")?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Ok("BLEND-".to_string())
        } else {
            Ok(trimmed.to_string())
        }
    }
}

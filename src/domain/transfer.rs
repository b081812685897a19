// ==========================================
// 精酿生产管理系统 - 转移流水与测量记录
// ==========================================
// transfer_log 为只追加审计流水,引擎只写不读
// lot_measurement 为尽力而为的附带写入,失败不回滚主流程
// ==========================================

use crate::domain::types::TransitionMode;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Transfer - 酒液转移流水
// ==========================================
// 每一次体积移动一条记录。原罐转相时 source 与 dest 为同一罐体,
// 保证流水对所有流转模式完整
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    // ===== 主键与租户 =====
    pub transfer_id: String, // 流水唯一标识 (UUID)
    pub tenant_id: String,   // 租户标识

    // ===== 关联 =====
    pub batch_id: String,               // 生产批次
    pub lot_id: String,                 // 酒液单元 (移动后的承接单元)
    pub source_tank_id: Option<String>, // 来源罐体 (新建单元无来源)
    pub dest_tank_id: String,           // 目标罐体

    // ===== 移动内容 =====
    pub volume_l: f64,            // 移动体积 (升)
    pub mode: TransitionMode,     // 流转模式
    pub transferred_at: NaiveDateTime, // 业务发生时间 (取计划开始)
    pub note: Option<String>,     // 备注

    // ===== 审计字段 =====
    pub created_at: NaiveDateTime, // 记录创建时间
}

// ==========================================
// LotMeasurement - 酒液测量记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotMeasurement {
    pub measurement_id: String,       // 测量记录唯一标识 (UUID)
    pub tenant_id: String,            // 租户标识
    pub lot_id: String,               // 酒液单元
    pub final_gravity: Option<f64>,   // 终点比重
    pub temperature_c: Option<f64>,   // 温度 (摄氏)
    pub measured_at: NaiveDateTime,   // 测量时间 (取计划开始)
    pub created_at: NaiveDateTime,    // 记录创建时间
}

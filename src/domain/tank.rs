// ==========================================
// 精酿生产管理系统 - 罐体领域模型
// ==========================================
// 红线: 同一罐体任意时刻至多一条 ACTIVE 占用记录
// tank_report 为行政镜像投影,事务外幂等同步,不具权威性
// ==========================================

use crate::domain::types::{AssignmentStatus, LotPhase, TankStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Tank - 罐体
// ==========================================
// 物理容器。占用信息 (current_lot_id / current_phase) 与
// tank_assignment 的 ACTIVE 行保持一致,由引擎在同一事务内维护
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tank {
    // ===== 主键与租户 =====
    pub tank_id: String,   // 罐体唯一标识 (UUID)
    pub tenant_id: String, // 租户标识

    // ===== 基础信息 =====
    pub tank_code: String,  // 罐体编号 (业务可读)
    pub capacity_l: f64,    // 容量上限 (升)

    // ===== 占用状态 =====
    pub status: TankStatus,                 // 罐体状态
    pub current_lot_id: Option<String>,     // 当前占用酒液单元
    pub current_phase: Option<LotPhase>,    // 当前工艺阶段

    // ===== 审计字段 =====
    pub created_at: NaiveDateTime, // 记录创建时间
    pub updated_at: NaiveDateTime, // 记录更新时间
}

impl Tank {
    /// 罐体当前是否空闲可用
    pub fn is_available(&self) -> bool {
        self.status == TankStatus::Available
    }
}

// ==========================================
// TankAssignment - 罐体占用记录
// ==========================================
// 一段时间盒: 一个酒液单元在一个罐体内度过一个工艺阶段
// 后继占用只能在前序占用于同一事务内关闭后开启
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TankAssignment {
    // ===== 主键与租户 =====
    pub assignment_id: String, // 占用记录唯一标识 (UUID)
    pub tenant_id: String,     // 租户标识

    // ===== 关联 =====
    pub tank_id: String, // 罐体 (FK)
    pub lot_id: String,  // 酒液单元 (FK)

    // ===== 工艺状态 =====
    pub phase: LotPhase,          // 本次占用对应的工艺阶段
    pub status: AssignmentStatus, // 占用状态

    // ===== 时间盒 =====
    pub planned_start: NaiveDateTime,       // 计划开始 (业务时间)
    pub planned_end: Option<NaiveDateTime>, // 计划结束
    pub actual_end: Option<NaiveDateTime>,  // 实际结束 (关闭时写入)

    // ===== 体积 =====
    pub planned_volume_l: f64,        // 计划体积 (升)
    pub actual_volume_l: Option<f64>, // 实际体积 (可选)

    // ===== 审计字段 =====
    pub created_at: NaiveDateTime, // 记录创建时间
    pub updated_at: NaiveDateTime, // 记录更新时间
}

impl TankAssignment {
    /// 占用是否仍开放 (计划中或进行中)
    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            AssignmentStatus::Planned | AssignmentStatus::Active
        )
    }
}

// ==========================================
// TankReport - 罐体行政镜像
// ==========================================
// 报表用途的次级记录,由引擎在事务提交后尽力同步
// 同步失败只记日志,不影响主流程
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TankReport {
    pub tank_id: String,                 // 罐体标识 (与 tank 同键)
    pub tenant_id: String,               // 租户标识
    pub tank_code: String,               // 罐体编号
    pub status: TankStatus,              // 罐体状态快照
    pub occupant_lot_code: Option<String>, // 占用单元编号快照
    pub current_phase: Option<LotPhase>, // 工艺阶段快照
    pub current_volume_l: f64,           // 当前在罐体积 (ACTIVE 占用合计)
    pub capacity_l: f64,                 // 容量上限
    pub synced_at: NaiveDateTime,        // 镜像同步时间
}

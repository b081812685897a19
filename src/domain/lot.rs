// ==========================================
// 精酿生产管理系统 - 酒液单元领域模型
// ==========================================
// 血缘结构: parent_lot_id 形成分罐树,lot_batch 形成批次多对多 (合起来是 DAG)
// 红线: 混酿目标单元不可再被设置父引用,分罐嵌套不超过一层
// ==========================================

use crate::domain::types::{LotPhase, LotStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Lot - 酒液单元
// ==========================================
// 一段可追踪的在制酒液。分罐后父单元完结,子单元承接在产血缘;
// 混酿目标单元保持 ACTIVE,只增加 lot_batch 关联
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    // ===== 主键与租户 =====
    pub lot_id: String,    // 酒液单元唯一标识 (UUID)
    pub tenant_id: String, // 租户标识

    // ===== 基础信息 =====
    pub lot_code: String, // 单元编号 (分罐子单元为 <父编号>-A/-B/…)

    // ===== 工艺状态 =====
    pub phase: LotPhase,   // 工艺阶段 (单调前进)
    pub status: LotStatus, // 单元状态

    // ===== 容量 =====
    pub planned_volume_l: f64, // 计划体积 (升)

    // ===== 血缘 =====
    pub parent_lot_id: Option<String>, // 父单元引用 (分罐树,至多一层)

    // ===== 混酿标记 =====
    pub is_blend_target: bool,             // 是否混酿目标单元
    pub blended_at: Option<NaiveDateTime>, // 首次成为混酿目标的时间

    // ===== 审计字段 =====
    pub created_at: NaiveDateTime, // 记录创建时间
    pub updated_at: NaiveDateTime, // 记录更新时间
}

impl Lot {
    /// 是否为分罐子单元 (带父引用)
    pub fn is_child(&self) -> bool {
        self.parent_lot_id.is_some()
    }

    /// 是否仍处于发酵阶段且未完结 (可被本引擎流转)
    pub fn is_unprocessed_fermentation(&self) -> bool {
        self.phase == LotPhase::Fermentation && self.status != LotStatus::Completed
    }
}

// ==========================================
// LotBatch - 批次-酒液关联
// ==========================================
// 解析 Lot 与 Batch 的多对多;percentage 按变更时点重算
// 混酿保留来源单元的历史关联行 (双重血缘: 发酵史 + 后熟新关联)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotBatch {
    // ===== 主键与租户 =====
    pub lot_batch_id: String, // 关联行唯一标识 (UUID)
    pub tenant_id: String,    // 租户标识

    // ===== 关联 =====
    pub lot_id: String,   // 酒液单元 (FK)
    pub batch_id: String, // 生产批次 (FK)

    // ===== 贡献量 =====
    pub volume_l: f64,   // 该批次贡献体积 (升)
    pub percentage: f64, // 占单元体积百分比 (volume/total*100)

    // ===== 审计字段 =====
    pub created_at: NaiveDateTime, // 记录创建时间
}

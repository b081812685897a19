// ==========================================
// 精酿生产管理系统 - 生产批次领域模型
// ==========================================
// 红线: status 为派生字段,由状态派生引擎重算,不接受外部赋值
// ==========================================

use crate::domain::types::BatchStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Batch - 生产批次
// ==========================================
// 一次生产投料,可因分罐横跨多个酒液单元,也可因混酿与其他批次共享同一单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    // ===== 主键与租户 =====
    pub batch_id: String,  // 批次唯一标识 (UUID)
    pub tenant_id: String, // 租户标识,所有读写按租户隔离

    // ===== 基础信息 =====
    pub batch_code: String,        // 批次编号 (业务可读)
    pub recipe_name: Option<String>, // 配方名称 (只读透传,配方逻辑不在本引擎)

    // ===== 派生状态 =====
    pub status: BatchStatus, // 派生状态 (PLANNED/FERMENTING/CONDITIONING/COMPLETED)

    // ===== 审计字段 =====
    pub created_at: NaiveDateTime, // 记录创建时间
    pub updated_at: NaiveDateTime, // 记录更新时间
}

impl Batch {
    /// 批次是否仍处于发酵中
    pub fn is_fermenting(&self) -> bool {
        self.status == BatchStatus::Fermenting
    }
}

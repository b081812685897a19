// ==========================================
// 精酿生产管理系统 - 批次派生状态引擎
// ==========================================
// 职责: 从关联酒液单元的阶段重算批次状态
// 红线: status 是派生值,本引擎是唯一允许改写它的入口
// 口径: 直接关联或经由结构父单元,只要还有单元在发酵中
//       (PLANNED/ACTIVE + FERMENTATION),批次即为发酵中;否则进入后熟
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::lot::Lot;
use crate::domain::types::{BatchStatus, LotPhase, LotStatus};
use crate::repository::batch_repo::BatchRepository;
use crate::repository::lot_repo::LotRepository;
use rusqlite::Connection;
use std::collections::HashSet;

// ==========================================
// BatchStatusDerivationService
// ==========================================
pub struct BatchStatusDerivationService;

impl BatchStatusDerivationService {
    /// 重算单个批次的派生状态 (事务内)
    ///
    /// # 返回
    /// - `Ok(Some(status))`: 状态发生变化并已写库
    /// - `Ok(None)`: 状态未变化或批次无关联单元
    pub fn recompute_in(
        conn: &Connection,
        tenant_id: &str,
        batch_id: &str,
    ) -> ApiResult<Option<BatchStatus>> {
        let batch = BatchRepository::find_by_id_in(conn, tenant_id, batch_id)?
            .ok_or_else(|| ApiError::BatchNotFound(batch_id.to_string()))?;

        // 已完结批次不回退
        if batch.status == BatchStatus::Completed {
            return Ok(None);
        }

        let lots = LotRepository::find_by_batch_in(conn, tenant_id, batch_id)?;
        if lots.is_empty() {
            return Ok(None);
        }

        // 展开结构父单元的子单元,血缘经由父单元也计入口径
        let mut seen: HashSet<String> = lots.iter().map(|l| l.lot_id.clone()).collect();
        let mut all: Vec<Lot> = lots.clone();
        for lot in &lots {
            for child in LotRepository::find_children_in(conn, tenant_id, &lot.lot_id)? {
                if seen.insert(child.lot_id.clone()) {
                    all.push(child);
                }
            }
        }

        let still_fermenting = all.iter().any(|l| {
            l.phase == LotPhase::Fermentation
                && matches!(l.status, LotStatus::Planned | LotStatus::Active)
        });
        let derived = if still_fermenting {
            BatchStatus::Fermenting
        } else {
            BatchStatus::Conditioning
        };

        if derived == batch.status {
            return Ok(None);
        }

        let now = chrono::Local::now().naive_local();
        BatchRepository::update_status_in(conn, tenant_id, batch_id, derived, now)?;
        tracing::info!(
            batch_id = %batch_id,
            from = %batch.status,
            to = %derived,
            "批次派生状态已更新"
        );

        Ok(Some(derived))
    }
}

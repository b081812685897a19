// ==========================================
// 精酿生产管理系统 - 容量与占用校验器
// ==========================================
// 职责: 目标罐体的存在性、容量、排他占用预检
// 红线: 所有分配项在第一笔写入之前全部校验完毕,
//       任何一项失败则整个请求零副作用返回
// 说明: 校验在提交事务内执行,与声明罐体的写入之间不存在窗口
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::tank::Tank;
use crate::engine::mode_resolver::TankAllocation;
use crate::repository::lot_repo::LotRepository;
use crate::repository::tank_repo::{TankAssignmentRepository, TankRepository};
use rusqlite::Connection;
use std::collections::HashSet;

// ==========================================
// CapacityValidator - 容量与占用校验器
// ==========================================
pub struct CapacityValidator;

impl CapacityValidator {
    /// 校验全部分配项 (只读)
    ///
    /// # 参数
    /// - `moving_lot_id`: 正在移动的单元;该单元自身在目标罐体上的占用不算冲突
    ///
    /// # 返回
    /// - `Ok(Vec<Tank>)`: 与分配列表同序的目标罐体
    /// - `Err`: 首个失败项的结构化错误
    pub fn validate_allocations(
        conn: &Connection,
        tenant_id: &str,
        moving_lot_id: Option<&str>,
        allocations: &[TankAllocation],
    ) -> ApiResult<Vec<Tank>> {
        if allocations.is_empty() {
            return Err(ApiError::TanksUnavailable("未提供目标罐体".to_string()));
        }

        // 同一罐体在分配列表中出现多次会绕过逐项容量/占用检查,直接拒绝
        let mut seen_tank_ids: HashSet<&str> = HashSet::with_capacity(allocations.len());
        for allocation in allocations {
            if !seen_tank_ids.insert(allocation.tank_id.as_str()) {
                return Err(ApiError::InvalidInput(format!(
                    "分配列表中罐体重复: tank_id={}",
                    allocation.tank_id
                )));
            }
        }

        let mut tanks = Vec::with_capacity(allocations.len());
        for allocation in allocations {
            if allocation.volume_l <= 0.0 {
                return Err(ApiError::InvalidInput(format!(
                    "分配体积必须为正: tank_id={}, volume={}L",
                    allocation.tank_id, allocation.volume_l
                )));
            }

            // 存在性
            let tank = TankRepository::find_by_id_in(conn, tenant_id, &allocation.tank_id)?
                .ok_or_else(|| ApiError::TankNotFound(allocation.tank_id.clone()))?;

            let active = TankAssignmentRepository::find_active_by_tank_in(
                conn,
                tenant_id,
                &allocation.tank_id,
            )?;

            // 容量: 现有 ACTIVE 占用合计 + 请求体积不得超过上限
            let current_volume_l: f64 = active.iter().map(|a| a.planned_volume_l).sum();
            if current_volume_l + allocation.volume_l > tank.capacity_l {
                tracing::debug!(
                    tank_code = %tank.tank_code,
                    capacity_l = tank.capacity_l,
                    current_volume_l,
                    requested_volume_l = allocation.volume_l,
                    "容量校验失败"
                );
                return Err(ApiError::TankOverflow {
                    tank_code: tank.tank_code,
                    capacity_l: tank.capacity_l,
                    current_volume_l,
                    requested_volume_l: allocation.volume_l,
                });
            }

            // 排他占用: 他人单元的 ACTIVE 占用即冲突
            if let Some(conflict) = active
                .iter()
                .find(|a| Some(a.lot_id.as_str()) != moving_lot_id)
            {
                let occupying_lot_code =
                    LotRepository::find_by_id_in(conn, tenant_id, &conflict.lot_id)?
                        .map(|l| l.lot_code)
                        .unwrap_or_else(|| conflict.lot_id.clone());
                return Err(ApiError::TankOccupied {
                    tank_code: tank.tank_code,
                    occupying_lot_code,
                    phase: conflict.phase.to_db_str().to_string(),
                });
            }

            tanks.push(tank);
        }

        Ok(tanks)
    }

    /// 混酿目标罐体的容量复检 (只读)
    ///
    /// 混酿目标保持既有占用,只校验追加体积是否超限
    pub fn validate_blend_capacity(
        conn: &Connection,
        tenant_id: &str,
        tank_id: &str,
        additional_volume_l: f64,
    ) -> ApiResult<Tank> {
        let tank = TankRepository::find_by_id_in(conn, tenant_id, tank_id)?
            .ok_or_else(|| ApiError::TankNotFound(tank_id.to_string()))?;

        let active = TankAssignmentRepository::find_active_by_tank_in(conn, tenant_id, tank_id)?;
        let current_volume_l: f64 = active.iter().map(|a| a.planned_volume_l).sum();

        if current_volume_l + additional_volume_l > tank.capacity_l {
            return Err(ApiError::TankOverflow {
                tank_code: tank.tank_code,
                capacity_l: tank.capacity_l,
                current_volume_l,
                requested_volume_l: additional_volume_l,
            });
        }

        Ok(tank)
    }
}

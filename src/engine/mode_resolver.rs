// ==========================================
// 精酿生产管理系统 - 流转模式解析器
// ==========================================
// 职责: 从请求标志 + 当前酒液图谱解析出唯一流转模式,
//       并产出带最小执行状态的类型化执行计划
// 红线: 解析器只读不写;标志矛盾必须显式报错,不做静默取舍
// 优先级 (首个命中生效,顺序即契约):
//   1. 保持原罐 且 来源单元存在 ACTIVE 发酵占用 → 原罐转相
//   2. 启用混酿 (带目标单元)                  → 混酿
//   3. 分配列表非空                            → 单罐直转 / 分罐
//   4. 其余                                    → 无可用罐体
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::batch::Batch;
use crate::domain::lot::{Lot, LotBatch};
use crate::domain::tank::TankAssignment;
use crate::domain::types::{LotStatus, TransitionMode};
use crate::repository::batch_repo::BatchRepository;
use crate::repository::lot_repo::{LotBatchRepository, LotRepository};
use crate::repository::tank_repo::TankAssignmentRepository;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

// ==========================================
// 请求 DTO
// ==========================================

/// 罐体分配项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TankAllocation {
    pub tank_id: String, // 目标罐体
    pub volume_l: f64,   // 计划注入体积 (升)
}

/// 阶段流转请求
///
/// 三个模式标志互不排斥,由解析器按优先级裁决
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    // ===== 身份 =====
    pub tenant_id: String, // 租户 (已通过上游鉴权)
    pub user_id: String,   // 操作人
    pub batch_id: String,  // 生产批次

    // ===== 来源定位 =====
    pub source_lot_id: Option<String>,  // 来源酒液单元 (可选)
    pub source_tank_id: Option<String>, // 来源罐体 (可选,仅流水记录用)
    pub child_lot_id: Option<String>,   // 指定处理哪个分罐子单元 (可选)

    // ===== 目标分配 =====
    pub allocations: Vec<TankAllocation>, // 目标罐体分配列表

    // ===== 时间窗口 =====
    pub planned_start: NaiveDateTime,       // 计划开始 (业务时间)
    pub planned_end: Option<NaiveDateTime>, // 计划结束

    // ===== 附带测量 =====
    pub final_gravity: Option<f64>, // 终点比重 (可选)
    pub temperature_c: Option<f64>, // 温度 (可选)
    pub note: Option<String>,       // 备注

    // ===== 模式标志 =====
    pub keep_same_tank: bool,                // 保持原罐
    pub is_split: bool,                      // 分罐
    pub enable_blend: bool,                  // 启用混酿
    pub blend_target_lot_id: Option<String>, // 混酿目标单元
}

// ==========================================
// 执行计划
// ==========================================

/// 类型化执行计划
///
/// 解析器的唯一输出。跨步骤信号全部显式落在计划字段上,
/// 执行期间请求对象保持不可变
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    /// 解析出的唯一流转模式
    pub mode: TransitionMode,
    /// 生产批次
    pub batch: Batch,
    /// 当前单元 (None 表示批次尚无发酵单元,执行时新建)
    pub current_lot: Option<Lot>,
    /// 结构父单元 (仅"先前分罐留下子单元"的场景,执行时连带关闭/完结)
    pub structural_parent: Option<Lot>,
    /// 原罐转相使用的 ACTIVE 发酵占用
    pub stay_assignment: Option<TankAssignment>,
    /// 混酿目标单元
    pub blend_target: Option<Lot>,
    /// 移动批次与来源单元之间的关联行 (混酿体积来源)
    pub source_lot_batch: Option<LotBatch>,
}

// ==========================================
// ModeResolver - 模式解析器
// ==========================================
pub struct ModeResolver;

impl ModeResolver {
    /// 标志矛盾前置检查
    ///
    /// 矛盾组合直接报错,不做静默取舍
    pub fn check_flag_conflicts(request: &TransitionRequest) -> ApiResult<()> {
        if request.keep_same_tank && request.enable_blend {
            return Err(ApiError::ConflictingFlags(
                "保持原罐与启用混酿不能同时设置".to_string(),
            ));
        }
        if request.keep_same_tank && request.is_split {
            return Err(ApiError::ConflictingFlags(
                "保持原罐与分罐不能同时设置".to_string(),
            ));
        }
        if request.enable_blend && request.is_split {
            return Err(ApiError::ConflictingFlags(
                "启用混酿与分罐不能同时设置".to_string(),
            ));
        }
        if request.enable_blend && request.blend_target_lot_id.is_none() {
            return Err(ApiError::InvalidInput(
                "启用混酿时必须提供目标单元".to_string(),
            ));
        }
        if request.allocations.len() > 1 && !request.is_split && !request.enable_blend {
            return Err(ApiError::InvalidInput(
                "提供多个目标罐体时必须声明分罐".to_string(),
            ));
        }
        if request.is_split && request.allocations.len() < 2 {
            return Err(ApiError::InvalidInput(
                "分罐至少需要两个目标罐体".to_string(),
            ));
        }

        Ok(())
    }

    /// 解析流转模式并产出执行计划 (只读)
    pub fn resolve(conn: &Connection, request: &TransitionRequest) -> ApiResult<TransitionPlan> {
        Self::check_flag_conflicts(request)?;

        let batch = BatchRepository::find_by_id_in(conn, &request.tenant_id, &request.batch_id)?
            .ok_or_else(|| ApiError::BatchNotFound(request.batch_id.clone()))?;

        // 规则 1: 原罐转相
        // 要求来源单元确实有 ACTIVE 发酵占用;否则落入后续规则
        if request.keep_same_tank {
            let (current, parent) = Self::resolve_source_lot(conn, request)?;
            if let Some(lot) = &current {
                if let Some(assignment) =
                    TankAssignmentRepository::find_active_fermentation_by_lot_in(
                        conn,
                        &request.tenant_id,
                        &lot.lot_id,
                    )?
                {
                    tracing::debug!(
                        lot_id = %lot.lot_id,
                        tank_id = %assignment.tank_id,
                        "模式解析: 原罐转相"
                    );
                    return Ok(TransitionPlan {
                        mode: TransitionMode::StayInTank,
                        batch,
                        current_lot: current,
                        structural_parent: parent,
                        stay_assignment: Some(assignment),
                        blend_target: None,
                        source_lot_batch: None,
                    });
                }
            }
        }

        // 规则 2: 混酿
        if request.enable_blend {
            let target_id = request
                .blend_target_lot_id
                .as_deref()
                .ok_or_else(|| ApiError::InvalidInput("启用混酿时必须提供目标单元".to_string()))?;
            let target = LotRepository::find_by_id_in(conn, &request.tenant_id, target_id)?
                .ok_or_else(|| ApiError::LotNotFound(target_id.to_string()))?;
            if target.status == LotStatus::Completed {
                return Err(ApiError::InvalidInput(format!(
                    "混酿目标单元{}已完结",
                    target.lot_code
                )));
            }

            let (current, parent) = Self::resolve_source_lot(conn, request)?;
            let lot = current.ok_or_else(|| {
                ApiError::LotNotFound(format!("批次{}没有可混酿的酒液单元", request.batch_id))
            })?;
            let link = LotBatchRepository::find_by_batch_and_lot_in(
                conn,
                &request.tenant_id,
                &request.batch_id,
                &lot.lot_id,
            )?
            .ok_or_else(|| {
                ApiError::InvalidInput(format!(
                    "批次{}与来源单元{}之间缺少关联行",
                    request.batch_id, lot.lot_code
                ))
            })?;

            tracing::debug!(
                source_lot = %lot.lot_id,
                target_lot = %target.lot_id,
                volume_l = link.volume_l,
                "模式解析: 混酿"
            );
            return Ok(TransitionPlan {
                mode: TransitionMode::Blend,
                batch,
                current_lot: Some(lot),
                structural_parent: parent,
                stay_assignment: None,
                blend_target: Some(target),
                source_lot_batch: Some(link),
            });
        }

        // 规则 3: 单罐直转 / 分罐
        if !request.allocations.is_empty() {
            let (current, parent) = Self::resolve_source_lot(conn, request)?;
            let mode = if request.allocations.len() == 1 {
                TransitionMode::DirectTransfer
            } else {
                TransitionMode::Split
            };
            tracing::debug!(
                mode = %mode,
                current_lot = ?current.as_ref().map(|l| l.lot_id.as_str()),
                allocation_count = request.allocations.len(),
                "模式解析: 罐体转移"
            );
            return Ok(TransitionPlan {
                mode,
                batch,
                current_lot: current,
                structural_parent: parent,
                stay_assignment: None,
                blend_target: None,
                source_lot_batch: None,
            });
        }

        // 规则 4: 无可用罐体
        Err(ApiError::TanksUnavailable("未提供目标罐体".to_string()))
    }

    /// 对照酒液图谱解析来源单元
    ///
    /// 返回 (当前单元, 结构父单元)。批次可能因历史分罐拥有 0/1/N 个单元:
    /// - 显式来源为带未处理发酵子单元的父单元 → 取指定子单元,未指定则取编号最小者
    /// - 显式来源为叶子单元 → 直接处理
    /// - 未指定来源但存在先前分罐的子单元 → 取编号最小的未处理子单元,连带其结构父单元
    /// - 单一仍在发酵的单元 → 常规场景
    /// - 尚无发酵单元 → 返回 None,由执行引擎新建
    fn resolve_source_lot(
        conn: &Connection,
        request: &TransitionRequest,
    ) -> ApiResult<(Option<Lot>, Option<Lot>)> {
        if let Some(source_lot_id) = &request.source_lot_id {
            let lot = LotRepository::find_by_id_in(conn, &request.tenant_id, source_lot_id)?
                .ok_or_else(|| ApiError::LotNotFound(source_lot_id.clone()))?;

            let children: Vec<Lot> =
                LotRepository::find_children_in(conn, &request.tenant_id, &lot.lot_id)?
                    .into_iter()
                    .filter(|c| c.is_unprocessed_fermentation())
                    .collect();

            if !children.is_empty() {
                // 父单元: 一次只处理一个未处理子单元,其余由后续请求处理
                let chosen = match &request.child_lot_id {
                    Some(child_id) => children
                        .iter()
                        .find(|c| &c.lot_id == child_id)
                        .cloned()
                        .ok_or_else(|| {
                            ApiError::InvalidInput(format!(
                                "指定的子单元{}不在待处理范围内",
                                child_id
                            ))
                        })?,
                    None => children[0].clone(),
                };
                return Ok((Some(chosen), None));
            }

            return Ok((Some(lot), None));
        }

        // 未指定来源单元: 从批次关联的单元图谱推断
        let lots = LotRepository::find_by_batch_in(conn, &request.tenant_id, &request.batch_id)?;

        // 先前分罐留下的子单元优先
        if let Some(child) = lots
            .iter()
            .find(|l| l.is_child() && l.is_unprocessed_fermentation())
        {
            let parent = match &child.parent_lot_id {
                Some(parent_id) => {
                    LotRepository::find_by_id_in(conn, &request.tenant_id, parent_id)?
                }
                None => None,
            };
            return Ok((Some(child.clone()), parent));
        }

        // 单一仍在发酵的单元
        if let Some(lot) = lots
            .iter()
            .find(|l| !l.is_child() && l.is_unprocessed_fermentation())
        {
            return Ok((Some(lot.clone()), None));
        }

        // 尚无发酵单元
        Ok((None, None))
    }
}

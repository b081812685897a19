// ==========================================
// 精酿生产管理系统 - 转罐/分罐执行引擎
// ==========================================
// 职责: 在调用方持有的事务内执行原罐转相、单罐直转、分罐
// 红线: 同一罐体的后继占用必须在前序占用关闭之后开启,且在同一事务内
// 红线: 分罐嵌套不超过一层;混酿目标单元不可分罐
// 业务时间: 占用关闭的 actual_end 取请求的计划开始,不取墙钟
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::lot::{Lot, LotBatch};
use crate::domain::tank::{Tank, TankAssignment};
use crate::domain::transfer::Transfer;
use crate::domain::types::{
    AssignmentStatus, LotPhase, LotStatus, TankStatus, TransitionMode,
};
use crate::engine::events::{TimelineEvent, TimelineEventType};
use crate::engine::mode_resolver::{TransitionPlan, TransitionRequest};
use crate::repository::lot_repo::{LotBatchRepository, LotRepository};
use crate::repository::tank_repo::{TankAssignmentRepository, TankRepository};
use crate::repository::transfer_repo::TransferRepository;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::collections::HashSet;
use uuid::Uuid;

// ==========================================
// ExecutionOutcome - 引擎执行结果
// ==========================================
// 事务内产生的全部结果与提交后动作所需的线索
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// 解析出的流转模式
    pub mode: TransitionMode,
    /// 结果单元 (转相后的当前单元;分罐时为完结的父单元)
    pub lot: Lot,
    /// 新开启的占用记录
    pub new_assignments: Vec<TankAssignment>,
    /// 被释放的罐体
    pub released_tank_ids: Vec<String>,
    /// 本次触碰过的罐体 (行政镜像同步范围)
    pub touched_tank_ids: Vec<String>,
    /// 受影响批次 (派生状态重算范围)
    pub affected_batch_ids: Vec<String>,
    /// 提交后发布的时间线事件
    pub events: Vec<TimelineEvent>,
    /// 结果摘要
    pub summary: String,
}

impl ExecutionOutcome {
    /// 去重追加受影响批次
    pub fn add_affected_batch(&mut self, batch_id: &str) {
        if !self.affected_batch_ids.iter().any(|b| b == batch_id) {
            self.affected_batch_ids.push(batch_id.to_string());
        }
    }
}

// ==========================================
// TransferEngine - 转罐/分罐引擎
// ==========================================
pub struct TransferEngine;

impl TransferEngine {
    /// 执行原罐转相
    ///
    /// 罐体不变: 关闭旧发酵占用,同罐开启后熟占用,体积不变,罐体不释放
    pub fn execute_stay_in_tank(
        conn: &Connection,
        plan: &TransitionPlan,
        request: &TransitionRequest,
    ) -> ApiResult<ExecutionOutcome> {
        let lot = plan
            .current_lot
            .as_ref()
            .ok_or_else(|| ApiError::InternalError("原罐转相缺少当前单元".to_string()))?;
        let assignment = plan
            .stay_assignment
            .as_ref()
            .ok_or_else(|| ApiError::InternalError("原罐转相缺少发酵占用".to_string()))?;
        Self::ensure_fermentation(lot)?;

        let now = chrono::Local::now().naive_local();

        // 关闭旧占用,实际结束取计划开始
        TankAssignmentRepository::complete_in(
            conn,
            &assignment.assignment_id,
            request.planned_start,
            now,
        )?;

        // 同罐开启后熟占用,体积沿用
        let new_assignment = TankAssignment {
            assignment_id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id.clone(),
            tank_id: assignment.tank_id.clone(),
            lot_id: lot.lot_id.clone(),
            phase: LotPhase::Conditioning,
            status: AssignmentStatus::Active,
            planned_start: request.planned_start,
            planned_end: request.planned_end,
            actual_end: None,
            planned_volume_l: assignment.planned_volume_l,
            actual_volume_l: None,
            created_at: now,
            updated_at: now,
        };
        TankAssignmentRepository::create_in(conn, &new_assignment)?;

        // 单元转相
        LotRepository::update_phase_status_in(
            conn,
            &request.tenant_id,
            &lot.lot_id,
            LotPhase::Conditioning,
            LotStatus::Active,
            now,
        )?;

        // 罐体仍被占用,阶段翻转
        TankRepository::set_occupied_in(
            conn,
            &request.tenant_id,
            &assignment.tank_id,
            &lot.lot_id,
            LotPhase::Conditioning,
            now,
        )?;

        let tank_code = TankRepository::find_by_id_in(conn, &request.tenant_id, &assignment.tank_id)?
            .map(|t| t.tank_code)
            .unwrap_or_else(|| assignment.tank_id.clone());

        // 原罐转相也记一条流水,来源与目标为同一罐体
        Self::append_transfer(
            conn,
            request,
            &lot.lot_id,
            Some(assignment.tank_id.clone()),
            &assignment.tank_id,
            assignment.planned_volume_l,
            TransitionMode::StayInTank,
        )?;

        let result_lot = Self::reload_lot(conn, &request.tenant_id, &lot.lot_id)?;
        let mut affected_batch_ids =
            LotBatchRepository::batch_ids_for_lot_in(conn, &request.tenant_id, &lot.lot_id)?;
        if !affected_batch_ids.iter().any(|b| b == &request.batch_id) {
            affected_batch_ids.push(request.batch_id.clone());
        }

        let summary = format!(
            "原罐转相完成: 单元{}在罐体{}进入后熟 ({:.0}L)",
            result_lot.lot_code, tank_code, assignment.planned_volume_l
        );
        tracing::info!(
            lot_id = %result_lot.lot_id,
            tank_id = %assignment.tank_id,
            "原罐转相执行完成"
        );

        let events = vec![TimelineEvent {
            tenant_id: request.tenant_id.clone(),
            batch_id: request.batch_id.clone(),
            lot_id: result_lot.lot_id.clone(),
            event_type: TimelineEventType::PhaseTransitioned,
            tank_ids: vec![assignment.tank_id.clone()],
            volume_l: Some(assignment.planned_volume_l),
            occurred_at: request.planned_start,
            actor: request.user_id.clone(),
            detail: Some(summary.clone()),
        }];

        Ok(ExecutionOutcome {
            mode: TransitionMode::StayInTank,
            lot: result_lot,
            new_assignments: vec![new_assignment],
            released_tank_ids: Vec::new(),
            touched_tank_ids: vec![assignment.tank_id.clone()],
            affected_batch_ids,
            events,
            summary,
        })
    }

    /// 执行单罐直转 / 分罐
    ///
    /// # 参数
    /// - `dest_tanks`: 校验器返回的目标罐体,与分配列表同序
    pub fn execute_transfer(
        conn: &Connection,
        plan: &TransitionPlan,
        request: &TransitionRequest,
        dest_tanks: &[Tank],
        post_transfer_status: TankStatus,
    ) -> ApiResult<ExecutionOutcome> {
        let now = chrono::Local::now().naive_local();
        let total_volume_l: f64 = request.allocations.iter().map(|a| a.volume_l).sum();

        // 1. 解析或新建当前单元
        let lot = match &plan.current_lot {
            Some(lot) => {
                Self::ensure_fermentation(lot)?;
                lot.clone()
            }
            None => {
                // 批次尚无发酵单元: 新建一个承接本次流转
                let lot = Lot {
                    lot_id: Uuid::new_v4().to_string(),
                    tenant_id: request.tenant_id.clone(),
                    lot_code: plan.batch.batch_code.clone(),
                    phase: LotPhase::Fermentation,
                    status: LotStatus::Active,
                    planned_volume_l: total_volume_l,
                    parent_lot_id: None,
                    is_blend_target: false,
                    blended_at: None,
                    created_at: now,
                    updated_at: now,
                };
                LotRepository::create_in(conn, &lot)?;
                LotBatchRepository::create_in(
                    conn,
                    &LotBatch {
                        lot_batch_id: Uuid::new_v4().to_string(),
                        tenant_id: request.tenant_id.clone(),
                        lot_id: lot.lot_id.clone(),
                        batch_id: request.batch_id.clone(),
                        volume_l: total_volume_l,
                        percentage: 100.0,
                        created_at: now,
                    },
                )?;
                tracing::info!(lot_id = %lot.lot_id, "批次尚无发酵单元,已新建");
                lot
            }
        };

        // 2. 关闭开放中的发酵占用,释放非目标罐体
        let dest_ids: HashSet<&str> = request
            .allocations
            .iter()
            .map(|a| a.tank_id.as_str())
            .collect();
        let mut close_lot_ids = vec![lot.lot_id.clone()];
        if let Some(parent) = &plan.structural_parent {
            close_lot_ids.push(parent.lot_id.clone());
        }

        let mut released_tank_ids = Vec::new();
        let mut source_tank_id: Option<String> = None;
        for close_lot_id in &close_lot_ids {
            let open = TankAssignmentRepository::find_open_fermentation_by_lot_in(
                conn,
                &request.tenant_id,
                close_lot_id,
            )?;
            for assignment in open {
                TankAssignmentRepository::complete_in(
                    conn,
                    &assignment.assignment_id,
                    request.planned_start,
                    now,
                )?;
                if source_tank_id.is_none() && close_lot_id == &lot.lot_id {
                    source_tank_id = Some(assignment.tank_id.clone());
                }
                if !dest_ids.contains(assignment.tank_id.as_str()) {
                    TankRepository::release_in(
                        conn,
                        &request.tenant_id,
                        &assignment.tank_id,
                        post_transfer_status,
                        now,
                    )?;
                    released_tank_ids.push(assignment.tank_id.clone());
                }
            }
        }
        let source_tank_id = source_tank_id.or_else(|| request.source_tank_id.clone());

        // 3/4. 按分配项数量走单转或分罐
        let (result_lot, new_assignments, events, summary) = if request.allocations.len() == 1 {
            Self::apply_direct_transfer(
                conn,
                request,
                &lot,
                &dest_tanks[0],
                source_tank_id.clone(),
                now,
            )?
        } else {
            Self::apply_split(
                conn,
                request,
                &lot,
                dest_tanks,
                total_volume_l,
                source_tank_id.clone(),
                now,
            )?
        };

        // 仅"先前分罐留下子单元"的场景: 最后一个子单元处理完后父单元完结
        if let Some(parent) = &plan.structural_parent {
            let remaining = LotRepository::find_children_in(conn, &request.tenant_id, &parent.lot_id)?
                .into_iter()
                .filter(|c| c.is_unprocessed_fermentation())
                .count();
            if remaining == 0 && parent.status != LotStatus::Completed {
                LotRepository::mark_completed_in(conn, &request.tenant_id, &parent.lot_id, now)?;
                tracing::info!(parent_lot_id = %parent.lot_id, "全部子单元处理完毕,结构父单元完结");
            }
        }

        // 受影响批次与触碰罐体
        let mut affected_batch_ids =
            LotBatchRepository::batch_ids_for_lot_in(conn, &request.tenant_id, &lot.lot_id)?;
        if !affected_batch_ids.iter().any(|b| b == &request.batch_id) {
            affected_batch_ids.push(request.batch_id.clone());
        }
        let mut touched_tank_ids: Vec<String> =
            dest_tanks.iter().map(|t| t.tank_id.clone()).collect();
        for tank_id in &released_tank_ids {
            if !touched_tank_ids.iter().any(|t| t == tank_id) {
                touched_tank_ids.push(tank_id.clone());
            }
        }

        Ok(ExecutionOutcome {
            mode: if request.allocations.len() == 1 {
                TransitionMode::DirectTransfer
            } else {
                TransitionMode::Split
            },
            lot: result_lot,
            new_assignments,
            released_tank_ids,
            touched_tank_ids,
            affected_batch_ids,
            events,
            summary,
        })
    }

    /// 单罐直转: 单元整体转入唯一目标罐体
    fn apply_direct_transfer(
        conn: &Connection,
        request: &TransitionRequest,
        lot: &Lot,
        dest_tank: &Tank,
        source_tank_id: Option<String>,
        now: NaiveDateTime,
    ) -> ApiResult<(Lot, Vec<TankAssignment>, Vec<TimelineEvent>, String)> {
        let allocation = &request.allocations[0];

        // 单元转相,状态保持在产
        LotRepository::update_phase_status_in(
            conn,
            &request.tenant_id,
            &lot.lot_id,
            LotPhase::Conditioning,
            LotStatus::Active,
            now,
        )?;

        let assignment = TankAssignment {
            assignment_id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id.clone(),
            tank_id: dest_tank.tank_id.clone(),
            lot_id: lot.lot_id.clone(),
            phase: LotPhase::Conditioning,
            status: AssignmentStatus::Active,
            planned_start: request.planned_start,
            planned_end: request.planned_end,
            actual_end: None,
            planned_volume_l: allocation.volume_l,
            actual_volume_l: None,
            created_at: now,
            updated_at: now,
        };
        TankAssignmentRepository::create_in(conn, &assignment)?;
        TankRepository::set_occupied_in(
            conn,
            &request.tenant_id,
            &dest_tank.tank_id,
            &lot.lot_id,
            LotPhase::Conditioning,
            now,
        )?;

        Self::append_transfer(
            conn,
            request,
            &lot.lot_id,
            source_tank_id,
            &dest_tank.tank_id,
            allocation.volume_l,
            TransitionMode::DirectTransfer,
        )?;

        let result_lot = Self::reload_lot(conn, &request.tenant_id, &lot.lot_id)?;
        let summary = format!(
            "单罐直转完成: 单元{}转入罐体{} ({:.0}L)",
            result_lot.lot_code, dest_tank.tank_code, allocation.volume_l
        );
        tracing::info!(
            lot_id = %result_lot.lot_id,
            dest_tank = %dest_tank.tank_id,
            volume_l = allocation.volume_l,
            "单罐直转执行完成"
        );

        let events = vec![TimelineEvent {
            tenant_id: request.tenant_id.clone(),
            batch_id: request.batch_id.clone(),
            lot_id: result_lot.lot_id.clone(),
            event_type: TimelineEventType::PhaseTransitioned,
            tank_ids: vec![dest_tank.tank_id.clone()],
            volume_l: Some(allocation.volume_l),
            occurred_at: request.planned_start,
            actor: request.user_id.clone(),
            detail: Some(summary.clone()),
        }];

        Ok((result_lot, vec![assignment], events, summary))
    }

    /// 分罐: 按分配项创建子单元,父单元完结,血缘移交子单元
    fn apply_split(
        conn: &Connection,
        request: &TransitionRequest,
        lot: &Lot,
        dest_tanks: &[Tank],
        total_volume_l: f64,
        source_tank_id: Option<String>,
        now: NaiveDateTime,
    ) -> ApiResult<(Lot, Vec<TankAssignment>, Vec<TimelineEvent>, String)> {
        // 分罐防护: 嵌套不超过一层,混酿目标不可分罐
        if lot.is_child() {
            return Err(ApiError::InvalidInput(format!(
                "单元{}已是分罐子单元,分罐嵌套不能超过一层",
                lot.lot_code
            )));
        }
        if lot.is_blend_target {
            return Err(ApiError::InvalidInput(format!(
                "单元{}是混酿目标,不可分罐",
                lot.lot_code
            )));
        }
        if request.allocations.len() > 26 {
            return Err(ApiError::InvalidInput(
                "分罐目标罐体数量超出上限".to_string(),
            ));
        }
        if total_volume_l <= 0.0 {
            return Err(ApiError::InvalidInput("分罐总体积必须为正".to_string()));
        }

        let mut new_assignments = Vec::with_capacity(request.allocations.len());
        let mut tank_ids = Vec::with_capacity(request.allocations.len());

        for (idx, allocation) in request.allocations.iter().enumerate() {
            let dest_tank = &dest_tanks[idx];
            let suffix = (b'A' + idx as u8) as char;

            // 子单元承接在产血缘
            let child = Lot {
                lot_id: Uuid::new_v4().to_string(),
                tenant_id: request.tenant_id.clone(),
                lot_code: format!("{}-{}", lot.lot_code, suffix),
                phase: LotPhase::Conditioning,
                status: LotStatus::Active,
                planned_volume_l: allocation.volume_l,
                parent_lot_id: Some(lot.lot_id.clone()),
                is_blend_target: false,
                blended_at: None,
                created_at: now,
                updated_at: now,
            };
            LotRepository::create_in(conn, &child)?;

            LotBatchRepository::create_in(
                conn,
                &LotBatch {
                    lot_batch_id: Uuid::new_v4().to_string(),
                    tenant_id: request.tenant_id.clone(),
                    lot_id: child.lot_id.clone(),
                    batch_id: request.batch_id.clone(),
                    volume_l: allocation.volume_l,
                    percentage: allocation.volume_l / total_volume_l * 100.0,
                    created_at: now,
                },
            )?;

            let assignment = TankAssignment {
                assignment_id: Uuid::new_v4().to_string(),
                tenant_id: request.tenant_id.clone(),
                tank_id: dest_tank.tank_id.clone(),
                lot_id: child.lot_id.clone(),
                phase: LotPhase::Conditioning,
                status: AssignmentStatus::Active,
                planned_start: request.planned_start,
                planned_end: request.planned_end,
                actual_end: None,
                planned_volume_l: allocation.volume_l,
                actual_volume_l: None,
                created_at: now,
                updated_at: now,
            };
            TankAssignmentRepository::create_in(conn, &assignment)?;
            TankRepository::set_occupied_in(
                conn,
                &request.tenant_id,
                &dest_tank.tank_id,
                &child.lot_id,
                LotPhase::Conditioning,
                now,
            )?;

            Self::append_transfer(
                conn,
                request,
                &child.lot_id,
                source_tank_id.clone(),
                &dest_tank.tank_id,
                allocation.volume_l,
                TransitionMode::Split,
            )?;

            tank_ids.push(dest_tank.tank_id.clone());
            new_assignments.push(assignment);
        }

        // 父单元完结,血缘移交子单元
        LotRepository::mark_completed_in(conn, &request.tenant_id, &lot.lot_id, now)?;

        let result_lot = Self::reload_lot(conn, &request.tenant_id, &lot.lot_id)?;
        let summary = format!(
            "分罐完成: 单元{}拆分为{}个子单元 (合计{:.0}L)",
            result_lot.lot_code,
            request.allocations.len(),
            total_volume_l
        );
        tracing::info!(
            lot_id = %result_lot.lot_id,
            child_count = request.allocations.len(),
            "分罐执行完成"
        );

        let events = vec![TimelineEvent {
            tenant_id: request.tenant_id.clone(),
            batch_id: request.batch_id.clone(),
            lot_id: result_lot.lot_id.clone(),
            event_type: TimelineEventType::LotSplit,
            tank_ids,
            volume_l: Some(total_volume_l),
            occurred_at: request.planned_start,
            actor: request.user_id.clone(),
            detail: Some(summary.clone()),
        }];

        Ok((result_lot, new_assignments, events, summary))
    }

    /// 阶段单调性防护: 只有仍在发酵的单元可以流转
    fn ensure_fermentation(lot: &Lot) -> ApiResult<()> {
        if lot.phase >= LotPhase::Conditioning {
            return Err(ApiError::InvalidInput(format!(
                "单元{}已进入后熟阶段,阶段不可回退",
                lot.lot_code
            )));
        }
        if lot.status == LotStatus::Completed {
            return Err(ApiError::InvalidInput(format!(
                "单元{}已完结,不可流转",
                lot.lot_code
            )));
        }
        Ok(())
    }

    /// 追加转移流水
    fn append_transfer(
        conn: &Connection,
        request: &TransitionRequest,
        lot_id: &str,
        source_tank_id: Option<String>,
        dest_tank_id: &str,
        volume_l: f64,
        mode: TransitionMode,
    ) -> ApiResult<()> {
        let now = chrono::Local::now().naive_local();
        TransferRepository::insert_in(
            conn,
            &Transfer {
                transfer_id: Uuid::new_v4().to_string(),
                tenant_id: request.tenant_id.clone(),
                batch_id: request.batch_id.clone(),
                lot_id: lot_id.to_string(),
                source_tank_id,
                dest_tank_id: dest_tank_id.to_string(),
                volume_l,
                mode,
                transferred_at: request.planned_start,
                note: request.note.clone(),
                created_at: now,
            },
        )?;
        Ok(())
    }

    /// 重新加载单元的最新状态
    fn reload_lot(conn: &Connection, tenant_id: &str, lot_id: &str) -> ApiResult<Lot> {
        LotRepository::find_by_id_in(conn, tenant_id, lot_id)?
            .ok_or_else(|| ApiError::LotNotFound(lot_id.to_string()))
    }
}

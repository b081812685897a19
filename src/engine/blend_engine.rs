// ==========================================
// 精酿生产管理系统 - 混酿执行引擎
// ==========================================
// 职责: 在调用方持有的事务内把移动批次的贡献并入既有目标单元
// 红线: 容量复检在任何释放/完结写入之前完成,超限则零副作用返回
// 红线: 目标单元保持既有占用,只追加体积,不开新占用
// 双重血缘: 来源单元完结但其关联行保留 (发酵史 + 后熟新关联)
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::lot::LotBatch;
use crate::domain::transfer::Transfer;
use crate::domain::types::{LotStatus, TankStatus, TransitionMode};
use crate::engine::codegen::BlendCodeGenerator;
use crate::engine::events::{TimelineEvent, TimelineEventType};
use crate::engine::mode_resolver::{TransitionPlan, TransitionRequest};
use crate::engine::transfer_engine::ExecutionOutcome;
use crate::engine::validator::CapacityValidator;
use crate::repository::lot_repo::{LotBatchRepository, LotRepository};
use crate::repository::tank_repo::{TankAssignmentRepository, TankRepository};
use crate::repository::transfer_repo::TransferRepository;
use rusqlite::Connection;
use uuid::Uuid;

// ==========================================
// BlendEngine - 混酿引擎
// ==========================================
pub struct BlendEngine;

impl BlendEngine {
    /// 执行混酿
    pub fn execute(
        conn: &Connection,
        plan: &TransitionPlan,
        request: &TransitionRequest,
        post_transfer_status: TankStatus,
        blend_code_prefix: &str,
        code_generator: &dyn BlendCodeGenerator,
    ) -> ApiResult<ExecutionOutcome> {
        let target = plan
            .blend_target
            .as_ref()
            .ok_or_else(|| ApiError::InternalError("混酿缺少目标单元".to_string()))?;
        let source = plan
            .current_lot
            .as_ref()
            .ok_or_else(|| ApiError::InternalError("混酿缺少来源单元".to_string()))?;
        let link = plan
            .source_lot_batch
            .as_ref()
            .ok_or_else(|| ApiError::InternalError("混酿缺少批次关联行".to_string()))?;
        let contributed_volume_l = link.volume_l;

        let now = chrono::Local::now().naive_local();

        // 目标单元的既有 ACTIVE 占用
        let target_assignments = TankAssignmentRepository::find_active_by_lot_in(
            conn,
            &request.tenant_id,
            &target.lot_id,
        )?;
        let target_assignment = target_assignments.first().ok_or_else(|| {
            ApiError::TanksUnavailable(format!(
                "混酿目标单元{}没有进行中的罐体占用",
                target.lot_code
            ))
        })?;

        // 容量复检: 任何写入之前
        let target_tank = CapacityValidator::validate_blend_capacity(
            conn,
            &request.tenant_id,
            &target_assignment.tank_id,
            contributed_volume_l,
        )?;

        // 1. 释放移动批次单元的发酵占用
        let open = TankAssignmentRepository::find_open_fermentation_by_lot_in(
            conn,
            &request.tenant_id,
            &source.lot_id,
        )?;
        let mut released_tank_ids = Vec::new();
        let mut source_tank_id: Option<String> = None;
        for assignment in open {
            TankAssignmentRepository::complete_in(
                conn,
                &assignment.assignment_id,
                request.planned_start,
                now,
            )?;
            if source_tank_id.is_none() {
                source_tank_id = Some(assignment.tank_id.clone());
            }
            if assignment.tank_id != target_tank.tank_id {
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
        let source_tank_id = source_tank_id.or_else(|| request.source_tank_id.clone());

        // 2. 来源单元完结,历史关联行保留
        if source.lot_id != target.lot_id && source.status != LotStatus::Completed {
            LotRepository::mark_completed_in(conn, &request.tenant_id, &source.lot_id, now)?;
        }

        // 3. 新关联行 + 目标单元内百分比重算
        LotBatchRepository::create_in(
            conn,
            &LotBatch {
                lot_batch_id: Uuid::new_v4().to_string(),
                tenant_id: request.tenant_id.clone(),
                lot_id: target.lot_id.clone(),
                batch_id: request.batch_id.clone(),
                volume_l: contributed_volume_l,
                percentage: 0.0, // 占位,随即与兄弟行一起重算
                created_at: now,
            },
        )?;

        let rows =
            LotBatchRepository::find_by_lot_in(conn, &request.tenant_id, &target.lot_id)?;
        let total_volume_l: f64 = rows.iter().map(|r| r.volume_l).sum();
        if total_volume_l > 0.0 {
            for row in &rows {
                LotBatchRepository::update_percentage_in(
                    conn,
                    &row.lot_batch_id,
                    row.volume_l / total_volume_l * 100.0,
                )?;
            }
        }

        // 4. 目标单元首次成为混酿目标时换用混酿编号
        if !target.lot_code.starts_with(blend_code_prefix) {
            let blend_code = format!(
                "{}{}",
                blend_code_prefix,
                code_generator.generate(&request.tenant_id)
            );
            LotRepository::apply_blend_code_in(
                conn,
                &request.tenant_id,
                &target.lot_id,
                &blend_code,
                request.planned_start,
                now,
            )?;
            tracing::info!(
                lot_id = %target.lot_id,
                blend_code = %blend_code,
                "目标单元换用混酿编号"
            );
        }

        // 5. 既有占用吸收追加体积
        TankAssignmentRepository::add_planned_volume_in(
            conn,
            &target_assignment.assignment_id,
            contributed_volume_l,
            now,
        )?;

        // 流水
        TransferRepository::insert_in(
            conn,
            &Transfer {
                transfer_id: Uuid::new_v4().to_string(),
                tenant_id: request.tenant_id.clone(),
                batch_id: request.batch_id.clone(),
                lot_id: target.lot_id.clone(),
                source_tank_id,
                dest_tank_id: target_tank.tank_id.clone(),
                volume_l: contributed_volume_l,
                mode: TransitionMode::Blend,
                transferred_at: request.planned_start,
                note: request.note.clone(),
                created_at: now,
            },
        )?;

        // 受影响批次: 共享目标单元的全部批次 + 移动批次 + 共享来源单元的批次
        let result_lot = LotRepository::find_by_id_in(conn, &request.tenant_id, &target.lot_id)?
            .ok_or_else(|| ApiError::LotNotFound(target.lot_id.clone()))?;

        let summary = format!(
            "混酿完成: 批次{}以{:.0}L并入单元{} (罐体{})",
            plan.batch.batch_code, contributed_volume_l, result_lot.lot_code, target_tank.tank_code
        );
        tracing::info!(
            source_lot = %source.lot_id,
            target_lot = %target.lot_id,
            volume_l = contributed_volume_l,
            "混酿执行完成"
        );

        let mut touched_tank_ids = vec![target_tank.tank_id.clone()];
        for tank_id in &released_tank_ids {
            if !touched_tank_ids.iter().any(|t| t == tank_id) {
                touched_tank_ids.push(tank_id.clone());
            }
        }

        let mut outcome = ExecutionOutcome {
            mode: TransitionMode::Blend,
            lot: result_lot,
            new_assignments: Vec::new(),
            released_tank_ids,
            touched_tank_ids,
            affected_batch_ids: Vec::new(),
            events: vec![TimelineEvent {
                tenant_id: request.tenant_id.clone(),
                batch_id: request.batch_id.clone(),
                lot_id: target.lot_id.clone(),
                event_type: TimelineEventType::LotBlended,
                tank_ids: vec![target_tank.tank_id.clone()],
                volume_l: Some(contributed_volume_l),
                occurred_at: request.planned_start,
                actor: request.user_id.clone(),
                detail: Some(summary.clone()),
            }],
            summary,
        };

        for batch_id in
            LotBatchRepository::batch_ids_for_lot_in(conn, &request.tenant_id, &target.lot_id)?
        {
            outcome.add_affected_batch(&batch_id);
        }
        for batch_id in
            LotBatchRepository::batch_ids_for_lot_in(conn, &request.tenant_id, &source.lot_id)?
        {
            outcome.add_affected_batch(&batch_id);
        }
        outcome.add_affected_batch(&request.batch_id);

        Ok(outcome)
    }
}

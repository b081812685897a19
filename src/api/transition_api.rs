// ==========================================
// 精酿生产管理系统 - 阶段流转 API
// ==========================================
// 职责: 阶段流转的事务协调器
// 流程: 请求校验 → 模式解析 → 容量/占用校验 → 执行引擎
//       → 派生状态重算 → 提交 → 提交后尽力而为动作
// 红线: 解析、校验、写入在同一把连接锁与同一事务内完成,
//       全部落库或全部回滚;失败请求零副作用
// 例外: 罐体行政镜像与测量记录为提交后的尽力而为写入,
//       失败只记日志,不影响主流程
// ==========================================

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::domain::lot::Lot;
use crate::domain::tank::TankAssignment;
use crate::domain::transfer::LotMeasurement;
use crate::domain::types::TransitionMode;
use crate::engine::blend_engine::BlendEngine;
use crate::engine::codegen::BlendCodeGenerator;
use crate::engine::events::{
    OptionalTimelinePublisher, TimelineEvent, TimelineEventPublisher, TimelineEventType,
};
use crate::engine::mode_resolver::{ModeResolver, TransitionRequest};
use crate::engine::status_derivation::BatchStatusDerivationService;
use crate::engine::transfer_engine::{ExecutionOutcome, TransferEngine};
use crate::engine::validator::CapacityValidator;
use crate::repository::tank_repo::TankRepository;
use crate::repository::transfer_repo::LotMeasurementRepository;

// ==========================================
// 响应 DTO
// ==========================================

/// 阶段流转响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResponse {
    /// 结果单元
    pub lot: Lot,
    /// 新开启的占用记录
    pub new_assignments: Vec<TankAssignment>,
    /// 解析出的流转模式
    pub mode: TransitionMode,
    /// 结果摘要
    pub summary: String,
}

// ==========================================
// PhaseTransitionApi - 阶段流转 API
// ==========================================

/// 阶段流转API
///
/// 职责：
/// 1. 请求级参数校验
/// 2. 事务协调（解析/校验/执行/派生状态重算同生共死）
/// 3. 提交后时间线事件发布与尽力而为写入
pub struct PhaseTransitionApi {
    conn: Arc<Mutex<Connection>>,
    config_manager: Arc<ConfigManager>,
    code_generator: Arc<dyn BlendCodeGenerator>,
    measurement_repo: LotMeasurementRepository,
    // 事件发布器（依赖倒置：引擎不感知时间线的消费方）
    timeline_publisher: OptionalTimelinePublisher,
}

impl PhaseTransitionApi {
    /// 创建新的PhaseTransitionApi实例
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config_manager: Arc<ConfigManager>,
        code_generator: Arc<dyn BlendCodeGenerator>,
        timeline_publisher: Option<Arc<dyn TimelineEventPublisher>>,
    ) -> Self {
        let timeline_publisher = match timeline_publisher {
            Some(p) => OptionalTimelinePublisher::with_publisher(p),
            None => OptionalTimelinePublisher::none(),
        };
        let measurement_repo = LotMeasurementRepository::new(conn.clone());

        Self {
            conn,
            config_manager,
            code_generator,
            measurement_repo,
            timeline_publisher,
        }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> ApiResult<MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", e)))
    }

    // ==========================================
    // 阶段流转接口
    // ==========================================

    /// 执行一次阶段流转 (发酵 → 后熟)
    ///
    /// # 返回
    /// - Ok(TransitionResponse): 结果单元、新占用、模式、摘要
    /// - Err(ApiError): 带机器可读 code 的类型化错误
    pub fn execute_transition(
        &self,
        request: &TransitionRequest,
    ) -> ApiResult<TransitionResponse> {
        // 参数验证
        if request.tenant_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("租户标识不能为空".to_string()));
        }
        if request.user_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作人不能为空".to_string()));
        }
        if request.batch_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("批次标识不能为空".to_string()));
        }
        if let Some(planned_end) = request.planned_end {
            if planned_end < request.planned_start {
                return Err(ApiError::InvalidInput(
                    "计划结束不能早于计划开始".to_string(),
                ));
            }
        }
        ModeResolver::check_flag_conflicts(request)?;

        // 配置读取在持锁之前完成 (配置管理器共享同一把连接锁)
        let post_transfer_status = self
            .config_manager
            .get_post_transfer_tank_status()
            .map_err(|e| ApiError::InternalError(format!("读取罐体流转配置失败: {}", e)))?;
        let blend_code_prefix = self
            .config_manager
            .get_blend_code_prefix()
            .map_err(|e| ApiError::InternalError(format!("读取混酿编号配置失败: {}", e)))?;

        tracing::info!(
            tenant_id = %request.tenant_id,
            batch_id = %request.batch_id,
            allocation_count = request.allocations.len(),
            keep_same_tank = request.keep_same_tank,
            is_split = request.is_split,
            enable_blend = request.enable_blend,
            "开始阶段流转"
        );

        // 持锁 + 单事务: 解析、校验、写入、派生状态重算同生共死
        let outcome = {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;

            let plan = ModeResolver::resolve(&tx, request)?;
            let mut outcome = match plan.mode {
                TransitionMode::StayInTank => {
                    TransferEngine::execute_stay_in_tank(&tx, &plan, request)?
                }
                TransitionMode::DirectTransfer | TransitionMode::Split => {
                    // 全部分配项在第一笔写入之前校验完毕
                    let moving_lot_id = plan.current_lot.as_ref().map(|l| l.lot_id.as_str());
                    let dest_tanks = CapacityValidator::validate_allocations(
                        &tx,
                        &request.tenant_id,
                        moving_lot_id,
                        &request.allocations,
                    )?;
                    TransferEngine::execute_transfer(
                        &tx,
                        &plan,
                        request,
                        &dest_tanks,
                        post_transfer_status,
                    )?
                }
                TransitionMode::Blend => BlendEngine::execute(
                    &tx,
                    &plan,
                    request,
                    post_transfer_status,
                    &blend_code_prefix,
                    self.code_generator.as_ref(),
                )?,
            };

            // 派生状态重算 (事务内)
            let affected_batch_ids = outcome.affected_batch_ids.clone();
            for batch_id in &affected_batch_ids {
                if let Some(new_status) = BatchStatusDerivationService::recompute_in(
                    &tx,
                    &request.tenant_id,
                    batch_id,
                )? {
                    outcome.events.push(TimelineEvent {
                        tenant_id: request.tenant_id.clone(),
                        batch_id: batch_id.clone(),
                        lot_id: outcome.lot.lot_id.clone(),
                        event_type: TimelineEventType::BatchStatusChanged,
                        tank_ids: Vec::new(),
                        volume_l: None,
                        occurred_at: request.planned_start,
                        actor: request.user_id.clone(),
                        detail: Some(format!("批次派生状态更新为{}", new_status)),
                    });
                }
            }

            tx.commit()
                .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;
            outcome
        };

        tracing::info!(
            mode = %outcome.mode,
            lot_id = %outcome.lot.lot_id,
            new_assignment_count = outcome.new_assignments.len(),
            "阶段流转已提交"
        );

        // ===== 提交后的尽力而为动作 =====
        self.publish_events(&outcome);
        self.sync_tank_reports(&request.tenant_id, &outcome.touched_tank_ids);
        if request.final_gravity.is_some() || request.temperature_c.is_some() {
            self.capture_measurement(request, &outcome.lot.lot_id, request.planned_start);
        }

        Ok(TransitionResponse {
            mode: outcome.mode,
            summary: outcome.summary,
            lot: outcome.lot,
            new_assignments: outcome.new_assignments,
        })
    }

    // ==========================================
    // 提交后的尽力而为动作
    // ==========================================

    /// 发布时间线事件 (即发即忘)
    fn publish_events(&self, outcome: &ExecutionOutcome) {
        for event in &outcome.events {
            if let Err(e) = self.timeline_publisher.publish(event.clone()) {
                tracing::warn!(
                    lot_id = %event.lot_id,
                    event_type = event.event_type.as_str(),
                    "时间线事件发布失败: {}",
                    e
                );
            }
        }
    }

    /// 同步罐体行政镜像 (幂等投影,事务外)
    fn sync_tank_reports(&self, tenant_id: &str, tank_ids: &[String]) {
        let now = chrono::Local::now().naive_local();
        let conn = match self.get_conn() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("罐体行政镜像同步跳过: {}", e);
                return;
            }
        };
        for tank_id in tank_ids {
            if let Err(e) = TankRepository::sync_report_in(&conn, tenant_id, tank_id, now) {
                tracing::warn!(tank_id = %tank_id, "罐体行政镜像同步失败: {}", e);
            }
        }
    }

    /// 写入测量记录 (尽力而为,事务外)
    fn capture_measurement(
        &self,
        request: &TransitionRequest,
        lot_id: &str,
        measured_at: NaiveDateTime,
    ) {
        let now = chrono::Local::now().naive_local();
        let measurement = LotMeasurement {
            measurement_id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id.clone(),
            lot_id: lot_id.to_string(),
            final_gravity: request.final_gravity,
            temperature_c: request.temperature_c,
            measured_at,
            created_at: now,
        };

        if let Err(e) = self.measurement_repo.insert(&measurement) {
            tracing::warn!(lot_id = %lot_id, "测量记录写入失败: {}", e);
        }
    }
}

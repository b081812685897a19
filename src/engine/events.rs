// ==========================================
// 精酿生产管理系统 - 引擎层时间线事件发布
// ==========================================
// 职责: 定义流转时间线事件发布 trait，实现依赖倒置
// 说明: Engine 层定义 trait，消费方 (通知/时间线展示) 实现适配器
// 事件为即发即忘,发布失败只记日志,不影响主流程
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 时间线事件类型
// ==========================================

/// 流转时间线事件类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineEventType {
    /// 酒液单元转相 (含原罐转相与单罐直转)
    PhaseTransitioned,
    /// 酒液单元分罐
    LotSplit,
    /// 酒液单元混酿
    LotBlended,
    /// 批次派生状态变更
    BatchStatusChanged,
    /// 罐体释放
    TankReleased,
}

impl TimelineEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            TimelineEventType::PhaseTransitioned => "PhaseTransitioned",
            TimelineEventType::LotSplit => "LotSplit",
            TimelineEventType::LotBlended => "LotBlended",
            TimelineEventType::BatchStatusChanged => "BatchStatusChanged",
            TimelineEventType::TankReleased => "TankReleased",
        }
    }
}

/// 流转时间线事件
///
/// 每个逻辑流转动作一条,事务提交后发布
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// 租户标识
    pub tenant_id: String,
    /// 生产批次 ID
    pub batch_id: String,
    /// 酒液单元 ID (事件主体)
    pub lot_id: String,
    /// 事件类型
    pub event_type: TimelineEventType,
    /// 涉及的罐体列表
    pub tank_ids: Vec<String>,
    /// 涉及体积 (升)
    pub volume_l: Option<f64>,
    /// 业务发生时间
    pub occurred_at: NaiveDateTime,
    /// 操作人
    pub actor: String,
    /// 事件描述
    pub detail: Option<String>,
}

impl TimelineEvent {
    /// 序列化为 JSON (供消费方落库或外发)
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 时间线事件发布者 Trait
///
/// Engine 层定义,消费方实现
/// 通过 trait 实现依赖倒置,引擎不感知事件的最终去向
pub trait TimelineEventPublisher: Send + Sync {
    /// 发布时间线事件
    ///
    /// # 返回
    /// - `Ok(event_ref)`: 事件引用 (如果支持) 或空字符串
    /// - `Err`: 发布失败
    fn publish(&self, event: TimelineEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要事件发布的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpTimelinePublisher;

impl TimelineEventPublisher for NoOpTimelinePublisher {
    fn publish(&self, event: TimelineEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpTimelinePublisher: 跳过事件发布 - lot_id={}, event_type={}",
            event.lot_id,
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn TimelineEventPublisher>> 的使用
pub struct OptionalTimelinePublisher {
    inner: Option<Arc<dyn TimelineEventPublisher>>,
}

impl OptionalTimelinePublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn TimelineEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件（如果有发布者）
    pub fn publish(&self, event: TimelineEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => {
                tracing::debug!(
                    "OptionalTimelinePublisher: 未配置发布者，跳过事件 - lot_id={}, event_type={}",
                    event.lot_id,
                    event.event_type.as_str()
                );
                Ok(String::new())
            }
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalTimelinePublisher {
    fn default() -> Self {
        Self::none()
    }
}

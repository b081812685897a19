// ==========================================
// 精酿生产管理系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod batch;
pub mod lot;
pub mod tank;
pub mod transfer;
pub mod types;

// 重导出核心类型
pub use batch::Batch;
pub use lot::{Lot, LotBatch};
pub use tank::{Tank, TankAssignment, TankReport};
pub use transfer::{LotMeasurement, Transfer};
pub use types::{
    AssignmentStatus, BatchStatus, LotPhase, LotStatus, TankStatus, TransitionMode,
};

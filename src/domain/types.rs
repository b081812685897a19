// ==========================================
// 精酿生产管理系统 - 领域类型定义
// ==========================================
// 职责: 定义酒液流转引擎使用的状态枚举
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 工艺阶段 (Lot Phase)
// ==========================================
// 红线: 阶段只能前进,不能回退 (Fermentation → Conditioning → …)
// 顺序: Fermentation < Conditioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotPhase {
    Fermentation, // 发酵
    Conditioning, // 后熟
}

impl fmt::Display for LotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LotPhase::Fermentation => write!(f, "FERMENTATION"),
            LotPhase::Conditioning => write!(f, "CONDITIONING"),
        }
    }
}

impl LotPhase {
    /// 从数据库字符串解析阶段
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "FERMENTATION" => Some(LotPhase::Fermentation),
            "CONDITIONING" => Some(LotPhase::Conditioning),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            LotPhase::Fermentation => "FERMENTATION",
            LotPhase::Conditioning => "CONDITIONING",
        }
    }
}

// ==========================================
// 酒液单元状态 (Lot Status)
// ==========================================
// Completed 表示血缘已移交(分罐后的父单元)或历史留档(混酿来源)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotStatus {
    Planned,   // 已计划
    Active,    // 在产
    Completed, // 已完结
}

impl fmt::Display for LotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LotStatus::Planned => write!(f, "PLANNED"),
            LotStatus::Active => write!(f, "ACTIVE"),
            LotStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl LotStatus {
    /// 从数据库字符串解析状态
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLANNED" => Some(LotStatus::Planned),
            "ACTIVE" => Some(LotStatus::Active),
            "COMPLETED" => Some(LotStatus::Completed),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            LotStatus::Planned => "PLANNED",
            LotStatus::Active => "ACTIVE",
            LotStatus::Completed => "COMPLETED",
        }
    }
}

// ==========================================
// 生产批次状态 (Batch Status)
// ==========================================
// 红线: 派生值,由关联酒液单元的阶段重算得出,不允许手工覆写
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Planned,      // 已计划
    Fermenting,   // 发酵中
    Conditioning, // 后熟中
    Completed,    // 已完结
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Planned => write!(f, "PLANNED"),
            BatchStatus::Fermenting => write!(f, "FERMENTING"),
            BatchStatus::Conditioning => write!(f, "CONDITIONING"),
            BatchStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl BatchStatus {
    /// 从数据库字符串解析状态
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLANNED" => Some(BatchStatus::Planned),
            "FERMENTING" => Some(BatchStatus::Fermenting),
            "CONDITIONING" => Some(BatchStatus::Conditioning),
            "COMPLETED" => Some(BatchStatus::Completed),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            BatchStatus::Planned => "PLANNED",
            BatchStatus::Fermenting => "FERMENTING",
            BatchStatus::Conditioning => "CONDITIONING",
            BatchStatus::Completed => "COMPLETED",
        }
    }
}

// ==========================================
// 罐体状态 (Tank Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TankStatus {
    Available,     // 空闲可用
    Occupied,      // 占用中
    NeedsCleaning, // 待清洗
}

impl fmt::Display for TankStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TankStatus::Available => write!(f, "AVAILABLE"),
            TankStatus::Occupied => write!(f, "OCCUPIED"),
            TankStatus::NeedsCleaning => write!(f, "NEEDS_CLEANING"),
        }
    }
}

impl TankStatus {
    /// 从数据库字符串解析状态
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "AVAILABLE" => Some(TankStatus::Available),
            "OCCUPIED" => Some(TankStatus::Occupied),
            "NEEDS_CLEANING" => Some(TankStatus::NeedsCleaning),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            TankStatus::Available => "AVAILABLE",
            TankStatus::Occupied => "OCCUPIED",
            TankStatus::NeedsCleaning => "NEEDS_CLEANING",
        }
    }
}

// ==========================================
// 罐体占用状态 (Assignment Status)
// ==========================================
// 红线: 同一罐体任意时刻至多一条 ACTIVE 占用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Planned,   // 已计划
    Active,    // 占用中
    Completed, // 已结束
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentStatus::Planned => write!(f, "PLANNED"),
            AssignmentStatus::Active => write!(f, "ACTIVE"),
            AssignmentStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl AssignmentStatus {
    /// 从数据库字符串解析状态
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLANNED" => Some(AssignmentStatus::Planned),
            "ACTIVE" => Some(AssignmentStatus::Active),
            "COMPLETED" => Some(AssignmentStatus::Completed),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Planned => "PLANNED",
            AssignmentStatus::Active => "ACTIVE",
            AssignmentStatus::Completed => "COMPLETED",
        }
    }
}

// ==========================================
// 流转模式 (Transition Mode)
// ==========================================
// Mode Resolver 的唯一输出,四选一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionMode {
    StayInTank,     // 原罐转相
    DirectTransfer, // 单罐直转
    Split,          // 分罐
    Blend,          // 混酿
}

impl fmt::Display for TransitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionMode::StayInTank => write!(f, "STAY_IN_TANK"),
            TransitionMode::DirectTransfer => write!(f, "DIRECT_TRANSFER"),
            TransitionMode::Split => write!(f, "SPLIT"),
            TransitionMode::Blend => write!(f, "BLEND"),
        }
    }
}

impl TransitionMode {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            TransitionMode::StayInTank => "STAY_IN_TANK",
            TransitionMode::DirectTransfer => "DIRECT_TRANSFER",
            TransitionMode::Split => "SPLIT",
            TransitionMode::Blend => "BLEND",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering() {
        // 阶段单调性: 发酵 < 后熟
        assert!(LotPhase::Fermentation < LotPhase::Conditioning);
    }

    #[test]
    fn test_phase_db_roundtrip() {
        assert_eq!(
            LotPhase::from_db_str(LotPhase::Conditioning.to_db_str()),
            Some(LotPhase::Conditioning)
        );
        assert_eq!(LotPhase::from_db_str("fermentation"), Some(LotPhase::Fermentation));
        assert_eq!(LotPhase::from_db_str("BOTTLED"), None);
    }

    #[test]
    fn test_tank_status_db_roundtrip() {
        for status in [
            TankStatus::Available,
            TankStatus::Occupied,
            TankStatus::NeedsCleaning,
        ] {
            assert_eq!(TankStatus::from_db_str(status.to_db_str()), Some(status));
        }
    }
}

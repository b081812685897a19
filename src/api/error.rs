// ==========================================
// 精酿生产管理系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，转换Repository错误为用户友好的错误消息
// 约定: 每个错误携带机器可读 code,校验/冲突类错误在任何写入前返回
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
/// 所有错误信息必须包含显式原因
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 资源冲突错误
    // ==========================================
    /// 罐体容量超限
    #[error("罐体容量超限: tank={tank_code}, capacity={capacity_l}L, current={current_volume_l}L, requested={requested_volume_l}L")]
    TankOverflow {
        tank_code: String,
        capacity_l: f64,
        current_volume_l: f64,
        requested_volume_l: f64,
    },

    /// 罐体已被其他单元占用
    #[error("罐体已被占用: tank={tank_code}, occupied_by={occupying_lot_code}, phase={phase}")]
    TankOccupied {
        tank_code: String,
        occupying_lot_code: String,
        phase: String,
    },

    /// 未提供可用罐体
    #[error("无可用罐体: {0}")]
    TanksUnavailable(String),

    // ==========================================
    // 资源未找到错误
    // ==========================================
    #[error("批次不存在: {0}")]
    BatchNotFound(String),

    #[error("酒液单元不存在: {0}")]
    LotNotFound(String),

    #[error("罐体不存在: {0}")]
    TankNotFound(String),

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    /// 流转模式标志互相矛盾
    #[error("流转标志冲突: {0}")]
    ConflictingFlags(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 机器可读错误码 (跨进程边界传递,不随消息文案变化)
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::TankOverflow { .. } => "TANK_OVERFLOW",
            ApiError::TankOccupied { .. } => "TANK_OCCUPIED",
            ApiError::TanksUnavailable(_) => "TANKS_UNAVAILABLE",
            ApiError::BatchNotFound(_) => "BATCH_NOT_FOUND",
            ApiError::LotNotFound(_) => "LOT_NOT_FOUND",
            ApiError::TankNotFound(_) => "TANK_NOT_FOUND",
            ApiError::InvalidInput(_) => "VALIDATION_FAILED",
            ApiError::ConflictingFlags(_) => "CONFLICTING_FLAGS",
            ApiError::DatabaseError(_)
            | ApiError::DatabaseConnectionError(_)
            | ApiError::DatabaseTransactionError(_)
            | ApiError::InternalError(_)
            | ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// 目的: 将Repository层的技术错误转换为用户友好的业务错误
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => match entity.as_str() {
                "Batch" => ApiError::BatchNotFound(id),
                "Lot" => ApiError::LotNotFound(id),
                "Tank" => ApiError::TankNotFound(id),
                _ => ApiError::InternalError(format!("{}(id={})不存在", entity, id)),
            },
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::DatabaseError(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = ApiError::TankOverflow {
            tank_code: "FV-01".to_string(),
            capacity_l: 1000.0,
            current_volume_l: 800.0,
            requested_volume_l: 300.0,
        };
        assert_eq!(err.code(), "TANK_OVERFLOW");

        let err = ApiError::TankOccupied {
            tank_code: "CT-02".to_string(),
            occupying_lot_code: "L-202603".to_string(),
            phase: "CONDITIONING".to_string(),
        };
        assert_eq!(err.code(), "TANK_OCCUPIED");

        assert_eq!(
            ApiError::TanksUnavailable("未提供目标罐体".to_string()).code(),
            "TANKS_UNAVAILABLE"
        );
        assert_eq!(
            ApiError::ConflictingFlags("x".to_string()).code(),
            "CONFLICTING_FLAGS"
        );
        assert_eq!(
            ApiError::DatabaseError("x".to_string()).code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_repository_error_conversion() {
        // NotFound错误按实体映射到专属变体
        let repo_err = RepositoryError::NotFound {
            entity: "Tank".to_string(),
            id: "TK01".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::TankNotFound(id) => assert_eq!(id, "TK01"),
            _ => panic!("Expected TankNotFound"),
        }

        let repo_err = RepositoryError::NotFound {
            entity: "Batch".to_string(),
            id: "B001".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        assert_eq!(api_err.code(), "BATCH_NOT_FOUND");

        // 查询错误归入 INTERNAL_ERROR
        let repo_err = RepositoryError::DatabaseQueryError("syntax error".to_string());
        let api_err: ApiError = repo_err.into();
        assert_eq!(api_err.code(), "INTERNAL_ERROR");
    }
}

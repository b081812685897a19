// ==========================================
// 精酿生产管理系统 - 混酿编号生成
// ==========================================
// 职责: 定义编号生成 trait,编号规则对引擎不透明
// 说明: 生成器只依赖租户标识,返回租户内唯一的编号片段
// ==========================================

use uuid::Uuid;

/// 混酿编号生成者 Trait
///
/// 引擎在目标单元首次成为混酿目标时调用,
/// 拼接配置的前缀后写入 lot_code
pub trait BlendCodeGenerator: Send + Sync {
    /// 生成租户内唯一的编号片段
    fn generate(&self, tenant_id: &str) -> String;
}

/// 默认实现: UUID v4 前 8 位大写
#[derive(Debug, Clone, Default)]
pub struct UuidBlendCodeGenerator;

impl BlendCodeGenerator for UuidBlendCodeGenerator {
    fn generate(&self, _tenant_id: &str) -> String {
        Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(8)
            .collect::<String>()
            .to_uppercase()
    }
}

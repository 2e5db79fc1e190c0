//! 重试治理器
//!
//! 统计同一失败调用已获得的纠正轮次，轮次达到上限即拒绝继续 ——
//! 限定成本，防止对持续幻觉的智能体陷入无限纠正循环。
//! 轮次不单独维护计数器，始终由历史记录派生（max+1），避免计数漂移。

use std::sync::Arc;

use uuid::Uuid;

use crate::core::CalibError;
use crate::correction::classifier::{classify, ClassifyContext};
use crate::correction::strategy::strategy_for;
use crate::model::{CorrectionDraft, CorrectionRecord};
use crate::store::CalibStore;

/// 单个失败调用默认允许的最大纠正轮次
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// 重试治理器
pub struct RetryGovernor {
    store: Arc<dyn CalibStore>,
    max_rounds: u32,
}

impl RetryGovernor {
    pub fn new(store: Arc<dyn CalibStore>, max_rounds: u32) -> Self {
        Self { store, max_rounds }
    }

    pub fn with_defaults(store: Arc<dyn CalibStore>) -> Self {
        Self::new(store, DEFAULT_MAX_ROUNDS)
    }

    /// 已观测最大轮次低于上限时允许再来一轮
    pub fn should_retry(&self, call_id: Uuid) -> Result<bool, CalibError> {
        let max_round = self.store.max_correction_round(call_id)?;
        let permitted = max_round < self.max_rounds;
        if !permitted {
            tracing::info!(
                call_id = %call_id,
                max_round,
                ceiling = self.max_rounds,
                "correction rounds exhausted"
            );
        }
        Ok(permitted)
    }

    /// 分类错误、选择策略、派生下一轮次并持久化一条纠正记录
    pub fn create_correction_record(
        &self,
        call_id: Uuid,
        factory_id: &str,
        session_id: &str,
        error_type: &str,
        error_message: &str,
        context: Option<&ClassifyContext>,
    ) -> Result<CorrectionRecord, CalibError> {
        let category = classify(error_message, context);
        let strategy = strategy_for(category);
        let record = self.store.append_correction(&CorrectionDraft {
            call_id,
            factory_id: factory_id.to_string(),
            session_id: session_id.to_string(),
            error_type: error_type.to_string(),
            error_message: error_message.to_string(),
            category,
            strategy,
        })?;
        tracing::info!(
            call_id = %call_id,
            round = record.round,
            category = category.as_str(),
            strategy = strategy.as_str(),
            "correction record created"
        );
        Ok(record)
    }

    /// 按创建时间倒序列出某调用的纠正历史
    pub fn corrections_for(&self, call_id: Uuid) -> Result<Vec<CorrectionRecord>, CalibError> {
        self.store.list_corrections(call_id)
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }
}

//! 调用记录器
//!
//! 每次工具调用落一条 ToolCallRecord；冗余短路时回填冗余字段并强制 SKIPPED。
//! 记录不存在属于需要上报的错误，不静默忽略。

use std::sync::Arc;

use uuid::Uuid;

use crate::core::CalibError;
use crate::model::ToolCallRecord;
use crate::store::CalibStore;

/// 调用记录器：持久化调用结果，回填冗余标记
pub struct CallRecorder {
    store: Arc<dyn CalibStore>,
}

impl CallRecorder {
    pub fn new(store: Arc<dyn CalibStore>) -> Self {
        Self { store }
    }

    /// 按已知状态原样持久化一条新记录
    pub fn record(&self, record: &ToolCallRecord) -> Result<(), CalibError> {
        self.store.insert_call(record)?;
        tracing::debug!(
            call_id = %record.id,
            tool = %record.tool_name,
            status = record.status.as_str(),
            "tool call recorded"
        );
        Ok(())
    }

    /// 将已有记录标记为冗余：置冗余标志、原因、原始调用引用，状态强制 SKIPPED
    pub fn mark_as_redundant(
        &self,
        record_id: Uuid,
        original_call_id: Uuid,
        reason: &str,
    ) -> Result<(), CalibError> {
        let updated = self
            .store
            .mark_call_redundant(record_id, original_call_id, reason)?;
        if !updated {
            return Err(CalibError::RecordNotFound(record_id));
        }
        tracing::debug!(
            call_id = %record_id,
            original_call_id = %original_call_id,
            "call marked redundant"
        );
        Ok(())
    }

    /// 按 id 读取记录
    pub fn get(&self, record_id: Uuid) -> Result<Option<ToolCallRecord>, CalibError> {
        self.store.get_call(record_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionStatus;
    use crate::store::SqliteStore;

    #[test]
    fn test_record_then_mark_redundant() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let recorder = CallRecorder::new(store);

        let original = ToolCallRecord::success("s1", "f1", "echo", "d1", "ok", 0, 0);
        let duplicate = ToolCallRecord::skipped("s1", "f1", "echo", "d1");
        recorder.record(&original).unwrap();
        recorder.record(&duplicate).unwrap();

        recorder
            .mark_as_redundant(duplicate.id, original.id, "5 分钟内重复的 session/tool/参数")
            .unwrap();

        let loaded = recorder.get(duplicate.id).unwrap().unwrap();
        assert!(loaded.is_redundant);
        assert_eq!(loaded.original_call_id, Some(original.id));
        assert_eq!(loaded.status, ExecutionStatus::Skipped);
    }

    #[test]
    fn test_mark_redundant_reports_missing_record() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let recorder = CallRecorder::new(store);
        let missing = Uuid::new_v4();

        let err = recorder
            .mark_as_redundant(missing, Uuid::new_v4(), "x")
            .unwrap_err();
        assert!(matches!(err, CalibError::RecordNotFound(id) if id == missing));
    }
}

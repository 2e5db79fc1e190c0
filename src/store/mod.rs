//! 持久化边界
//!
//! CalibStore 只暴露校准核心依赖的具名操作；
//! 任何后端在此边界后均可替换，自带实现为 SQLite（sqlite 模块）。

pub mod sqlite;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::core::CalibError;
use crate::model::{
    CorrectionDraft, CorrectionRecord, ToolCallCacheEntry, ToolCallRecord, ToolReliabilityStats,
};

pub use sqlite::SqliteStore;

/// 校准核心的存储契约
///
/// TTL 在读取时惰性判定（now 由调用方传入，便于测试注入时间）；
/// 实现必须保证单个方法调用的原子性，轮次派生（max+1）须在一次调用内完成。
pub trait CalibStore: Send + Sync {
    // ---------- 冗余缓存 ----------

    /// 按缓存键查未过期条目；不产生命中计数副作用
    fn get_cache_entry(
        &self,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ToolCallCacheEntry>, CalibError>;

    /// 插入或整体替换缓存条目（同键旧条目被覆盖，不累积）
    fn upsert_cache_entry(&self, entry: &ToolCallCacheEntry) -> Result<(), CalibError>;

    /// 命中读取：未过期则命中计数 +1 并返回递增后的条目
    fn touch_cache_hit(
        &self,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ToolCallCacheEntry>, CalibError>;

    /// 删除一个会话的全部缓存条目，返回删除数；无条目不报错
    fn clear_session_cache(&self, session_id: &str) -> Result<usize, CalibError>;

    // ---------- 调用记录 ----------

    fn insert_call(&self, record: &ToolCallRecord) -> Result<(), CalibError>;

    fn get_call(&self, id: Uuid) -> Result<Option<ToolCallRecord>, CalibError>;

    /// 回填冗余字段并强制状态为 SKIPPED；返回是否命中记录
    fn mark_call_redundant(
        &self,
        id: Uuid,
        original_call_id: Uuid,
        reason: &str,
    ) -> Result<bool, CalibError>;

    /// 回看窗口内同 session+tool+digest 的最近一次成功且非冗余调用
    fn find_recent_call(
        &self,
        session_id: &str,
        tool_name: &str,
        args_digest: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ToolCallRecord>, CalibError>;

    // ---------- 纠正记录 ----------

    /// 在同一事务内派生轮次（已有最大轮次 +1，无则为 1）并持久化
    fn append_correction(&self, draft: &CorrectionDraft) -> Result<CorrectionRecord, CalibError>;

    /// 按创建时间倒序列出某调用的全部纠正记录
    fn list_corrections(&self, call_id: Uuid) -> Result<Vec<CorrectionRecord>, CalibError>;

    /// 某调用已观测到的最大轮次；无记录为 0
    fn max_correction_round(&self, call_id: Uuid) -> Result<u32, CalibError>;

    // ---------- 可靠性统计（只读协作方） ----------

    /// 指定日期的工具级聚合，按工具名排序
    fn daily_tool_stats(&self, day: NaiveDate) -> Result<Vec<ToolReliabilityStats>, CalibError>;
}

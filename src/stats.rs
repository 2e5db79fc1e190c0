//! 工具可靠性统计（只读协作方）
//!
//! 基于历史调用记录的工具级日聚合，仅供看板排序/阈值查询；核心从不修改。

use std::sync::Arc;

use chrono::NaiveDate;

use crate::core::CalibError;
use crate::model::ToolReliabilityStats;
use crate::store::CalibStore;

/// 可靠性报表
pub struct ReliabilityReporter {
    store: Arc<dyn CalibStore>,
}

impl ReliabilityReporter {
    pub fn new(store: Arc<dyn CalibStore>) -> Self {
        Self { store }
    }

    /// 指定日期的工具级聚合（按工具名排序）
    pub fn daily(&self, day: NaiveDate) -> Result<Vec<ToolReliabilityStats>, CalibError> {
        self.store.daily_tool_stats(day)
    }

    /// 指定日期按成功率降序排名；相同成功率按调用量降序
    pub fn ranked_by_success_rate(
        &self,
        day: NaiveDate,
    ) -> Result<Vec<ToolReliabilityStats>, CalibError> {
        let mut stats = self.store.daily_tool_stats(day)?;
        stats.sort_by(|a, b| {
            b.success_rate
                .total_cmp(&a.success_rate)
                .then(b.total_calls.cmp(&a.total_calls))
        });
        Ok(stats)
    }

    /// 指定日期成功率低于阈值且有实际执行的工具
    pub fn below_threshold(
        &self,
        day: NaiveDate,
        threshold: f64,
    ) -> Result<Vec<ToolReliabilityStats>, CalibError> {
        let stats = self.store.daily_tool_stats(day)?;
        Ok(stats
            .into_iter()
            .filter(|s| s.success_count + s.failed_count > 0 && s.success_rate < threshold)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolCallRecord;
    use crate::store::SqliteStore;
    use chrono::Utc;

    fn seeded_reporter() -> ReliabilityReporter {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        // steady: 2 成功；flaky: 1 成功 2 失败
        for digest in ["d1", "d2"] {
            store
                .insert_call(&ToolCallRecord::success("s1", "f1", "steady", digest, "ok", 0, 10))
                .unwrap();
        }
        store
            .insert_call(&ToolCallRecord::success("s1", "f1", "flaky", "d1", "ok", 0, 10))
            .unwrap();
        for digest in ["d2", "d3"] {
            store
                .insert_call(&ToolCallRecord::failure("s1", "f1", "flaky", digest, 10))
                .unwrap();
        }
        ReliabilityReporter::new(store)
    }

    #[test]
    fn test_ranked_by_success_rate() {
        let reporter = seeded_reporter();
        let ranked = reporter.ranked_by_success_rate(Utc::now().date_naive()).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].tool_name, "steady");
        assert_eq!(ranked[1].tool_name, "flaky");
    }

    #[test]
    fn test_below_threshold() {
        let reporter = seeded_reporter();
        let poor = reporter
            .below_threshold(Utc::now().date_naive(), 0.5)
            .unwrap();
        assert_eq!(poor.len(), 1);
        assert_eq!(poor[0].tool_name, "flaky");
    }
}

//! SQLite 持久化实现
//!
//! 单连接 + Mutex 串行化全部操作；时间戳统一为 UTC 毫秒整数，
//! 表结构在 open 时幂等创建。同键缓存竞争由 upsert（ON CONFLICT）收敛，
//! 轮次派生在事务内完成，同一调用链上的并发纠正不会抢到同一轮次。

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::core::CalibError;
use crate::model::{
    CorrectionDraft, CorrectionRecord, CorrectionStrategy, ErrorCategory, ExecutionStatus,
    ToolCallCacheEntry, ToolCallRecord, ToolReliabilityStats,
};
use crate::store::CalibStore;

/// SQLite 存储
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 打开（或创建）指定路径的数据库；父目录不存在时自动创建
    pub fn open(path: &Path) -> Result<Self, CalibError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CalibError::Config(format!("create db dir failed: {e}")))?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// 内存库（测试用）
    pub fn open_in_memory() -> Result<Self, CalibError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CalibError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tool_calls (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                factory_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                args_digest TEXT NOT NULL,
                status TEXT NOT NULL,
                is_redundant INTEGER NOT NULL DEFAULT 0,
                original_call_id TEXT,
                redundancy_reason TEXT,
                result_payload TEXT,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tool_calls_triple
                ON tool_calls(session_id, tool_name, args_digest, created_at);
            CREATE INDEX IF NOT EXISTS idx_tool_calls_created_at
                ON tool_calls(created_at);

            CREATE TABLE IF NOT EXISTS tool_call_cache (
                cache_key TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                args_digest TEXT NOT NULL,
                original_call_id TEXT NOT NULL,
                result_payload TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_cache_session
                ON tool_call_cache(session_id);

            CREATE TABLE IF NOT EXISTS corrections (
                id TEXT PRIMARY KEY,
                call_id TEXT NOT NULL,
                factory_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                error_type TEXT NOT NULL,
                error_message TEXT NOT NULL,
                category TEXT NOT NULL,
                strategy TEXT NOT NULL,
                round INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_corrections_call
                ON corrections(call_id, round);
            "#,
        )?;
        Ok(())
    }
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn parse_uuid(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, "时间戳越界".into())
    })
}

fn parse_enum<T>(idx: usize, s: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("无法识别的枚举值: {s}").into(),
        )
    })
}

fn row_to_call(row: &Row<'_>) -> rusqlite::Result<ToolCallRecord> {
    let id: String = row.get(0)?;
    let status: String = row.get(5)?;
    let original: Option<String> = row.get(7)?;
    let created_ms: i64 = row.get(12)?;
    Ok(ToolCallRecord {
        id: parse_uuid(0, &id)?,
        session_id: row.get(1)?,
        factory_id: row.get(2)?,
        tool_name: row.get(3)?,
        args_digest: row.get(4)?,
        status: parse_enum(5, &status, ExecutionStatus::parse)?,
        is_redundant: row.get(6)?,
        original_call_id: match original {
            Some(s) => Some(parse_uuid(7, &s)?),
            None => None,
        },
        redundancy_reason: row.get(8)?,
        result_payload: row.get(9)?,
        tokens_used: row.get::<_, i64>(10)? as u64,
        latency_ms: row.get::<_, i64>(11)? as u64,
        created_at: parse_millis(12, created_ms)?,
    })
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<ToolCallCacheEntry> {
    let original: String = row.get(4)?;
    let expires_ms: i64 = row.get(6)?;
    Ok(ToolCallCacheEntry {
        cache_key: row.get(0)?,
        session_id: row.get(1)?,
        tool_name: row.get(2)?,
        args_digest: row.get(3)?,
        original_call_id: parse_uuid(4, &original)?,
        result_payload: row.get(5)?,
        expires_at: parse_millis(6, expires_ms)?,
        hit_count: row.get::<_, i64>(7)? as u64,
    })
}

fn row_to_correction(row: &Row<'_>) -> rusqlite::Result<CorrectionRecord> {
    let id: String = row.get(0)?;
    let call_id: String = row.get(1)?;
    let category: String = row.get(6)?;
    let strategy: String = row.get(7)?;
    let created_ms: i64 = row.get(9)?;
    Ok(CorrectionRecord {
        id: parse_uuid(0, &id)?,
        call_id: parse_uuid(1, &call_id)?,
        factory_id: row.get(2)?,
        session_id: row.get(3)?,
        error_type: row.get(4)?,
        error_message: row.get(5)?,
        category: parse_enum(6, &category, ErrorCategory::parse)?,
        strategy: parse_enum(7, &strategy, CorrectionStrategy::parse)?,
        round: row.get::<_, i64>(8)? as u32,
        created_at: parse_millis(9, created_ms)?,
    })
}

const CALL_COLUMNS: &str = "id, session_id, factory_id, tool_name, args_digest, status, \
     is_redundant, original_call_id, redundancy_reason, result_payload, \
     tokens_used, latency_ms, created_at";

const ENTRY_COLUMNS: &str = "cache_key, session_id, tool_name, args_digest, \
     original_call_id, result_payload, expires_at, hit_count";

const CORRECTION_COLUMNS: &str = "id, call_id, factory_id, session_id, error_type, \
     error_message, category, strategy, round, created_at";

impl CalibStore for SqliteStore {
    fn get_cache_entry(
        &self,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ToolCallCacheEntry>, CalibError> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM tool_call_cache \
                     WHERE cache_key = ?1 AND expires_at > ?2"
                ),
                params![cache_key, millis(now)],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn upsert_cache_entry(&self, entry: &ToolCallCacheEntry) -> Result<(), CalibError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO tool_call_cache (
                cache_key, session_id, tool_name, args_digest,
                original_call_id, result_payload, expires_at, hit_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(cache_key) DO UPDATE SET
                original_call_id = excluded.original_call_id,
                result_payload = excluded.result_payload,
                expires_at = excluded.expires_at,
                hit_count = excluded.hit_count
            "#,
            params![
                entry.cache_key,
                entry.session_id,
                entry.tool_name,
                entry.args_digest,
                entry.original_call_id.to_string(),
                entry.result_payload,
                millis(entry.expires_at),
                entry.hit_count as i64,
            ],
        )?;
        Ok(())
    }

    fn touch_cache_hit(
        &self,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ToolCallCacheEntry>, CalibError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tool_call_cache SET hit_count = hit_count + 1 \
             WHERE cache_key = ?1 AND expires_at > ?2",
            params![cache_key, millis(now)],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let entry = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM tool_call_cache WHERE cache_key = ?1"),
                params![cache_key],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn clear_session_cache(&self, session_id: &str) -> Result<usize, CalibError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM tool_call_cache WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(deleted)
    }

    fn insert_call(&self, record: &ToolCallRecord) -> Result<(), CalibError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO tool_calls (
                id, session_id, factory_id, tool_name, args_digest, status,
                is_redundant, original_call_id, redundancy_reason, result_payload,
                tokens_used, latency_ms, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                record.id.to_string(),
                record.session_id,
                record.factory_id,
                record.tool_name,
                record.args_digest,
                record.status.as_str(),
                record.is_redundant,
                record.original_call_id.map(|u| u.to_string()),
                record.redundancy_reason,
                record.result_payload,
                record.tokens_used as i64,
                record.latency_ms as i64,
                millis(record.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_call(&self, id: Uuid) -> Result<Option<ToolCallRecord>, CalibError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                &format!("SELECT {CALL_COLUMNS} FROM tool_calls WHERE id = ?1"),
                params![id.to_string()],
                row_to_call,
            )
            .optional()?;
        Ok(record)
    }

    fn mark_call_redundant(
        &self,
        id: Uuid,
        original_call_id: Uuid,
        reason: &str,
    ) -> Result<bool, CalibError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tool_calls SET is_redundant = 1, original_call_id = ?1, \
             redundancy_reason = ?2, status = 'SKIPPED' WHERE id = ?3",
            params![original_call_id.to_string(), reason, id.to_string()],
        )?;
        Ok(updated > 0)
    }

    fn find_recent_call(
        &self,
        session_id: &str,
        tool_name: &str,
        args_digest: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ToolCallRecord>, CalibError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {CALL_COLUMNS} FROM tool_calls \
                     WHERE session_id = ?1 AND tool_name = ?2 AND args_digest = ?3 \
                       AND status = 'SUCCESS' AND is_redundant = 0 AND created_at >= ?4 \
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![session_id, tool_name, args_digest, millis(since)],
                row_to_call,
            )
            .optional()?;
        Ok(record)
    }

    fn append_correction(&self, draft: &CorrectionDraft) -> Result<CorrectionRecord, CalibError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        // 轮次派生与插入在同一事务内，并发纠正不会抢到同一轮次
        let max_round: i64 = tx.query_row(
            "SELECT COALESCE(MAX(round), 0) FROM corrections WHERE call_id = ?1",
            params![draft.call_id.to_string()],
            |row| row.get(0),
        )?;
        let record = CorrectionRecord {
            id: Uuid::new_v4(),
            call_id: draft.call_id,
            factory_id: draft.factory_id.clone(),
            session_id: draft.session_id.clone(),
            error_type: draft.error_type.clone(),
            error_message: draft.error_message.clone(),
            category: draft.category,
            strategy: draft.strategy,
            round: max_round as u32 + 1,
            created_at: Utc::now(),
        };
        tx.execute(
            r#"
            INSERT INTO corrections (
                id, call_id, factory_id, session_id, error_type,
                error_message, category, strategy, round, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.id.to_string(),
                record.call_id.to_string(),
                record.factory_id,
                record.session_id,
                record.error_type,
                record.error_message,
                record.category.as_str(),
                record.strategy.as_str(),
                record.round as i64,
                millis(record.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(record)
    }

    fn list_corrections(&self, call_id: Uuid) -> Result<Vec<CorrectionRecord>, CalibError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CORRECTION_COLUMNS} FROM corrections \
             WHERE call_id = ?1 ORDER BY created_at DESC, round DESC"
        ))?;
        let records = stmt
            .query_map(params![call_id.to_string()], row_to_correction)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn max_correction_round(&self, call_id: Uuid) -> Result<u32, CalibError> {
        let conn = self.conn.lock().unwrap();
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(round), 0) FROM corrections WHERE call_id = ?1",
            params![call_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(max as u32)
    }

    fn daily_tool_stats(&self, day: NaiveDate) -> Result<Vec<ToolReliabilityStats>, CalibError> {
        let start = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| CalibError::Validation(format!("invalid date: {day}")))?
            .and_utc();
        let end_ms = millis(start) + 24 * 3600 * 1000;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT tool_name,
                   COUNT(*),
                   SUM(CASE WHEN status = 'SUCCESS' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN status = 'SKIPPED' THEN 1 ELSE 0 END),
                   AVG(CASE WHEN status != 'SKIPPED' THEN latency_ms END)
            FROM tool_calls
            WHERE created_at >= ?1 AND created_at < ?2
            GROUP BY tool_name
            ORDER BY tool_name
            "#,
        )?;
        let date_str = day.format("%Y-%m-%d").to_string();
        let stats = stmt
            .query_map(params![millis(start), end_ms], |row| {
                let total: i64 = row.get(1)?;
                let success: i64 = row.get(2)?;
                let failed: i64 = row.get(3)?;
                let skipped: i64 = row.get(4)?;
                let avg_latency: Option<f64> = row.get(5)?;
                let executed = success + failed;
                Ok(ToolReliabilityStats {
                    tool_name: row.get(0)?,
                    date: date_str.clone(),
                    total_calls: total as u64,
                    success_count: success as u64,
                    failed_count: failed as u64,
                    skipped_count: skipped as u64,
                    success_rate: if executed > 0 {
                        success as f64 / executed as f64
                    } else {
                        0.0
                    },
                    avg_latency_ms: avg_latency.unwrap_or(0.0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stats)
    }
}

//! 冗余检测缓存
//!
//! 两级判定：先查未过期缓存条目，未命中再回看近期调用历史 ——
//! 容忍「条目先于自然冗余窗口过期」的情况，并借机回填缓存。
//! TTL 限定陈旧度：工厂数据（库存、批次状态）变化快，同一答案只在短窗口内成立；
//! 按 session 作键，避免查询结果跨会话泄漏。

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::core::CalibError;
use crate::hash::args_digest;
use crate::model::{cache_key, ToolCallCacheEntry};
use crate::store::CalibStore;

/// 缓存条目默认存活时长（秒）
pub const DEFAULT_TTL_SECS: i64 = 300;
/// 近期历史回看窗口默认时长（秒）
pub const DEFAULT_LOOKBACK_SECS: i64 = 180;

/// 冗余命中来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedundancyTier {
    /// 未过期缓存条目
    Cache,
    /// 回看窗口内的历史成功调用（缓存已过期或尚未建立）
    RecentHistory,
}

/// 一次冗余判定的命中信息
#[derive(Debug, Clone)]
pub struct RedundancyHit {
    /// 被重复的原始调用 id
    pub original_call_id: Uuid,
    /// 原始结果载荷；历史记录缺载荷时为 None
    pub payload: Option<String>,
    pub tier: RedundancyTier,
}

/// 冗余检测缓存：TTL 键控存储 + 近期历史回看
pub struct RedundancyCache {
    store: Arc<dyn CalibStore>,
    ttl: Duration,
    lookback: Duration,
}

impl RedundancyCache {
    pub fn new(store: Arc<dyn CalibStore>, ttl_secs: i64, lookback_secs: i64) -> Self {
        Self {
            store,
            ttl: Duration::seconds(ttl_secs),
            lookback: Duration::seconds(lookback_secs),
        }
    }

    pub fn with_defaults(store: Arc<dyn CalibStore>) -> Self {
        Self::new(store, DEFAULT_TTL_SECS, DEFAULT_LOOKBACK_SECS)
    }

    /// 两级冗余判定；历史命中且带载荷时顺带回填缓存条目
    pub fn evaluate(
        &self,
        session_id: &str,
        tool_name: &str,
        args: Option<&Value>,
    ) -> Result<Option<RedundancyHit>, CalibError> {
        let digest = args_digest(args);
        let key = cache_key(session_id, tool_name, &digest);
        let now = Utc::now();

        if let Some(entry) = self.store.get_cache_entry(&key, now)? {
            tracing::debug!(cache_key = %key, tier = "cache", "redundant call detected");
            return Ok(Some(RedundancyHit {
                original_call_id: entry.original_call_id,
                payload: Some(entry.result_payload),
                tier: RedundancyTier::Cache,
            }));
        }

        let since = now - self.lookback;
        if let Some(prior) = self
            .store
            .find_recent_call(session_id, tool_name, &digest, since)?
        {
            // 机会性回填：下一次同键请求可直接走缓存层
            if let Some(payload) = &prior.result_payload {
                self.store.upsert_cache_entry(&ToolCallCacheEntry::new(
                    session_id,
                    tool_name,
                    &digest,
                    prior.id,
                    payload,
                    now + self.ttl,
                ))?;
            }
            tracing::debug!(cache_key = %key, tier = "history", "redundant call detected");
            return Ok(Some(RedundancyHit {
                original_call_id: prior.id,
                payload: prior.result_payload,
                tier: RedundancyTier::RecentHistory,
            }));
        }

        Ok(None)
    }

    /// 当前调用是否冗余（缓存或回看窗口命中）
    pub fn is_redundant(
        &self,
        session_id: &str,
        tool_name: &str,
        args: Option<&Value>,
    ) -> Result<bool, CalibError> {
        Ok(self.evaluate(session_id, tool_name, args)?.is_some())
    }

    /// 读取未过期缓存结果；每次命中使命中计数 +1
    pub fn cached_result(
        &self,
        session_id: &str,
        tool_name: &str,
        args: Option<&Value>,
    ) -> Result<Option<String>, CalibError> {
        let digest = args_digest(args);
        let key = cache_key(session_id, tool_name, &digest);
        let entry = self.store.touch_cache_hit(&key, Utc::now())?;
        Ok(entry.map(|e| e.result_payload))
    }

    /// 写入（或整体替换）缓存条目，过期时刻为写入时刻 + TTL
    pub fn cache_result(
        &self,
        session_id: &str,
        tool_name: &str,
        args: Option<&Value>,
        payload: &str,
        original_call_id: Uuid,
    ) -> Result<(), CalibError> {
        let digest = args_digest(args);
        self.store.upsert_cache_entry(&ToolCallCacheEntry::new(
            session_id,
            tool_name,
            &digest,
            original_call_id,
            payload,
            Utc::now() + self.ttl,
        ))
    }

    /// 清空一个会话的全部缓存（会话结束或重置时调用）
    pub fn clear_session(&self, session_id: &str) -> Result<(), CalibError> {
        let deleted = self.store.clear_session_cache(session_id)?;
        tracing::info!(session_id, deleted, "session cache cleared");
        Ok(())
    }
}

//! 数据模型：工具调用记录、冗余缓存条目、纠正记录、可靠性统计
//!
//! 所有实体均为不可变值对象，由构造函数一次性填全必需字段；
//! 状态字段创建后不再修改，仅冗余相关字段可由 CallRecorder 回填。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 缓存键分隔符；键格式 `{session}:{tool}:{digest}`，跨进程稳定
const CACHE_KEY_SEP: char = ':';

/// 由 (session, tool, 参数摘要) 三元组生成确定性缓存键
pub fn cache_key(session_id: &str, tool_name: &str, args_digest: &str) -> String {
    format!("{session_id}{CACHE_KEY_SEP}{tool_name}{CACHE_KEY_SEP}{args_digest}")
}

/// 工具调用执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    /// 调用被确认但未真正执行（冗余短路）
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(ExecutionStatus::Success),
            "FAILED" => Some(ExecutionStatus::Failed),
            "SKIPPED" => Some(ExecutionStatus::Skipped),
            _ => None,
        }
    }
}

/// 失败分类类别（封闭集合；新增类别会迫使策略映射同步更新）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// 参数结构非法（无法解析、类型不匹配）
    FormatError,
    /// 调用缺少必要信息（必填字段缺失）
    DataInsufficient,
    /// 引用不存在或自相矛盾 —— 幻觉工具/虚构实体的主要特征
    LogicError,
    /// 无规则命中时的保守默认
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::FormatError => "FORMAT_ERROR",
            ErrorCategory::DataInsufficient => "DATA_INSUFFICIENT",
            ErrorCategory::LogicError => "LOGIC_ERROR",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FORMAT_ERROR" => Some(ErrorCategory::FormatError),
            "DATA_INSUFFICIENT" => Some(ErrorCategory::DataInsufficient),
            "LOGIC_ERROR" => Some(ErrorCategory::LogicError),
            "UNKNOWN" => Some(ErrorCategory::Unknown),
            _ => None,
        }
    }
}

/// 纠正策略（封闭集合，与类别一一对应）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionStrategy {
    /// 重新提示：明确告知智能体哪里无效（如「工具 X 不存在」）
    PromptInjection,
    /// 按参数 Schema 重新组织参数
    ParameterReformat,
    /// 向智能体/用户索要缺失字段
    RequestClarification,
    /// 安全默认：原样反馈错误文本，不做针对性修正
    RawErrorFeedback,
}

impl CorrectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionStrategy::PromptInjection => "PROMPT_INJECTION",
            CorrectionStrategy::ParameterReformat => "PARAMETER_REFORMAT",
            CorrectionStrategy::RequestClarification => "REQUEST_CLARIFICATION",
            CorrectionStrategy::RawErrorFeedback => "RAW_ERROR_FEEDBACK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROMPT_INJECTION" => Some(CorrectionStrategy::PromptInjection),
            "PARAMETER_REFORMAT" => Some(CorrectionStrategy::ParameterReformat),
            "REQUEST_CLARIFICATION" => Some(CorrectionStrategy::RequestClarification),
            "RAW_ERROR_FEEDBACK" => Some(CorrectionStrategy::RawErrorFeedback),
            _ => None,
        }
    }
}

/// 一次工具调用尝试对应一条记录
///
/// 不变量：`is_redundant == true` 时 `original_call_id` 必非空，
/// 且指向同 session+tool+digest 的更早记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: Uuid,
    pub session_id: String,
    pub factory_id: String,
    pub tool_name: String,
    /// 64 位小写十六进制参数摘要
    pub args_digest: String,
    pub status: ExecutionStatus,
    pub is_redundant: bool,
    pub original_call_id: Option<Uuid>,
    pub redundancy_reason: Option<String>,
    /// 成功调用的结果载荷（不透明字符串）；缓存可据此从近期历史回填
    pub result_payload: Option<String>,
    pub tokens_used: u64,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl ToolCallRecord {
    /// 成功调用记录
    pub fn success(
        session_id: &str,
        factory_id: &str,
        tool_name: &str,
        args_digest: &str,
        payload: &str,
        tokens_used: u64,
        latency_ms: u64,
    ) -> Self {
        Self::new(
            session_id,
            factory_id,
            tool_name,
            args_digest,
            ExecutionStatus::Success,
            Some(payload.to_string()),
            tokens_used,
            latency_ms,
        )
    }

    /// 失败调用记录
    pub fn failure(
        session_id: &str,
        factory_id: &str,
        tool_name: &str,
        args_digest: &str,
        latency_ms: u64,
    ) -> Self {
        Self::new(
            session_id,
            factory_id,
            tool_name,
            args_digest,
            ExecutionStatus::Failed,
            None,
            0,
            latency_ms,
        )
    }

    /// 冗余短路记录：未真正执行，状态直接为 SKIPPED
    pub fn skipped(session_id: &str, factory_id: &str, tool_name: &str, args_digest: &str) -> Self {
        Self::new(
            session_id,
            factory_id,
            tool_name,
            args_digest,
            ExecutionStatus::Skipped,
            None,
            0,
            0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        session_id: &str,
        factory_id: &str,
        tool_name: &str,
        args_digest: &str,
        status: ExecutionStatus,
        result_payload: Option<String>,
        tokens_used: u64,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            factory_id: factory_id.to_string(),
            tool_name: tool_name.to_string(),
            args_digest: args_digest.to_string(),
            status,
            is_redundant: false,
            original_call_id: None,
            redundancy_reason: None,
            result_payload,
            tokens_used,
            latency_ms,
            created_at: Utc::now(),
        }
    }
}

/// 每个观测到的 (session, tool, digest) 三元组至多一条未过期缓存条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallCacheEntry {
    pub cache_key: String,
    pub session_id: String,
    pub tool_name: String,
    pub args_digest: String,
    /// 产生该结果的原始调用 id
    pub original_call_id: Uuid,
    pub result_payload: String,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl ToolCallCacheEntry {
    pub fn new(
        session_id: &str,
        tool_name: &str,
        args_digest: &str,
        original_call_id: Uuid,
        result_payload: &str,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cache_key: cache_key(session_id, tool_name, args_digest),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            args_digest: args_digest.to_string(),
            original_call_id,
            result_payload: result_payload.to_string(),
            expires_at,
            hit_count: 0,
        }
    }
}

/// 待持久化的纠正记录；轮次由存储层在同一事务内取 max+1 派生
#[derive(Debug, Clone)]
pub struct CorrectionDraft {
    pub call_id: Uuid,
    pub factory_id: String,
    pub session_id: String,
    pub error_type: String,
    pub error_message: String,
    pub category: ErrorCategory,
    pub strategy: CorrectionStrategy,
}

/// 一次纠正尝试对应一条记录；round 为 1 起的轮次计数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub id: Uuid,
    pub call_id: Uuid,
    pub factory_id: String,
    pub session_id: String,
    pub error_type: String,
    pub error_message: String,
    pub category: ErrorCategory,
    pub strategy: CorrectionStrategy,
    pub round: u32,
    pub created_at: DateTime<Utc>,
}

/// 工具级日聚合（只读协作方，供看板排序/阈值查询；核心从不修改）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolReliabilityStats {
    pub tool_name: String,
    /// YYYY-MM-DD
    pub date: String,
    pub total_calls: u64,
    pub success_count: u64,
    pub failed_count: u64,
    /// 冗余短路（SKIPPED）次数
    pub skipped_count: u64,
    /// success / (success + failed)；无实际执行时为 0
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

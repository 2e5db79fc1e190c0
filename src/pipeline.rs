//! 校准管线
//!
//! 串起完整控制流：参数摘要 -> 冗余判定（命中则短路并标记 SKIPPED）->
//! 外部执行 -> 记录与缓存；失败时进入纠正循环：分类 -> 选策略 -> 落纠正记录 ->
//! 治理器放行则带注入提示重试，否则终止并保留最后一次分类与策略。
//! 每次尝试输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::cache::{RedundancyCache, RedundancyTier};
use crate::config::AppConfig;
use crate::core::CalibError;
use crate::correction::classifier::ClassifyContext;
use crate::correction::strategy::render_correction_prompt;
use crate::correction::RetryGovernor;
use crate::hash::args_digest;
use crate::model::{CorrectionStrategy, ErrorCategory, ToolCallRecord};
use crate::recorder::CallRecorder;
use crate::store::CalibStore;

/// 失败时写入纠正记录的原始错误类型串
const TOOL_FAILURE_ERROR_TYPE: &str = "TOOL_EXECUTION_FAILED";

/// 一次外部工具执行的产出
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// 不透明的结果载荷（序列化字符串）
    pub payload: String,
    pub tokens_used: u64,
}

impl ToolOutput {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            tokens_used: 0,
        }
    }

    pub fn with_tokens(payload: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            payload: payload.into(),
            tokens_used,
        }
    }
}

/// 外部工具执行的不透明接口；超时与取消由实现方负责
///
/// correction 为纠正轮注入的提示文本（首轮为 None），
/// 由实现方转交给智能体以促成修正后的重试。
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        tool_name: &str,
        args: Option<&Value>,
        correction: Option<&str>,
    ) -> Result<ToolOutput, String>;
}

/// 一次工具调用请求
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub session_id: String,
    pub factory_id: String,
    pub tool_name: String,
    pub args: Option<Value>,
    /// 分类用结构化上下文（如注册表校验结果）
    pub context: Option<ClassifyContext>,
}

impl CallRequest {
    pub fn new(session_id: &str, factory_id: &str, tool_name: &str, args: Option<Value>) -> Self {
        Self {
            session_id: session_id.to_string(),
            factory_id: factory_id.to_string(),
            tool_name: tool_name.to_string(),
            args,
            context: None,
        }
    }

    pub fn with_context(mut self, context: ClassifyContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// 调用链的最终产出
///
/// Exhausted 与真实失败可区分：智能体是「正确地放弃」而非「坏了」，
/// 且最后一次分类与策略仍然返回，供运维展示。
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// 冗余短路：未执行，返回原始调用的缓存结果
    Cached {
        call_id: Uuid,
        original_call_id: Uuid,
        payload: Option<String>,
    },
    /// 执行成功（可能经历了若干纠正轮）
    Success {
        call_id: Uuid,
        payload: String,
        correction_rounds: u32,
    },
    /// 治理器拒绝继续，调用链终止
    Exhausted {
        call_id: Uuid,
        category: ErrorCategory,
        strategy: CorrectionStrategy,
        last_error: String,
        rounds: u32,
    },
}

/// 校准管线：持有各组件与外部执行接口
pub struct CalibrationPipeline {
    cache: RedundancyCache,
    recorder: CallRecorder,
    governor: RetryGovernor,
    invoker: Arc<dyn ToolInvoker>,
}

impl CalibrationPipeline {
    /// 以默认参数（TTL 300s / 回看 180s / 上限 3 轮）组装
    pub fn new(store: Arc<dyn CalibStore>, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            cache: RedundancyCache::with_defaults(store.clone()),
            recorder: CallRecorder::new(store.clone()),
            governor: RetryGovernor::with_defaults(store),
            invoker,
        }
    }

    /// 按配置组装
    pub fn from_config(
        store: Arc<dyn CalibStore>,
        invoker: Arc<dyn ToolInvoker>,
        config: &AppConfig,
    ) -> Self {
        Self {
            cache: RedundancyCache::new(
                store.clone(),
                config.cache.ttl_secs,
                config.cache.lookback_secs,
            ),
            recorder: CallRecorder::new(store.clone()),
            governor: RetryGovernor::new(store, config.correction.max_rounds),
            invoker,
        }
    }

    pub fn cache(&self) -> &RedundancyCache {
        &self.cache
    }

    pub fn recorder(&self) -> &CallRecorder {
        &self.recorder
    }

    pub fn governor(&self) -> &RetryGovernor {
        &self.governor
    }

    /// 评估并执行一次工具调用请求，驱动完整的冗余/纠正流程
    pub async fn execute(&self, req: &CallRequest) -> Result<CallOutcome, CalibError> {
        if req.session_id.is_empty() || req.tool_name.is_empty() {
            return Err(CalibError::Validation(
                "session_id 与 tool_name 不能为空".to_string(),
            ));
        }

        let digest = args_digest(req.args.as_ref());

        if let Some(hit) = self
            .cache
            .evaluate(&req.session_id, &req.tool_name, req.args.as_ref())?
        {
            // 命中计数通过 cached_result 读取产生；历史命中已回填则同样走缓存层
            let payload = self
                .cache
                .cached_result(&req.session_id, &req.tool_name, req.args.as_ref())?
                .or(hit.payload);

            let record = ToolCallRecord::skipped(
                &req.session_id,
                &req.factory_id,
                &req.tool_name,
                &digest,
            );
            self.recorder.record(&record)?;
            let reason = match hit.tier {
                RedundancyTier::Cache => "缓存未过期：与原始调用同 session/tool/参数摘要",
                RedundancyTier::RecentHistory => "回看窗口内存在同 session/tool/参数摘要的成功调用",
            };
            self.recorder
                .mark_as_redundant(record.id, hit.original_call_id, reason)?;

            audit(&req.tool_name, true, "redundant", 0, 0);
            return Ok(CallOutcome::Cached {
                call_id: record.id,
                original_call_id: hit.original_call_id,
                payload,
            });
        }

        // 纠正循环：chain_call_id 固定为首次失败记录，纠正轮次都挂在它上面
        let mut correction: Option<String> = None;
        let mut chain_call_id: Option<Uuid> = None;
        let mut rounds = 0u32;

        loop {
            let started = Instant::now();
            let result = self
                .invoker
                .invoke(&req.tool_name, req.args.as_ref(), correction.as_deref())
                .await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    let record = ToolCallRecord::success(
                        &req.session_id,
                        &req.factory_id,
                        &req.tool_name,
                        &digest,
                        &output.payload,
                        output.tokens_used,
                        latency_ms,
                    );
                    self.recorder.record(&record)?;
                    self.cache.cache_result(
                        &req.session_id,
                        &req.tool_name,
                        req.args.as_ref(),
                        &output.payload,
                        record.id,
                    )?;
                    audit(&req.tool_name, true, "ok", latency_ms, rounds);
                    return Ok(CallOutcome::Success {
                        call_id: record.id,
                        payload: output.payload,
                        correction_rounds: rounds,
                    });
                }
                Err(error_text) => {
                    let record = ToolCallRecord::failure(
                        &req.session_id,
                        &req.factory_id,
                        &req.tool_name,
                        &digest,
                        latency_ms,
                    );
                    self.recorder.record(&record)?;
                    let chain = *chain_call_id.get_or_insert(record.id);

                    let correction_rec = self.governor.create_correction_record(
                        chain,
                        &req.factory_id,
                        &req.session_id,
                        TOOL_FAILURE_ERROR_TYPE,
                        &error_text,
                        req.context.as_ref(),
                    )?;
                    rounds = correction_rec.round;
                    audit(&req.tool_name, false, "error", latency_ms, rounds);

                    if self.governor.should_retry(chain)? {
                        correction = Some(render_correction_prompt(
                            correction_rec.strategy,
                            &req.tool_name,
                            &error_text,
                        ));
                        continue;
                    }
                    return Ok(CallOutcome::Exhausted {
                        call_id: chain,
                        category: correction_rec.category,
                        strategy: correction_rec.strategy,
                        last_error: error_text,
                        rounds,
                    });
                }
            }
        }
    }
}

/// 每次调用决策输出一条 JSON 审计日志
fn audit(tool: &str, ok: bool, outcome: &str, duration_ms: u64, round: u32) {
    let line = serde_json::json!({
        "event": "tool_call_audit",
        "tool": tool,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": duration_ms,
        "round": round,
    });
    tracing::info!(audit = %line.to_string(), "calib");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 按脚本依次返回结果的 mock 执行器，记录调用次数与收到的纠正提示
    struct ScriptedInvoker {
        script: Mutex<VecDeque<Result<String, String>>>,
        calls: AtomicUsize,
        corrections: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedInvoker {
        fn new(script: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                corrections: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ToolInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            _tool_name: &str,
            _args: Option<&Value>,
            correction: Option<&str>,
        ) -> Result<ToolOutput, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.corrections
                .lock()
                .unwrap()
                .push(correction.map(|s| s.to_string()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err("script exhausted".to_string()))
                .map(ToolOutput::new)
        }
    }

    fn pipeline(invoker: Arc<ScriptedInvoker>) -> CalibrationPipeline {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        CalibrationPipeline::new(store, invoker)
    }

    #[tokio::test]
    async fn test_second_identical_call_is_short_circuited() {
        let invoker = ScriptedInvoker::new(vec![Ok("120 件".to_string())]);
        let p = pipeline(invoker.clone());
        let req = CallRequest::new(
            "s1",
            "f1",
            "inventory_query",
            Some(json!({"warehouse": "A", "materialTypeId": 7})),
        );

        let first = p.execute(&req).await.unwrap();
        let first_id = match first {
            CallOutcome::Success { call_id, ref payload, .. } => {
                assert_eq!(payload, "120 件");
                call_id
            }
            other => panic!("Expected Success, got {other:?}"),
        };

        // 键序不同的等价参数
        let req2 = CallRequest::new(
            "s1",
            "f1",
            "inventory_query",
            Some(json!({"materialTypeId": 7, "warehouse": "A"})),
        );
        let second = p.execute(&req2).await.unwrap();
        match second {
            CallOutcome::Cached {
                call_id,
                original_call_id,
                payload,
            } => {
                assert_eq!(original_call_id, first_id);
                assert_eq!(payload.as_deref(), Some("120 件"));
                // 短路记录已被标记冗余并指向原始调用
                let skipped = p.recorder().get(call_id).unwrap().unwrap();
                assert!(skipped.is_redundant);
                assert_eq!(skipped.original_call_id, Some(first_id));
            }
            other => panic!("Expected Cached, got {other:?}"),
        }
        assert_eq!(invoker.call_count(), 1);
    }

    #[tokio::test]
    async fn test_correction_loop_recovers() {
        let invoker = ScriptedInvoker::new(vec![
            Err("格式错误: 无法解析JSON".to_string()),
            Ok("ok".to_string()),
        ]);
        let p = pipeline(invoker.clone());
        let req = CallRequest::new("s1", "f1", "report_tool", Some(json!({"day": "2025-06-01"})));

        let outcome = p.execute(&req).await.unwrap();
        match outcome {
            CallOutcome::Success {
                payload,
                correction_rounds,
                ..
            } => {
                assert_eq!(payload, "ok");
                assert_eq!(correction_rounds, 1);
            }
            other => panic!("Expected Success, got {other:?}"),
        }
        assert_eq!(invoker.call_count(), 2);

        // 第二次调用收到按 ParameterReformat 渲染的纠正提示
        let corrections = invoker.corrections.lock().unwrap();
        assert!(corrections[0].is_none());
        let prompt = corrections[1].as_deref().unwrap();
        assert!(prompt.contains("report_tool"));
        assert!(prompt.contains("JSON"));
    }

    #[tokio::test]
    async fn test_exhausted_after_ceiling() {
        let err = "逻辑错误: 工具 'ghost_tool' 不存在于系统中".to_string();
        let invoker = ScriptedInvoker::new(vec![
            Err(err.clone()),
            Err(err.clone()),
            Err(err.clone()),
        ]);
        let p = pipeline(invoker.clone());
        let req = CallRequest::new("s1", "f1", "ghost_tool", None);

        let outcome = p.execute(&req).await.unwrap();
        match outcome {
            CallOutcome::Exhausted {
                call_id,
                category,
                strategy,
                last_error,
                rounds,
            } => {
                assert_eq!(category, ErrorCategory::LogicError);
                assert_eq!(strategy, CorrectionStrategy::PromptInjection);
                assert_eq!(rounds, 3);
                assert!(last_error.contains("ghost_tool"));
                assert!(!p.governor().should_retry(call_id).unwrap());
            }
            other => panic!("Expected Exhausted, got {other:?}"),
        }
        assert_eq!(invoker.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_calls_are_not_cached() {
        let invoker = ScriptedInvoker::new(vec![
            Err("莫名失败".to_string()),
            Err("莫名失败".to_string()),
            Err("莫名失败".to_string()),
            Err("莫名失败".to_string()),
        ]);
        let p = pipeline(invoker.clone());
        let req = CallRequest::new("s1", "f1", "flaky_tool", Some(json!({"x": 1})));

        let outcome = p.execute(&req).await.unwrap();
        assert!(matches!(outcome, CallOutcome::Exhausted { .. }));
        // 失败不会进缓存，同参数再来仍会真正执行
        assert!(!p
            .cache()
            .is_redundant("s1", "flaky_tool", req.args.as_ref())
            .unwrap());
    }

    #[tokio::test]
    async fn test_empty_session_rejected() {
        let invoker = ScriptedInvoker::new(vec![]);
        let p = pipeline(invoker);
        let req = CallRequest::new("", "f1", "echo", None);
        assert!(matches!(
            p.execute(&req).await,
            Err(CalibError::Validation(_))
        ));
    }
}

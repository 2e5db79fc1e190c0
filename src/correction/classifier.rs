//! 失败分类器
//!
//! 对错误文本做有序规则表匹配（子串，先命中先赢），同一输入恒得同一类别；
//! 结构化上下文优先于文本：注册表已判定工具不存在时直接归为逻辑错误。
//! 空文本或无规则命中时落入 Unknown，分类永不失败。

use crate::model::ErrorCategory;

/// 分类时的可选结构化上下文
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    /// 失败调用的工具名（用于日志与纠正提示）
    pub tool_name: Option<String>,
    /// 注册表校验结果；Some(false) 表示工具不存在（幻觉调用）
    pub tool_registered: Option<bool>,
}

/// 有序规则表：类别按优先级排列，条目内任一模式命中即判为该类别。
/// 模式统一小写，对消息的小写形式做子串匹配；中英文信号并列。
/// 注：裸「not found / 不存在」归为逻辑错误 —— 本系统中该文本的主要来源是
/// 幻觉工具或虚构实体；字段缺失类消息会先被上方的 DataInsufficient 规则截获。
const RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::FormatError,
        &[
            "格式错误",
            "无法解析",
            "解析失败",
            "类型不匹配",
            "cannot parse",
            "parse error",
            "parse failure",
            "malformed",
            "invalid json",
            "format error",
            "type mismatch",
        ],
    ),
    (
        ErrorCategory::DataInsufficient,
        &[
            "信息不足",
            "缺少必填",
            "缺少参数",
            "参数为空",
            "missing required",
            "insufficient data",
            "required field",
            "field is empty",
        ],
    ),
    (
        ErrorCategory::LogicError,
        &[
            "逻辑错误",
            "不存在",
            "找不到",
            "不合理",
            "循环依赖",
            "相互矛盾",
            "not found",
            "does not exist",
            "unreasonable",
            "circular",
            "contradict",
        ],
    ),
];

/// 将原始失败文本（及可选上下文）映射为错误类别
pub fn classify(error_message: &str, context: Option<&ClassifyContext>) -> ErrorCategory {
    if let Some(ctx) = context {
        if ctx.tool_registered == Some(false) {
            tracing::debug!(
                tool = ctx.tool_name.as_deref().unwrap_or("<unknown>"),
                "tool not in registry, classified as logic error"
            );
            return ErrorCategory::LogicError;
        }
    }

    let lowered = error_message.to_lowercase();
    for (category, patterns) in RULES {
        if patterns.iter().any(|p| lowered.contains(p)) {
            return *category;
        }
    }
    ErrorCategory::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_chinese() {
        assert_eq!(
            classify("格式错误: 无法解析JSON", None),
            ErrorCategory::FormatError
        );
    }

    #[test]
    fn test_data_insufficient_chinese() {
        assert_eq!(
            classify("信息不足: 缺少必填参数 materialTypeId", None),
            ErrorCategory::DataInsufficient
        );
    }

    #[test]
    fn test_logic_error_hallucinated_tool() {
        assert_eq!(
            classify("逻辑错误: 工具 'ghost_tool' 不存在于系统中", None),
            ErrorCategory::LogicError
        );
    }

    #[test]
    fn test_english_signals() {
        assert_eq!(classify("Cannot parse tool arguments", None), ErrorCategory::FormatError);
        assert_eq!(
            classify("missing required field: warehouseId", None),
            ErrorCategory::DataInsufficient
        );
        assert_eq!(classify("entity BATCH-99 not found", None), ErrorCategory::LogicError);
    }

    #[test]
    fn test_priority_order_on_ambiguous_text() {
        // 同时含格式与缺参信号：优先级最高的 FormatError 赢
        assert_eq!(
            classify("cannot parse request, missing required field", None),
            ErrorCategory::FormatError
        );
        // 缺参 + 不存在：DataInsufficient 在 LogicError 之上
        assert_eq!(
            classify("缺少必填参数 batchId，对应批次不存在", None),
            ErrorCategory::DataInsufficient
        );
    }

    #[test]
    fn test_unknown_fallback() {
        assert_eq!(classify("", None), ErrorCategory::Unknown);
        assert_eq!(classify("一些完全无法归类的文本", None), ErrorCategory::Unknown);
    }

    #[test]
    fn test_context_overrides_text() {
        let ctx = ClassifyContext {
            tool_name: Some("ghost_tool".to_string()),
            tool_registered: Some(false),
        };
        // 文本本身像格式错误，但注册表已确认工具不存在
        assert_eq!(
            classify("cannot parse output of ghost_tool", Some(&ctx)),
            ErrorCategory::LogicError
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let msg = "逻辑错误: 工具 'ghost_tool' 不存在于系统中";
        let first = classify(msg, None);
        for _ in 0..10 {
            assert_eq!(classify(msg, None), first);
        }
    }
}

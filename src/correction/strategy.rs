//! 纠正策略
//!
//! 类别 -> 策略为纯函数的穷尽映射：新增类别时编译期强制补全。
//! render_correction_prompt 生成注入下一轮的纠正提示文本。

use crate::model::{CorrectionStrategy, ErrorCategory};

/// 为错误类别选择纠正策略（纯函数、全映射、无副作用）
pub fn strategy_for(category: ErrorCategory) -> CorrectionStrategy {
    match category {
        ErrorCategory::LogicError => CorrectionStrategy::PromptInjection,
        ErrorCategory::FormatError => CorrectionStrategy::ParameterReformat,
        ErrorCategory::DataInsufficient => CorrectionStrategy::RequestClarification,
        ErrorCategory::Unknown => CorrectionStrategy::RawErrorFeedback,
    }
}

/// 按策略渲染注入重试轮的纠正提示
pub fn render_correction_prompt(
    strategy: CorrectionStrategy,
    tool_name: &str,
    error_message: &str,
) -> String {
    match strategy {
        CorrectionStrategy::PromptInjection => format!(
            "上一次调用无效: {error_message}。\
            工具 '{tool_name}' 或其引用的对象在系统中不存在，\
            请只使用系统已注册的工具与真实存在的实体，重新发起调用。"
        ),
        CorrectionStrategy::ParameterReformat => format!(
            "上一次调用的参数格式错误: {error_message}。\
            请严格按照工具 '{tool_name}' 的参数 JSON Schema 重新组织参数，\
            只输出一个合法的 JSON 对象，不要附带其它文字。"
        ),
        CorrectionStrategy::RequestClarification => format!(
            "上一次调用缺少必要信息: {error_message}。\
            请补全缺失的必填字段后重试 '{tool_name}'；无法确定取值时先向用户询问。"
        ),
        CorrectionStrategy::RawErrorFeedback => format!(
            "工具 '{tool_name}' 调用失败: {error_message}。请根据错误信息调整后重试。"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logic_error_maps_to_prompt_injection() {
        assert_eq!(
            strategy_for(ErrorCategory::LogicError),
            CorrectionStrategy::PromptInjection
        );
    }

    #[test]
    fn test_every_category_has_exactly_one_strategy() {
        let pairs = [
            (ErrorCategory::FormatError, CorrectionStrategy::ParameterReformat),
            (ErrorCategory::DataInsufficient, CorrectionStrategy::RequestClarification),
            (ErrorCategory::LogicError, CorrectionStrategy::PromptInjection),
            (ErrorCategory::Unknown, CorrectionStrategy::RawErrorFeedback),
        ];
        for (category, expected) in pairs {
            assert_eq!(strategy_for(category), expected);
        }
    }

    #[test]
    fn test_prompt_mentions_tool_and_error() {
        let prompt = render_correction_prompt(
            CorrectionStrategy::PromptInjection,
            "ghost_tool",
            "工具不存在",
        );
        assert!(prompt.contains("ghost_tool"));
        assert!(prompt.contains("工具不存在"));
    }

    #[test]
    fn test_raw_feedback_surfaces_error_verbatim() {
        let prompt =
            render_correction_prompt(CorrectionStrategy::RawErrorFeedback, "echo", "诡异失败");
        assert!(prompt.contains("诡异失败"));
    }
}

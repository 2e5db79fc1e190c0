//! 自我纠正子系统：失败分类、策略选择、重试治理
//!
//! 单次失败调用的纠正生命周期：
//! 执行失败 -> 分类 -> 选策略 -> {发起重试 | 终止}；
//! 终止仅发生在治理器拒绝继续时，且最后一次分类与策略仍返回给调用方。

pub mod classifier;
pub mod governor;
pub mod strategy;

pub use classifier::{classify, ClassifyContext};
pub use governor::RetryGovernor;
pub use strategy::{render_correction_prompt, strategy_for};

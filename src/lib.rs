//! Calib - 工厂智能体工具调用校准核心
//!
//! 检测冗余（重复、浪费）的工具调用，分类调用失败 ——
//! 含幻觉工具名与畸形参数 —— 并驱动有界的自我纠正循环。
//!
//! 模块划分：
//! - **cache**: 冗余检测缓存（TTL 键控 + 近期历史回看）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **correction**: 失败分类器、纠正策略、重试治理器
//! - **hash**: 参数规范化摘要（键序无关 SHA-256）
//! - **model**: 调用记录、缓存条目、纠正记录等数据模型
//! - **pipeline**: 校准管线（冗余短路 -> 执行 -> 纠正循环）
//! - **recorder**: 调用记录器（落记录、回填冗余标记）
//! - **stats**: 工具可靠性日聚合（只读协作方）
//! - **store**: 持久化边界（CalibStore trait + SQLite 实现）

pub mod cache;
pub mod config;
pub mod core;
pub mod correction;
pub mod hash;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod recorder;
pub mod stats;
pub mod store;

pub use cache::RedundancyCache;
pub use crate::core::CalibError;
pub use correction::RetryGovernor;
pub use pipeline::{CalibrationPipeline, CallOutcome, CallRequest, ToolInvoker, ToolOutput};
pub use recorder::CallRecorder;
pub use store::{CalibStore, SqliteStore};

//! 校准核心错误类型
//!
//! 分类/策略选择对合法输入永不失败（未识别文本落入默认类别）；
//! 存储层失败带上下文向调用方传播，核心自身不重试存储操作。
//! 「重试耗尽」不是错误而是治理结果，见 pipeline::CallOutcome::Exhausted。

use thiserror::Error;
use uuid::Uuid;

/// 校准核心运行过程中可能出现的错误（存储、记录缺失、校验、配置）
#[derive(Error, Debug)]
pub enum CalibError {
    /// 持久化层不可用或操作失败
    #[error("Store failure: {0}")]
    Store(#[from] rusqlite::Error),

    /// 按 id 回填冗余信息时记录不存在
    #[error("Tool call record not found: {0}")]
    RecordNotFound(Uuid),

    /// 入参校验失败（如空 session id）
    #[error("Validation failure: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),
}

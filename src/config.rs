//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CALIB__*` 覆盖
//! （双下划线表示嵌套，如 `CALIB__CACHE__TTL_SECS=600`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub cache: CacheSection,
    pub correction: CorrectionSection,
    pub store: StoreSection,
}

/// [app] 段：应用名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [cache] 段：冗余缓存的 TTL 与历史回看窗口
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// 缓存条目存活时长（秒）
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,
    /// 近期历史回看窗口（秒）
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: i64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            lookback_secs: default_lookback_secs(),
        }
    }
}

fn default_ttl_secs() -> i64 {
    300
}

fn default_lookback_secs() -> i64 {
    180
}

/// [correction] 段：重试治理
#[derive(Debug, Clone, Deserialize)]
pub struct CorrectionSection {
    /// 单个失败调用允许的最大纠正轮次
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

impl Default for CorrectionSection {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

fn default_max_rounds() -> u32 {
    3
}

/// [store] 段：SQLite 数据库路径
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreSection {
    /// 未设置时用 ./calib.db
    pub db_path: Option<PathBuf>,
}

impl StoreSection {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("calib.db"))
    }
}

/// 从 config 目录加载配置，环境变量 CALIB__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CALIB__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CALIB")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_horizons() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.cache.ttl_secs, 300);
        assert_eq!(cfg.cache.lookback_secs, 180);
        assert_eq!(cfg.correction.max_rounds, 3);
        assert_eq!(cfg.store.db_path(), PathBuf::from("calib.db"));
    }
}

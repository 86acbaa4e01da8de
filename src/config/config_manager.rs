// src/config/config_manager.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ConfigError;
use crate::model::adapters::ConfigAdapter;
use crate::model::partner::PartnerCatalog;

/// **交易所全局配置**
/// 所有字段都有默认值，配置文件只需要写需要覆盖的部分。
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExchangeConfig {
    /// 请求未带 tmax 时使用的超时
    pub default_timeout_ms: u64,
    /// tmax 上限
    pub max_timeout_ms: u64,
    /// 请求要求缓存时，为缓存写入预留的时间
    pub expected_cache_time_ms: u64,
    /// 请求未声明 cur 时的结算币种
    pub default_currency: String,
    /// 单次类目翻译查询的超时
    pub category_lookup_timeout_ms: u64,
    /// from -> to -> rate
    pub currency_rates: HashMap<String, HashMap<String, Decimal>>,
    pub partners_file: Option<String>,
    pub categories_file: Option<String>,
    /// 定期重新读取合作方文件的间隔（秒），0 表示不重新加载
    pub catalog_reload_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 500,
            max_timeout_ms: 3000,
            expected_cache_time_ms: 0,
            default_currency: "USD".to_string(),
            category_lookup_timeout_ms: 50,
            currency_rates: HashMap::new(),
            partners_file: None,
            categories_file: None,
            catalog_reload_secs: 0,
        }
    }
}

impl ExchangeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 || self.max_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.expected_cache_time_ms >= self.max_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "expected_cache_time_ms ({}) must be less than max_timeout_ms ({})",
                self.expected_cache_time_ms, self.max_timeout_ms
            )));
        }
        if self.default_currency.len() != 3 {
            return Err(ConfigError::Invalid(format!(
                "default_currency must be an ISO-4217 code, got '{}'",
                self.default_currency
            )));
        }
        Ok(())
    }

    /// 竞价的总超时：请求值优先，缺省用默认值，超过上限时截断
    pub fn resolve_timeout(&self, requested: Option<u64>) -> u64 {
        requested
            .filter(|t| *t > 0)
            .unwrap_or(self.default_timeout_ms)
            .min(self.max_timeout_ms)
    }
}

/// **配置管理器**
/// 合作方目录可以在运行中整体替换，正在进行的竞价继续使用旧快照。
#[derive(Debug)]
pub struct ConfigManager {
    pub config: ExchangeConfig,
    catalog: RwLock<Arc<PartnerCatalog>>,
}

impl ConfigManager {
    pub fn new(config: ExchangeConfig, catalog: PartnerCatalog) -> Self {
        ConfigManager {
            config,
            catalog: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn from_adapter(adapter: &dyn ConfigAdapter) -> Result<Self, ConfigError> {
        let config = adapter.load_exchange_config()?;
        let catalog = adapter.load_partners()?;
        tracing::info!(
            partners = catalog.partners.len(),
            default_timeout_ms = config.default_timeout_ms,
            "configuration loaded"
        );
        Ok(ConfigManager::new(config, catalog))
    }

    /// 当前合作方目录快照
    pub fn catalog(&self) -> Arc<PartnerCatalog> {
        let guard = self.catalog.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace_catalog(&self, catalog: PartnerCatalog) {
        let mut guard = self.catalog.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(catalog);
    }

    /// 重新读取合作方目录并整体替换；读取失败时保留当前目录
    pub fn reload_catalog(&self, adapter: &dyn ConfigAdapter) -> Result<usize, ConfigError> {
        let catalog = adapter.load_partners()?;
        let partners = catalog.partners.len();
        self.replace_catalog(catalog);
        tracing::info!(partners, "partner catalog reloaded");
        Ok(partners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::partner::PartnerConfig;

    #[test]
    fn test_resolve_timeout_caps_and_defaults() {
        let config = ExchangeConfig::default();
        assert_eq!(config.resolve_timeout(None), 500);
        assert_eq!(config.resolve_timeout(Some(0)), 500);
        assert_eq!(config.resolve_timeout(Some(1200)), 1200);
        assert_eq!(config.resolve_timeout(Some(10_000)), 3000);
    }

    #[test]
    fn test_validate_rejects_cache_time_beyond_max() {
        let config = ExchangeConfig {
            expected_cache_time_ms: 3000,
            ..ExchangeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let config: ExchangeConfig =
            serde_json::from_str(r#"{"expected_cache_time_ms": 100, "currency_rates": {"EUR": {"USD": 1.1}}}"#).unwrap();
        assert_eq!(config.expected_cache_time_ms, 100);
        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.currency_rates["EUR"]["USD"].to_string(), "1.1");
        assert!(config.validate().is_ok());
    }

    /// 每次加载返回下一份目录，用完后返回错误
    struct QueuedAdapter {
        catalogs: std::sync::Mutex<Vec<PartnerCatalog>>,
    }

    impl ConfigAdapter for QueuedAdapter {
        fn load_exchange_config(&self) -> Result<ExchangeConfig, ConfigError> {
            Ok(ExchangeConfig::default())
        }

        fn load_partners(&self) -> Result<PartnerCatalog, ConfigError> {
            self.catalogs
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ConfigError::Invalid("partners file unreadable".to_string()))
        }

        fn load_categories(&self) -> Result<crate::model::adapters::CategoryTable, ConfigError> {
            Ok(Default::default())
        }
    }

    #[test]
    fn test_reload_catalog_swaps_and_keeps_current_on_failure() {
        let adapter = QueuedAdapter {
            catalogs: std::sync::Mutex::new(vec![PartnerCatalog::from_partners(vec![
                PartnerConfig::new(1, "rubicon", "http://r"),
                PartnerConfig::new(2, "openx", "http://o"),
            ])]),
        };
        let manager = ConfigManager::new(ExchangeConfig::default(), PartnerCatalog::new());

        assert_eq!(manager.reload_catalog(&adapter).unwrap(), 2);
        assert!(manager.catalog().get("openx").is_some());

        assert!(manager.reload_catalog(&adapter).is_err());
        assert_eq!(manager.catalog().partners.len(), 2);
    }

    #[test]
    fn test_replace_catalog_keeps_old_snapshot() {
        let manager = ConfigManager::new(ExchangeConfig::default(), PartnerCatalog::new());
        let before = manager.catalog();
        manager.replace_catalog(PartnerCatalog::from_partners(vec![PartnerConfig::new(1, "appnexus", "http://a")]));

        assert!(before.partners.is_empty());
        assert!(manager.catalog().get("appnexus").is_some());
    }
}

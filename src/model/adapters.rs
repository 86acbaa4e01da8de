// src/model/adapters.rs

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;

use crate::config::config_manager::ExchangeConfig;
use crate::error::ConfigError;
use crate::model::partner::{PartnerCatalog, PartnerConfig};

/// 类目翻译文件格式：adserver -> publisher -> 原始类目 -> 翻译结果
pub type CategoryTable = HashMap<String, HashMap<String, HashMap<String, String>>>;

/// 配置来源抽象，默认实现读取本地 JSON 文件
pub trait ConfigAdapter: Send + Sync {
    fn load_exchange_config(&self) -> Result<ExchangeConfig, ConfigError>;
    fn load_partners(&self) -> Result<PartnerCatalog, ConfigError>;
    fn load_categories(&self) -> Result<CategoryTable, ConfigError>;
}

#[derive(Debug, Clone)]
pub struct FileConfigAdapter {
    pub config_file: Option<String>,
    pub partners_file: Option<String>,
    pub categories_file: Option<String>,
}

impl FileConfigAdapter {
    pub fn new(config_file: Option<&str>) -> Self {
        Self {
            config_file: config_file.map(str::to_string),
            partners_file: None,
            categories_file: None,
        }
    }

    /// 使用交易所配置中声明的合作方 / 类目文件
    pub fn with_data_files(mut self, config: &ExchangeConfig) -> Self {
        self.partners_file = config.partners_file.clone();
        self.categories_file = config.categories_file.clone();
        self
    }
}

fn read_json<T: DeserializeOwned>(path: &str) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_string(),
        source,
    })
}

impl ConfigAdapter for FileConfigAdapter {
    fn load_exchange_config(&self) -> Result<ExchangeConfig, ConfigError> {
        let config = match &self.config_file {
            Some(path) => read_json::<ExchangeConfig>(path)?,
            None => ExchangeConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn load_partners(&self) -> Result<PartnerCatalog, ConfigError> {
        match &self.partners_file {
            Some(path) => {
                let partners: Vec<PartnerConfig> = read_json(path)?;
                Ok(PartnerCatalog::from_partners(partners))
            }
            None => Ok(PartnerCatalog::new()),
        }
    }

    fn load_categories(&self) -> Result<CategoryTable, ConfigError> {
        match &self.categories_file {
            Some(path) => read_json(path),
            None => Ok(CategoryTable::new()),
        }
    }
}

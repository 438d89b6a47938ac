//! Runtime configuration loaded from TOML and layered with CLI or HTTP
//! overrides.
//!
//! A [`Config`] is an explicit value: the supervisor clones the base config
//! for every job, applies the job's [`Overrides`], then normalizes and
//! validates the copy. Runners, the fetch client and the store receive the
//! pieces they need through the builders at the bottom of this file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crawler::{Mode, Request};
use crate::download::DownloaderConfig;
use crate::fetch::FetchConfig;
use crate::store::{Backend, MirrorSettings, SaveOption, StoreError, StoreOptions};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

const STORE_BACKENDS: [&str; 5] = ["file", "sqlite", "mysql", "postgres", "mongodb"];
const SAVE_OPTIONS: [&str; 4] = ["json", "csv", "xlsx", "xlsx_book"];
const CRAWLER_TYPES: [&str; 3] = ["search", "detail", "creator"];
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["text", "json"];

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Note and creator inputs for one platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformInputs {
    /// Note URLs or ids for detail mode.
    pub specified: Vec<String>,
    /// Creator URLs or ids for creator mode.
    pub creators: Vec<String>,
}

/// Crawler configuration. Every key is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub platform: String,
    /// Comma separated search keywords.
    pub keywords: String,
    /// `search`, `detail` or `creator`.
    pub crawler_type: String,
    /// Raw `Cookie` header sent with every request.
    pub cookies: String,
    pub data_dir: String,

    pub store_backend: String,
    pub sqlite_path: String,
    pub mysql_dsn: String,
    pub postgres_dsn: String,
    pub mongo_uri: String,
    pub mongo_db: String,

    pub log_level: String,
    /// `text` or `json`.
    pub log_format: String,

    pub http_timeout_sec: u64,
    pub http_retry_count: u32,
    pub http_retry_base_delay_ms: u64,
    pub http_retry_max_delay_ms: u64,

    pub enable_ip_proxy: bool,
    pub ip_proxy_pool_count: usize,
    pub ip_proxy_provider_name: String,
    /// Static proxy entries separated by `,`, `;` or newlines.
    pub ip_proxy_list: String,
    pub ip_proxy_file: String,

    pub save_data_option: String,
    pub start_page: u32,
    pub crawler_max_notes_count: usize,
    pub max_concurrency_num: usize,
    pub enable_get_medias: bool,
    pub enable_get_comments: bool,
    pub crawler_max_comments_count_singlenotes: usize,
    pub enable_get_sub_comments: bool,
    /// Pause between successive items of one worker.
    pub crawler_max_sleep_sec: u64,

    pub bili_search_mode: String,
    pub weibo_search_type: String,

    /// Inputs keyed by canonical platform name.
    pub inputs: BTreeMap<String, PlatformInputs>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            platform: "xhs".to_string(),
            keywords: "编程副业,编程兼职".to_string(),
            crawler_type: "search".to_string(),
            cookies: String::new(),
            data_dir: "data".to_string(),
            store_backend: "file".to_string(),
            sqlite_path: "data/media_crawler.db".to_string(),
            mysql_dsn: String::new(),
            postgres_dsn: String::new(),
            mongo_uri: String::new(),
            mongo_db: crate::store::mirror::DEFAULT_MONGO_DB.to_string(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            http_timeout_sec: 60,
            http_retry_count: 3,
            http_retry_base_delay_ms: 500,
            http_retry_max_delay_ms: 4000,
            enable_ip_proxy: false,
            ip_proxy_pool_count: 2,
            ip_proxy_provider_name: "static".to_string(),
            ip_proxy_list: String::new(),
            ip_proxy_file: String::new(),
            save_data_option: "json".to_string(),
            start_page: 1,
            crawler_max_notes_count: 15,
            max_concurrency_num: 1,
            enable_get_medias: false,
            enable_get_comments: true,
            crawler_max_comments_count_singlenotes: 10,
            enable_get_sub_comments: false,
            crawler_max_sleep_sec: 2,
            bili_search_mode: "video".to_string(),
            weibo_search_type: "1".to_string(),
            inputs: BTreeMap::new(),
        }
    }
}

/// Per-job overrides from CLI flags or a control-plane run request.
///
/// Blank strings and `None` leave the base value untouched. Unknown keys
/// are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Overrides {
    pub platform: Option<String>,
    #[serde(alias = "mode")]
    pub crawler_type: Option<String>,
    pub keywords: Option<String>,
    /// Mapped onto the platform's `specified` or `creators` list by mode.
    pub inputs: Option<Vec<String>>,
    pub start_page: Option<u32>,
    pub max_notes: Option<usize>,
    pub concurrency: Option<usize>,
    pub cookies: Option<String>,
    pub data_dir: Option<String>,
    pub store_backend: Option<String>,
    pub save_data_option: Option<String>,
    pub sqlite_path: Option<String>,
    pub mysql_dsn: Option<String>,
    pub postgres_dsn: Option<String>,
    pub mongo_uri: Option<String>,
    pub mongo_db: Option<String>,
    pub enable_ip_proxy: Option<bool>,
    pub ip_proxy_list: Option<String>,
    pub ip_proxy_file: Option<String>,
    pub ip_proxy_pool_count: Option<usize>,
    pub ip_proxy_provider_name: Option<String>,
    #[serde(alias = "enable_comments")]
    pub enable_get_comments: Option<bool>,
    #[serde(alias = "enable_sub_comments")]
    pub enable_get_sub_comments: Option<bool>,
    pub enable_get_medias: Option<bool>,
}

/// Maps a platform name or alias to its canonical name.
///
/// Unknown names come back trimmed and lowercased.
#[must_use]
pub fn canonical_platform(name: &str) -> String {
    let name = name.trim().to_lowercase();
    let canonical = match name.as_str() {
        "bilibili" | "bili" | "b站" | "b" => "bilibili",
        "weibo" | "wb" | "微博" => "weibo",
        "tieba" | "tb" | "贴吧" => "tieba",
        "zhihu" | "zh" | "知乎" => "zhihu",
        "kuaishou" | "ks" | "快手" => "kuaishou",
        "douyin" | "dy" | "抖音" => "douyin",
        "xhs" | "小红书" => "xhs",
        _ => return name,
    };
    canonical.to_string()
}

/// Splits a comma separated list, dropping blanks.
#[must_use]
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn set_string(target: &mut String, value: Option<&String>) {
    if let Some(v) = value.map(|v| v.trim()).filter(|v| !v.is_empty()) {
        *target = v.to_string();
    }
}

impl Config {
    /// Loads a config file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns the TOML decode error.
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Trims and lowercases enum-like fields, resolves aliases and
    /// canonicalizes platform names (including the `inputs` table keys).
    pub fn normalize(&mut self) {
        self.platform = canonical_platform(&self.platform);
        self.crawler_type = self.crawler_type.trim().to_lowercase();
        if self.crawler_type.is_empty() {
            self.crawler_type = "search".to_string();
        }

        self.store_backend = match self.store_backend.trim().to_lowercase().as_str() {
            "" => "file".to_string(),
            "postgresql" => "postgres".to_string(),
            "mongo" => "mongodb".to_string(),
            other => other.to_string(),
        };
        self.save_data_option = match self.save_data_option.trim().to_lowercase().as_str() {
            "" => "json".to_string(),
            "excel" => "xlsx_book".to_string(),
            other => other.to_string(),
        };
        self.ip_proxy_provider_name = self.ip_proxy_provider_name.trim().to_lowercase();
        self.log_level = self.log_level.trim().to_lowercase();
        self.log_format = self.log_format.trim().to_lowercase();
        self.bili_search_mode = self.bili_search_mode.trim().to_lowercase();
        self.weibo_search_type = self.weibo_search_type.trim().to_string();
        if self.mongo_db.trim().is_empty() {
            self.mongo_db = crate::store::mirror::DEFAULT_MONGO_DB.to_string();
        }

        let inputs = std::mem::take(&mut self.inputs);
        for (name, entry) in inputs {
            let slot = self.inputs.entry(canonical_platform(&name)).or_default();
            slot.specified.extend(entry.specified);
            slot.creators.extend(entry.creators);
        }
    }

    /// Checks ranges and enum membership.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform.trim().is_empty() {
            return Err(ConfigError::Invalid("platform is required".to_string()));
        }
        validate_one_of("crawler_type", &self.crawler_type, &CRAWLER_TYPES)?;
        validate_one_of("store_backend", &self.store_backend, &STORE_BACKENDS)?;
        validate_one_of("save_data_option", &self.save_data_option, &SAVE_OPTIONS)?;
        validate_one_of("log_level", &self.log_level, &LOG_LEVELS)?;
        validate_one_of("log_format", &self.log_format, &LOG_FORMATS)?;

        validate_range("http_timeout_sec", self.http_timeout_sec, 1, 600)?;
        validate_range("http_retry_count", u64::from(self.http_retry_count), 0, 10)?;
        validate_range("http_retry_base_delay_ms", self.http_retry_base_delay_ms, 0, 60_000)?;
        validate_range("http_retry_max_delay_ms", self.http_retry_max_delay_ms, 0, 300_000)?;
        if self.http_retry_max_delay_ms < self.http_retry_base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "Invalid config value for `http_retry_max_delay_ms`: {}. Expected at least `http_retry_base_delay_ms` ({})",
                self.http_retry_max_delay_ms, self.http_retry_base_delay_ms
            )));
        }
        validate_range("start_page", u64::from(self.start_page), 1, 10_000)?;
        validate_range("max_concurrency_num", self.max_concurrency_num as u64, 1, 64)?;
        validate_range("ip_proxy_pool_count", self.ip_proxy_pool_count as u64, 1, 100)?;
        validate_range("crawler_max_sleep_sec", self.crawler_max_sleep_sec, 0, 600)?;
        Ok(())
    }

    /// Applies non-blank overrides.
    ///
    /// `inputs` lands in the `specified` or `creators` list of the
    /// (overridden) platform depending on the (overridden) mode.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        set_string(&mut self.platform, overrides.platform.as_ref());
        set_string(&mut self.crawler_type, overrides.crawler_type.as_ref());
        set_string(&mut self.keywords, overrides.keywords.as_ref());
        set_string(&mut self.cookies, overrides.cookies.as_ref());
        set_string(&mut self.data_dir, overrides.data_dir.as_ref());
        set_string(&mut self.store_backend, overrides.store_backend.as_ref());
        set_string(&mut self.save_data_option, overrides.save_data_option.as_ref());
        set_string(&mut self.sqlite_path, overrides.sqlite_path.as_ref());
        set_string(&mut self.mysql_dsn, overrides.mysql_dsn.as_ref());
        set_string(&mut self.postgres_dsn, overrides.postgres_dsn.as_ref());
        set_string(&mut self.mongo_uri, overrides.mongo_uri.as_ref());
        set_string(&mut self.mongo_db, overrides.mongo_db.as_ref());
        set_string(&mut self.ip_proxy_list, overrides.ip_proxy_list.as_ref());
        set_string(&mut self.ip_proxy_file, overrides.ip_proxy_file.as_ref());
        set_string(
            &mut self.ip_proxy_provider_name,
            overrides.ip_proxy_provider_name.as_ref(),
        );

        if let Some(v) = overrides.start_page.filter(|v| *v > 0) {
            self.start_page = v;
        }
        if let Some(v) = overrides.max_notes.filter(|v| *v > 0) {
            self.crawler_max_notes_count = v;
        }
        if let Some(v) = overrides.concurrency.filter(|v| *v > 0) {
            self.max_concurrency_num = v;
        }
        if let Some(v) = overrides.ip_proxy_pool_count.filter(|v| *v > 0) {
            self.ip_proxy_pool_count = v;
        }
        if let Some(v) = overrides.enable_ip_proxy {
            self.enable_ip_proxy = v;
        }
        if let Some(v) = overrides.enable_get_comments {
            self.enable_get_comments = v;
        }
        if let Some(v) = overrides.enable_get_sub_comments {
            self.enable_get_sub_comments = v;
        }
        if let Some(v) = overrides.enable_get_medias {
            self.enable_get_medias = v;
        }

        if let Some(items) = &overrides.inputs {
            let items: Vec<String> = items
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !items.is_empty() {
                let entry = self.inputs.entry(canonical_platform(&self.platform)).or_default();
                if Mode::parse(&self.crawler_type) == Mode::Creator {
                    entry.creators = items;
                } else {
                    entry.specified = items;
                }
            }
        }
    }

    /// Parsed crawl mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        Mode::parse(&self.crawler_type)
    }

    /// Inputs configured for a platform.
    #[must_use]
    pub fn platform_inputs(&self, platform: &str) -> PlatformInputs {
        self.inputs
            .get(&canonical_platform(platform))
            .cloned()
            .unwrap_or_default()
    }

    /// Builds the job request for the configured platform and mode.
    #[must_use]
    pub fn request(&self) -> Request {
        let platform = canonical_platform(&self.platform);
        let mode = self.mode();
        let inputs = self.platform_inputs(&platform);
        let inputs = match mode {
            Mode::Search => Vec::new(),
            Mode::Detail => inputs.specified,
            Mode::Creator => inputs.creators,
        };
        Request {
            platform,
            mode,
            keywords: split_csv(&self.keywords),
            inputs: inputs
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            start_page: self.start_page.max(1),
            max_notes: self.crawler_max_notes_count,
            concurrency: self.max_concurrency_num.max(1),
        }
    }

    /// Fetch client settings for the configured platform.
    #[must_use]
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.http_timeout_sec.max(1)),
            retry_count: self.http_retry_count,
            base_delay: Duration::from_millis(self.http_retry_base_delay_ms),
            max_delay: Duration::from_millis(self.http_retry_max_delay_ms),
            cookie: self.cookies.trim().to_string(),
            ..FetchConfig::for_platform(canonical_platform(&self.platform))
        }
    }

    /// Store settings for the configured platform and mode.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unsupported`] for an unknown backend or save
    /// option.
    pub fn store_options(&self) -> Result<StoreOptions, StoreError> {
        Ok(StoreOptions {
            data_dir: PathBuf::from(self.data_dir.trim()),
            platform: canonical_platform(&self.platform),
            mode: self.mode().as_str().to_string(),
            save_option: SaveOption::parse(&self.save_data_option)?,
            backend: Backend::parse(&self.store_backend)?,
            mirror: self.mirror_settings(),
        })
    }

    /// Mirror connection settings.
    #[must_use]
    pub fn mirror_settings(&self) -> MirrorSettings {
        MirrorSettings {
            sqlite_path: self.sqlite_path.trim().to_string(),
            mysql_dsn: self.mysql_dsn.trim().to_string(),
            postgres_dsn: self.postgres_dsn.trim().to_string(),
            mongo_uri: self.mongo_uri.trim().to_string(),
            mongo_db: self.mongo_db.trim().to_string(),
        }
    }

    /// Media downloader settings sharing the HTTP retry budget.
    #[must_use]
    pub fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            retry_count: self.http_retry_count,
            base_delay: Duration::from_millis(self.http_retry_base_delay_ms),
            max_delay: Duration::from_millis(self.http_retry_max_delay_ms),
            ..DownloaderConfig::default()
        }
    }

    /// Pause between successive items of one worker.
    #[must_use]
    pub fn item_pause(&self) -> Duration {
        Duration::from_secs(self.crawler_max_sleep_sec)
    }
}

fn validate_one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    if allowed.contains(&value) {
        return Ok(());
    }
    Err(ConfigError::Invalid(format!(
        "Invalid config value for `{field}`: {value:?}. Expected one of: {}",
        allowed.join(", ")
    )))
}

fn validate_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    Err(ConfigError::Invalid(format!(
        "Invalid config value for `{field}`: {value}. Expected range: {min}..={max}"
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ==================== Load Tests ====================

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.crawler_max_notes_count, 15);
        assert_eq!(config.log_format, "text");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
platform = "b站"
crawler_type = "detail"
max_concurrency_num = 3

[inputs.bili]
specified = ["BV1xx411c7mD", " "]
"#,
        )
        .unwrap();
        let mut config = Config::load(&path).unwrap();
        config.normalize();
        assert_eq!(config.platform, "bilibili");
        assert_eq!(config.http_timeout_sec, 60);
        assert_eq!(config.inputs["bilibili"].specified.len(), 2);

        let request = config.request();
        assert_eq!(request.platform, "bilibili");
        assert_eq!(request.mode, Mode::Detail);
        assert_eq!(request.inputs, vec!["BV1xx411c7mD".to_string()]);
        assert_eq!(request.concurrency, 3);
        assert_eq!(request.max_notes, 15);
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "platform = [").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    // ==================== Normalize Tests ====================

    #[test]
    fn test_normalize_maps_aliases() {
        let mut config = Config {
            platform: " 快手 ".into(),
            crawler_type: "".into(),
            store_backend: "PostgreSQL".into(),
            save_data_option: "Excel".into(),
            ..Config::default()
        };
        config.normalize();
        assert_eq!(config.platform, "kuaishou");
        assert_eq!(config.crawler_type, "search");
        assert_eq!(config.store_backend, "postgres");
        assert_eq!(config.save_data_option, "xlsx_book");
    }

    #[test]
    fn test_canonical_platform_passes_unknown_names_through() {
        assert_eq!(canonical_platform("WB"), "weibo");
        assert_eq!(canonical_platform("Nowhere"), "nowhere");
    }

    // ==================== Validate Tests ====================

    #[test]
    fn test_validate_rejects_out_of_range_concurrency() {
        let config = Config {
            max_concurrency_num: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert_eq!(
            err,
            "Invalid config value for `max_concurrency_num`: 0. Expected range: 1..=64"
        );
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        let config = Config {
            store_backend: "redis".into(),
            ..Config::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("`store_backend`"));
        assert!(err.contains("mongodb"));
    }

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    // ==================== Override Tests ====================

    #[test]
    fn test_inputs_override_follows_mode() {
        let mut config = Config::default();
        config.apply_overrides(&Overrides {
            platform: Some("weibo".into()),
            crawler_type: Some("creator".into()),
            inputs: Some(vec!["1749127163".into(), "".into()]),
            max_notes: Some(0),
            ..Overrides::default()
        });
        assert_eq!(config.inputs["weibo"].creators, vec!["1749127163".to_string()]);
        assert!(config.inputs["weibo"].specified.is_empty());
        assert_eq!(config.crawler_max_notes_count, 15);
    }

    #[test]
    fn test_blank_overrides_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(&Overrides {
            keywords: Some("  ".into()),
            store_backend: Some("sqlite".into()),
            ..Overrides::default()
        });
        assert_eq!(config.keywords, Config::default().keywords);
        assert_eq!(config.store_backend, "sqlite");
    }

    #[test]
    fn test_request_splits_keywords() {
        let config = Config {
            keywords: "rust, ,tokio,".into(),
            ..Config::default()
        };
        assert_eq!(config.request().keywords, vec!["rust", "tokio"]);
    }

    #[test]
    fn test_builders_carry_settings() {
        let config = Config {
            platform: "bilibili".into(),
            cookies: " SESSDATA=x ".into(),
            http_retry_count: 1,
            save_data_option: "csv".into(),
            ..Config::default()
        };
        let fetch = config.fetch_config();
        assert_eq!(fetch.platform, "bilibili");
        assert_eq!(fetch.cookie, "SESSDATA=x");
        assert_eq!(fetch.retry_count, 1);

        let store = config.store_options().unwrap();
        assert_eq!(store.save_option, SaveOption::Csv);
        assert_eq!(store.backend, Backend::File);
        assert_eq!(store.mode, "search");
        assert_eq!(config.item_pause(), Duration::from_secs(2));
    }
}

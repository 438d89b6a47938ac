//! Run-request checks applied to the merged job config.

use crate::config::Config;
use crate::crawler::Mode;
use crate::platform::Registry;

const STORE_BACKENDS: [&str; 5] = ["file", "sqlite", "mysql", "postgres", "mongodb"];
const SAVE_OPTIONS: [&str; 4] = ["json", "csv", "xlsx", "xlsx_book"];
const CRAWLER_TYPES: [&str; 3] = ["search", "detail", "creator"];

/// Checks a normalized job config against the registry.
///
/// Returns the message reported to the caller on the first failing check.
pub(crate) fn validate_run_config(config: &Config, registry: &Registry) -> Result<(), String> {
    let platform = config.platform.trim();
    if platform.is_empty() {
        return Err("platform is required".to_string());
    }
    if !registry.contains(platform) {
        return Err(format!("unknown platform: {platform}"));
    }
    if !STORE_BACKENDS.contains(&config.store_backend.as_str()) {
        return Err(format!("invalid store_backend: {}", config.store_backend));
    }
    if !SAVE_OPTIONS.contains(&config.save_data_option.as_str()) {
        return Err(format!("invalid save_data_option: {}", config.save_data_option));
    }
    if !CRAWLER_TYPES.contains(&config.crawler_type.as_str()) {
        return Err(format!("unsupported crawler_type: {}", config.crawler_type));
    }

    let request = config.request();
    match request.mode {
        Mode::Search if request.keywords.is_empty() => {
            Err("keywords is required for search".to_string())
        }
        Mode::Detail | Mode::Creator if request.inputs.is_empty() => {
            Err(format!("inputs is required for {}", request.mode))
        }
        _ => config.validate().map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Overrides;
    use crate::platform::builtin_registry;

    fn merged(overrides: &Overrides) -> Config {
        let mut config = Config::default();
        config.apply_overrides(overrides);
        config.normalize();
        config
    }

    // ==================== Platform Tests ====================

    #[test]
    fn test_unknown_and_unregistered_platforms() {
        let registry = builtin_registry();
        let err = validate_run_config(&merged(&Overrides::default()), &registry).unwrap_err();
        assert_eq!(err, "unknown platform: xhs");

        let config = merged(&Overrides {
            platform: Some("nope".into()),
            ..Overrides::default()
        });
        assert_eq!(validate_run_config(&config, &registry).unwrap_err(), "unknown platform: nope");
    }

    #[test]
    fn test_blank_platform() {
        let mut config = Config::default();
        config.platform = "  ".into();
        assert_eq!(
            validate_run_config(&config, &builtin_registry()).unwrap_err(),
            "platform is required"
        );
    }

    // ==================== Option Tests ====================

    #[test]
    fn test_store_and_save_options() {
        let registry = builtin_registry();
        let config = merged(&Overrides {
            platform: Some("b站".into()),
            store_backend: Some("redis".into()),
            ..Overrides::default()
        });
        assert_eq!(validate_run_config(&config, &registry).unwrap_err(), "invalid store_backend: redis");

        let config = merged(&Overrides {
            platform: Some("bilibili".into()),
            save_data_option: Some("parquet".into()),
            ..Overrides::default()
        });
        assert_eq!(
            validate_run_config(&config, &registry).unwrap_err(),
            "invalid save_data_option: parquet"
        );

        let config = merged(&Overrides {
            platform: Some("bilibili".into()),
            save_data_option: Some("excel".into()),
            ..Overrides::default()
        });
        validate_run_config(&config, &registry).unwrap();
    }

    // ==================== Mode Input Tests ====================

    #[test]
    fn test_mode_inputs_required() {
        let registry = builtin_registry();
        let config = merged(&Overrides {
            platform: Some("weibo".into()),
            keywords: Some("   ".into()),
            ..Overrides::default()
        });
        // Whitespace-only override keeps the default keywords.
        validate_run_config(&config, &registry).unwrap();

        // Separators alone replace the defaults and leave nothing to search.
        let config = merged(&Overrides {
            platform: Some("weibo".into()),
            keywords: Some(" , ".into()),
            ..Overrides::default()
        });
        assert_eq!(config.keywords, ",");
        assert_eq!(
            validate_run_config(&config, &registry).unwrap_err(),
            "keywords is required for search"
        );

        for mode in ["detail", "creator"] {
            let config = merged(&Overrides {
                platform: Some("tieba".into()),
                crawler_type: Some(mode.into()),
                ..Overrides::default()
            });
            assert_eq!(
                validate_run_config(&config, &registry).unwrap_err(),
                format!("inputs is required for {mode}")
            );
        }

        let config = merged(&Overrides {
            platform: Some("tieba".into()),
            crawler_type: Some("creator".into()),
            inputs: Some(vec!["un=rust".into()]),
            ..Overrides::default()
        });
        validate_run_config(&config, &registry).unwrap();
    }

    #[test]
    fn test_range_errors_surface() {
        let mut config = merged(&Overrides {
            platform: Some("zhihu".into()),
            ..Overrides::default()
        });
        config.max_concurrency_num = 0;
        let err = validate_run_config(&config, &builtin_registry()).unwrap_err();
        assert!(err.contains("max_concurrency_num"), "{err}");
    }
}

//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use media_crawler_core::Overrides;
use media_crawler_core::config::DEFAULT_CONFIG_FILE;

/// Crawl social-media sites into an idempotent local store.
#[derive(Parser, Debug)]
#[command(name = "media-crawler")]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the TOML config file (missing file means defaults)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Overrides for the default `run` command
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one crawl job in the foreground (default)
    Run(RunArgs),

    /// Start the HTTP control plane
    Serve {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
    },

    /// Create the configured database mirror schema and exit
    InitDb(StoreArgs),
}

/// Store and mirror flags.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Root directory for crawl output
    #[arg(long)]
    pub data_dir: Option<String>,

    /// file, sqlite, mysql, postgres or mongodb
    #[arg(long)]
    pub store_backend: Option<String>,

    /// json, csv, xlsx or xlsx_book
    #[arg(long)]
    pub save_data_option: Option<String>,

    #[arg(long)]
    pub sqlite_path: Option<String>,

    #[arg(long)]
    pub mysql_dsn: Option<String>,

    #[arg(long)]
    pub postgres_dsn: Option<String>,

    #[arg(long)]
    pub mongo_uri: Option<String>,

    #[arg(long)]
    pub mongo_db: Option<String>,
}

/// Job flags layered on top of the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Platform name or alias (bilibili, weibo, tieba, zhihu, kuaishou)
    #[arg(long)]
    pub platform: Option<String>,

    /// search, detail or creator
    #[arg(long)]
    pub mode: Option<String>,

    /// Comma separated search keywords
    #[arg(long)]
    pub keywords: Option<String>,

    /// Note or creator URLs/ids, depending on mode (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub inputs: Vec<String>,

    /// First result page for search (1-10000)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10000))]
    pub start_page: Option<u32>,

    /// Maximum notes per keyword or creator
    #[arg(long)]
    pub max_notes: Option<usize>,

    /// Concurrent workers (1-64)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=64))]
    pub concurrency: Option<u64>,

    /// Raw Cookie header sent with every request
    #[arg(long)]
    pub cookies: Option<String>,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Route requests through the proxy pool
    #[arg(long)]
    pub enable_ip_proxy: bool,

    /// Static proxy entries (ip:port or user:pass@ip:port)
    #[arg(long)]
    pub ip_proxy_list: Option<String>,

    /// File with one proxy entry per line
    #[arg(long)]
    pub ip_proxy_file: Option<String>,

    #[arg(long)]
    pub ip_proxy_pool_count: Option<usize>,
}

impl StoreArgs {
    fn apply(&self, overrides: &mut Overrides) {
        overrides.data_dir.clone_from(&self.data_dir);
        overrides.store_backend.clone_from(&self.store_backend);
        overrides.save_data_option.clone_from(&self.save_data_option);
        overrides.sqlite_path.clone_from(&self.sqlite_path);
        overrides.mysql_dsn.clone_from(&self.mysql_dsn);
        overrides.postgres_dsn.clone_from(&self.postgres_dsn);
        overrides.mongo_uri.clone_from(&self.mongo_uri);
        overrides.mongo_db.clone_from(&self.mongo_db);
    }

    /// Overrides carrying only the store flags.
    pub fn overrides(&self) -> Overrides {
        let mut overrides = Overrides::default();
        self.apply(&mut overrides);
        overrides
    }
}

impl RunArgs {
    /// Converts the flags into config overrides.
    pub fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            platform: self.platform.clone(),
            crawler_type: self.mode.clone(),
            keywords: self.keywords.clone(),
            inputs: (!self.inputs.is_empty()).then(|| self.inputs.clone()),
            start_page: self.start_page,
            max_notes: self.max_notes,
            concurrency: self.concurrency.and_then(|c| usize::try_from(c).ok()),
            cookies: self.cookies.clone(),
            enable_ip_proxy: self.enable_ip_proxy.then_some(true),
            ip_proxy_list: self.ip_proxy_list.clone(),
            ip_proxy_file: self.ip_proxy_file.clone(),
            ip_proxy_pool_count: self.ip_proxy_pool_count,
            ..Overrides::default()
        };
        self.store.apply(&mut overrides);
        overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Global Flag Tests ====================

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let cli = Cli::try_parse_from(["media-crawler"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert_eq!(cli.run.overrides(), Overrides::default());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let cli = Cli::try_parse_from(["media-crawler", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        let cli = Cli::try_parse_from(["media-crawler", "serve", "-v"]).unwrap();
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Cli::try_parse_from(["media-crawler", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    // ==================== Run Flag Tests ====================

    #[test]
    fn test_run_flags_map_to_overrides() {
        let cli = Cli::try_parse_from([
            "media-crawler",
            "run",
            "--platform",
            "b站",
            "--mode",
            "detail",
            "--inputs",
            "BV1xx,BV2yy",
            "--concurrency",
            "4",
            "--store-backend",
            "sqlite",
            "--enable-ip-proxy",
        ])
        .unwrap();
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run command");
        };
        let overrides = args.overrides();
        assert_eq!(overrides.platform.as_deref(), Some("b站"));
        assert_eq!(overrides.crawler_type.as_deref(), Some("detail"));
        assert_eq!(overrides.inputs, Some(vec!["BV1xx".to_string(), "BV2yy".to_string()]));
        assert_eq!(overrides.concurrency, Some(4));
        assert_eq!(overrides.store_backend.as_deref(), Some("sqlite"));
        assert_eq!(overrides.enable_ip_proxy, Some(true));
    }

    #[test]
    fn test_top_level_run_flags_without_subcommand() {
        let cli = Cli::try_parse_from(["media-crawler", "--platform", "weibo", "--keywords", "rust"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.overrides().keywords.as_deref(), Some("rust"));
    }

    #[test]
    fn test_concurrency_zero_rejected() {
        let err = Cli::try_parse_from(["media-crawler", "--concurrency", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    // ==================== Subcommand Tests ====================

    #[test]
    fn test_serve_default_addr() {
        let cli = Cli::try_parse_from(["media-crawler", "serve"]).unwrap();
        let Some(Command::Serve { addr }) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_init_db_store_flags() {
        let cli = Cli::try_parse_from(["media-crawler", "init-db", "--store-backend", "postgres"]).unwrap();
        let Some(Command::InitDb(store)) = cli.command else {
            panic!("expected init-db command");
        };
        assert_eq!(store.overrides().store_backend.as_deref(), Some("postgres"));
    }
}

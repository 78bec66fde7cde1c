use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use newsdesk::config::Config;
use newsdesk::connectivity::{Banner, ConnectivityMonitor, ManualMonitor, ProbeMonitor, Status};
use newsdesk::content::{redirect_policy, ContentFetcher};
use newsdesk::news::{NewsApiClient, NewsError, NewsSource, PageResponse};
use newsdesk::storage::{Article, Database, DatabaseError};
use newsdesk::sync::{FeedKind, FeedState, FeedStatus, SyncController};
use newsdesk::util::{strip_control_chars, truncate_to_width};

/// Column budget for titles in list output
const TITLE_WIDTH: usize = 96;

/// Get the config directory path (~/.config/newsdesk/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newsdesk"))
}

#[derive(Parser, Debug)]
#[command(
    name = "newsdesk",
    version,
    about = "News headlines, search and favourites with an offline cache"
)]
struct Args {
    /// Config file (default: ~/.config/newsdesk/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (default: ~/.config/newsdesk/newsdesk.db)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Treat the network as unavailable
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Top headlines for a region (cached headlines when offline)
    Headlines {
        /// Two-letter country code (default from config)
        #[arg(long)]
        region: Option<String>,

        /// Number of pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: u32,

        /// Start over from page 1, replacing the cache
        #[arg(long)]
        refresh: bool,
    },
    /// Search all articles
    Search {
        query: String,

        /// Number of pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Manage favourites
    Favourites {
        #[command(subcommand)]
        action: Option<FavouritesCommand>,
    },
    /// Print the readable text of an article
    Read { url: String },
    /// Report connectivity changes until Ctrl-C
    Watch,
}

#[derive(Subcommand, Debug)]
enum FavouritesCommand {
    /// List favourites in the order they were added
    List,
    /// Add an article by URL
    Add { url: String },
    /// Remove an article by URL
    Remove { url: String },
}

/// Stand-in source when no API key is configured: every call fails, so
/// headlines fall back to the cache and searches report the missing key.
struct Unconfigured;

#[async_trait]
impl NewsSource for Unconfigured {
    async fn top_headlines(&self, _country: &str, _page: u32) -> Result<PageResponse, NewsError> {
        Err(NewsError::MissingApiKey)
    }

    async fn search(&self, _query: &str, _page: u32) -> Result<PageResponse, NewsError> {
        Err(NewsError::MissingApiKey)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Configuration");

    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir.join("newsdesk.db")
        }
    };
    let db = open_database(&db_path).await?;

    let http = reqwest::Client::builder()
        .redirect(redirect_policy())
        .user_agent(concat!("newsdesk/", env!("CARGO_PKG_VERSION")))
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let source: Arc<dyn NewsSource> = match config.api_key() {
        Some(key) => Arc::new(
            NewsApiClient::new(http.clone(), &config.base_url, key)?
                .with_page_size(config.page_size())
                .with_timeout(config.request_timeout()),
        ),
        None => {
            tracing::warn!("No API key configured, remote calls will fail");
            Arc::new(Unconfigured)
        }
    };

    let monitor: Arc<dyn ConnectivityMonitor> = if args.offline {
        Arc::new(ManualMonitor::new(Status::Unavailable))
    } else {
        Arc::new(ProbeMonitor::new(
            config.probe_address.clone(),
            config.probe_interval(),
        ))
    };

    let fetcher = ContentFetcher::new(http).with_timeout(config.request_timeout());
    let controller = SyncController::new(
        source,
        db,
        monitor.clone(),
        fetcher,
        config.sync_options(),
    )
    .await
    .context("Failed to start")?;

    match args.command {
        Command::Headlines {
            region,
            pages,
            refresh,
        } => {
            let region = region.unwrap_or_else(|| config.region.clone());
            let mut state = if refresh {
                controller.refresh_headlines(&region).await
            } else {
                controller.fetch_headlines(&region).await
            };
            for _ in 1..pages {
                if state.status != FeedStatus::Success || !controller.has_more(FeedKind::Headlines) {
                    break;
                }
                state = controller.fetch_headlines(&region).await;
            }
            if state.offline {
                eprintln!(
                    "Offline: showing {} cached headlines",
                    state.articles.len()
                );
            }
            print_feed(&state);
        }
        Command::Search { query, pages } => {
            let mut state = controller.search_news(&query).await;
            for _ in 1..pages {
                if state.status != FeedStatus::Success || !controller.has_more(FeedKind::Search) {
                    break;
                }
                state = controller.search_news(&query).await;
            }
            print_feed(&state);
            if state.total_results > 0 {
                println!(
                    "\n{} of {} results",
                    state.articles.len(),
                    state.total_results
                );
            }
        }
        Command::Favourites { action } => match action.unwrap_or(FavouritesCommand::List) {
            FavouritesCommand::List => {
                let favourites = controller.list_favourites().await?;
                if favourites.is_empty() {
                    println!("No favourites yet.");
                }
                print_articles(&favourites);
            }
            FavouritesCommand::Add { url } => {
                let article = lookup_article(&controller, &url).await?;
                controller.add_favourite(&article).await?;
                println!("Saved: {}", display_title(&article));
            }
            FavouritesCommand::Remove { url } => {
                let article = lookup_article(&controller, &url).await?;
                controller.remove_favourite(&article).await?;
                println!("Removed: {}", display_title(&article));
            }
        },
        Command::Read { url } => match controller.extract_article_body(&url).await {
            Some(body) => println!("{}", strip_control_chars(&body)),
            None => {
                eprintln!("No content found.");
                std::process::exit(1);
            }
        },
        Command::Watch => watch(monitor.as_ref()).await,
    }

    Ok(())
}

fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    Ok(())
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of newsdesk appears to be using the database. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

/// The stored copy of `url` if we have one, otherwise a bare article.
async fn lookup_article(controller: &SyncController, url: &str) -> Result<Article> {
    let url = url.trim();
    let parsed = url::Url::parse(url).with_context(|| format!("Invalid URL: {url}"))?;

    if let Some(article) = controller
        .headlines()
        .articles
        .into_iter()
        .chain(controller.search().articles)
        .find(|a| a.url == url)
    {
        return Ok(article);
    }
    if let Some(article) = controller.stored_article(url).await? {
        return Ok(article);
    }

    Ok(Article {
        url: url.to_string(),
        title: parsed.host_str().unwrap_or(url).to_string(),
        description: None,
        url_to_image: None,
        published_at: String::new(),
        source: String::new(),
        is_favourite: false,
        is_headline_cache: false,
    })
}

fn print_feed(state: &FeedState) {
    if state.status == FeedStatus::Error {
        let message = state
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "Unknown error".to_string());
        eprintln!("Error: {}", strip_control_chars(&message));
        std::process::exit(1);
    }
    if state.articles.is_empty() {
        println!("No articles.");
    }
    print_articles(&state.articles);
}

fn print_articles(articles: &[Article]) {
    for (i, article) in articles.iter().enumerate() {
        let marker = if article.is_favourite { "*" } else { " " };
        println!("{:>3}.{} {}", i + 1, marker, display_title(article));

        let date = article
            .published()
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "      {} | {} | {}",
            strip_control_chars(&article.source),
            date,
            strip_control_chars(&article.url)
        );
    }
}

fn display_title(article: &Article) -> String {
    let title = strip_control_chars(&article.title);
    truncate_to_width(&title, TITLE_WIDTH).into_owned()
}

async fn watch(monitor: &dyn ConnectivityMonitor) {
    let initial = monitor.current_status().await;
    let mut banner = Banner::new(initial);
    println!("Connectivity: {initial}");
    if let Some(message) = banner.visible() {
        println!("[{message}]");
    }

    let mut subscription = monitor.subscribe();
    loop {
        let hide_at = banner.hide_at();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            status = subscription.next() => {
                let Some(status) = status else { break };
                println!("Connectivity: {status}");
                if let Some(message) = banner.observe(status, tokio::time::Instant::now()) {
                    println!("[{message}]");
                }
            }
            _ = async {
                match hide_at {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                if banner.tick(tokio::time::Instant::now()) {
                    println!("[banner hidden]");
                }
            }
        }
    }

    subscription.unsubscribe().await;
}

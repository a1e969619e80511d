use anyhow::{Context, Result};
use clap::Parser;
use mlsync_core::{ReportFormat, SyncEngine, SyncError, DEFAULT_REFRESH_RATE_SECS};
use mlsync_mlflow::{MlflowApi, MlflowProducer};
use mlsync_notion::{pick_page, NotionApi, NotionConsumer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_MLFLOW_URI: &str = "http://127.0.0.1:5000";
const SERVER_WAIT_ATTEMPTS: u32 = 30;

#[derive(Parser)]
#[command(name = "mlsync", version, about = "Sync your ML experiments with your favorite apps")]
struct Cli {
    /// Configuration file; resolved settings are written back to it
    #[arg(short, long)]
    config: PathBuf,
    /// Producer of ML data
    #[arg(short, long, default_value = "mlflow")]
    producer: String,
    /// Consumer of ML data
    #[arg(short = 'd', long, default_value = "notion")]
    consumer: String,
    /// Refresh rate in seconds
    #[arg(long)]
    refresh_rate: Option<u64>,
    /// Path to the report format YAML file
    #[arg(short, long)]
    format: Option<PathBuf>,
    /// MLflow tracking server URI
    #[arg(long)]
    mlflow_uri: Option<String>,
    /// Notion integration token
    #[arg(long)]
    notion_token: Option<String>,
    /// Notion page ID or page URL
    #[arg(long)]
    notion_page_id: Option<String>,
    /// Attach full metric histories to every run
    #[arg(long)]
    detailed_metrics: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Config {
    #[serde(default)]
    mlflow: MlflowSection,
    #[serde(default)]
    notion: NotionSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_rate: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MlflowSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NotionSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_id: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    if cli.producer != "mlflow" {
        return Err(SyncError::Config(format!("producer {} is not supported", cli.producer)).into());
    }
    if cli.consumer != "notion" {
        return Err(SyncError::Config(format!("consumer {} is not supported", cli.consumer)).into());
    }

    let format_path = resolve(cli.format, config.mlflow.format.clone(), None)
        .ok_or_else(|| SyncError::Config("no report format specified".to_string()))?;
    let format_text = std::fs::read_to_string(&format_path)
        .with_context(|| format!("reading report format {}", format_path.display()))?;
    let report_format = ReportFormat::from_yaml(&format_text)?;
    config.mlflow.format = Some(format_path);

    let mlflow_uri = resolve(
        cli.mlflow_uri,
        config.mlflow.uri.clone(),
        std::env::var("MLFLOW_URI").ok(),
    )
    .unwrap_or_else(|| {
        warn!("no MLflow URI specified, using {DEFAULT_MLFLOW_URI}");
        DEFAULT_MLFLOW_URI.to_string()
    });
    config.mlflow.uri = Some(mlflow_uri.clone());

    let notion_token = resolve(
        cli.notion_token,
        config.notion.token.clone(),
        std::env::var("NOTION_TOKEN").ok(),
    )
    .ok_or_else(|| SyncError::Config("NOTION_TOKEN is not set".to_string()))?;

    let notion_api = NotionApi::new(notion_token);
    let notion_page_id = match resolve(
        cli.notion_page_id,
        config.notion.page_id.clone(),
        std::env::var("NOTION_PAGE_ID").ok(),
    ) {
        Some(raw) => page_id_from_url(&raw).unwrap_or(raw),
        None => pick_page(&notion_api)?,
    };
    config.notion.page_id = Some(notion_page_id.clone());

    let refresh_rate = resolve(cli.refresh_rate, config.refresh_rate, None).unwrap_or_else(|| {
        warn!("no refresh rate specified, using {DEFAULT_REFRESH_RATE_SECS} second(s)");
        DEFAULT_REFRESH_RATE_SECS
    });
    config.refresh_rate = Some(refresh_rate);

    // The token is only written back when it was already in the file.
    write_config(&cli.config, &config)?;

    let mlflow_api = MlflowApi::new(format!("{mlflow_uri}/api"));
    mlflow_api.wait_until_ready(SERVER_WAIT_ATTEMPTS)?;
    let producer = MlflowProducer::new(mlflow_api, report_format);
    let consumer = NotionConsumer::new(notion_api, notion_page_id)?;

    info!(refresh_rate, "starting sync loop");
    SyncEngine::new(producer, consumer, refresh_rate, cli.detailed_metrics).run()
}

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn write_config(path: &Path, config: &Config) -> Result<()> {
    let text = serde_yaml::to_string(config)?;
    std::fs::write(path, text).with_context(|| format!("writing config {}", path.display()))
}

// Per-setting precedence: CLI flag, then config file, then environment.
fn resolve<T>(flag: Option<T>, config: Option<T>, env: Option<T>) -> Option<T> {
    flag.or(config).or(env)
}

/// Extract the page id from a notion.so URL. Returns None for anything that
/// is not a URL so plain ids pass through untouched.
fn page_id_from_url(raw: &str) -> Option<String> {
    if !raw.starts_with("https://www.notion.so/") && !raw.starts_with("https://notion.so/") {
        return None;
    }
    let tail = raw
        .split(['?', '#'])
        .next()?
        .rsplit('/')
        .next()?
        .rsplit('-')
        .next()?;
    if tail.len() != 32 || !tail.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!(
        "{}-{}-{}-{}-{}",
        &tail[0..8],
        &tail[8..12],
        &tail[12..16],
        &tail[16..20],
        &tail[20..32]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_config_and_env() {
        assert_eq!(
            resolve(Some("flag"), Some("config"), Some("env")),
            Some("flag")
        );
        assert_eq!(resolve(None, Some("config"), Some("env")), Some("config"));
        assert_eq!(resolve::<&str>(None, None, Some("env")), Some("env"));
        assert_eq!(resolve::<&str>(None, None, None), None);
    }

    #[test]
    fn extracts_page_id_from_url() {
        let url = "https://www.notion.so/acme/Experiments-0123456789abcdef0123456789abcdef?pvs=4";
        assert_eq!(
            page_id_from_url(url).as_deref(),
            Some("01234567-89ab-cdef-0123-456789abcdef")
        );
    }

    #[test]
    fn accepts_urls_without_www() {
        let url = "https://notion.so/Experiments-0123456789abcdef0123456789abcdef";
        assert_eq!(
            page_id_from_url(url).as_deref(),
            Some("01234567-89ab-cdef-0123-456789abcdef")
        );
    }

    #[test]
    fn plain_ids_are_not_urls() {
        assert_eq!(page_id_from_url("01234567-89ab-cdef-0123-456789abcdef"), None);
        assert_eq!(
            page_id_from_url("https://www.notion.so/acme/Experiments-not-an-id"),
            None
        );
    }

    #[test]
    fn config_round_trips_without_token() {
        let yaml = "mlflow:\n  uri: http://127.0.0.1:5000\nnotion:\n  page_id: abc\nrefresh_rate: 5\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.refresh_rate, Some(5));
        assert!(config.notion.token.is_none());
        let written = serde_yaml::to_string(&config).unwrap();
        assert!(!written.contains("token"));
    }
}

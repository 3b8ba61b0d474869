use anyhow::{Context, Result};
use clap::Parser;
use richtext_img::cdn::{CdnClient, CdnService, MockCdnClient};
use richtext_img::config::{cdn_base_url_from_env, CdnConfig};
use richtext_img::{CancellationToken, ImageReplacer, ReplaceReport, ReplacerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "richtext-img")]
#[command(about = "Copy remote images in HTML to a CDN and rewrite their URLs")]
struct CliArgs {
    /// HTML input file. Reads stdin when omitted.
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Write the rewritten HTML here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write a JSON report of the run.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Per-image size limit in bytes.
    #[arg(long)]
    max_bytes: Option<u64>,

    /// Per-attempt timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Validate downloads but skip the real upload.
    #[arg(long)]
    dry_run: bool,
}

fn build_config(args: &CliArgs) -> Result<ReplacerConfig> {
    let mut config = ReplacerConfig::from_env()?;
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(max_bytes) = args.max_bytes {
        config.max_bytes = max_bytes;
    }
    if let Some(secs) = args.timeout {
        config.per_attempt_timeout = Duration::from_secs(secs);
    }
    config.validate()?;
    Ok(config)
}

async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("Failed to read stdin")?;
            Ok(input)
        }
    }
}

async fn run(args: CliArgs) -> Result<ReplaceReport> {
    let config = build_config(&args)?;
    let input = read_input(args.input.as_deref()).await?;

    let cdn: Arc<dyn CdnService> = if args.dry_run {
        info!("Dry run enabled, uploads will be simulated");
        Arc::new(MockCdnClient::new().with_base_url(cdn_base_url_from_env()))
    } else {
        Arc::new(CdnClient::new(CdnConfig::from_env()?).await?)
    };

    let replacer = ImageReplacer::new(config, cdn)?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling outstanding downloads");
                cancel.cancel();
            }
        })
    };

    let result = replacer.replace_with_report(&input, cancel).await;
    interrupt.abort();
    if let Err(e) = replacer.cleanup().await {
        warn!("Failed to clean up scratch directory: {}", e);
    }
    let report = result?;

    match &args.output {
        Some(path) => tokio::fs::write(path, &report.markup)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", report.markup),
    }

    if let Some(path) = &args.report {
        tokio::fs::write(path, report.to_json()?)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "richtext_img=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();

    match run(args).await {
        Ok(report) => {
            info!(
                "Done: {}/{} image(s) replaced",
                report.succeeded, report.total
            );
            Ok(())
        }
        Err(e) => {
            error!("Replacement failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

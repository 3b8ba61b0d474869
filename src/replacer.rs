//! Entry points: find remote images, mirror them, and rewrite the markup.

use crate::cdn::CdnService;
use crate::config::ReplacerConfig;
use crate::fetch::Fetcher;
use crate::markup::{extract_tasks, HtmlDocument, MarkupDocument};
use crate::models::{ReplaceReport, TaskFailure};
use crate::retry::RetryPolicy;
use crate::scheduler::run_tasks;
use crate::scratch::ScratchArea;
use crate::source::{HttpSource, ImageSource};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Collaborators used by an [`ImageReplacer`].
pub struct ReplacerServices {
    pub source: Arc<dyn ImageSource>,
    pub cdn: Arc<dyn CdnService>,
}

/// Replaces remote `<img>` sources with uploaded copies.
///
/// Individual image failures never fail a call; they leave the reference
/// as it was and show up in the [`ReplaceReport`]. Only markup that cannot
/// be parsed or written back is an error.
pub struct ImageReplacer {
    config: Arc<ReplacerConfig>,
    fetcher: Arc<Fetcher>,
    scratch: Arc<ScratchArea>,
    policy: RetryPolicy,
}

impl ImageReplacer {
    /// Replacer that downloads over HTTP.
    pub fn new(config: ReplacerConfig, cdn: Arc<dyn CdnService>) -> Result<Self> {
        let source: Arc<dyn ImageSource> = Arc::new(HttpSource::new(&config));
        Self::with_services(config, ReplacerServices { source, cdn })
    }

    pub fn with_services(config: ReplacerConfig, services: ReplacerServices) -> Result<Self> {
        Self::with_scratch(config, services, ScratchArea::new())
    }

    pub fn with_scratch(
        config: ReplacerConfig,
        services: ReplacerServices,
        scratch: ScratchArea,
    ) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let scratch = Arc::new(scratch);
        let fetcher = Arc::new(Fetcher::new(
            services.source,
            services.cdn,
            scratch.clone(),
            config.clone(),
        ));

        Ok(Self {
            policy: RetryPolicy::new(config.max_retries),
            config,
            fetcher,
            scratch,
        })
    }

    pub fn config(&self) -> &ReplacerConfig {
        &self.config
    }

    pub fn scratch(&self) -> &ScratchArea {
        &self.scratch
    }

    pub async fn replace(&self, markup: &str) -> Result<String> {
        self.replace_with_cancel(markup, CancellationToken::new())
            .await
    }

    pub async fn replace_with_cancel(&self, markup: &str, cancel: CancellationToken) -> Result<String> {
        Ok(self.replace_with_report(markup, cancel).await?.markup)
    }

    pub async fn replace_with_report(
        &self,
        markup: &str,
        cancel: CancellationToken,
    ) -> Result<ReplaceReport> {
        self.replace_document::<HtmlDocument>(markup, cancel).await
    }

    /// Run a full batch over any [`MarkupDocument`] implementation.
    pub async fn replace_document<D: MarkupDocument>(
        &self,
        markup: &str,
        cancel: CancellationToken,
    ) -> Result<ReplaceReport> {
        let mut doc = D::parse(markup)?;
        let tasks = extract_tasks(&doc);
        if tasks.is_empty() {
            return Ok(ReplaceReport::unchanged(markup.to_string()));
        }

        let total = tasks.len();
        let started = Instant::now();
        info!(
            "Replacing {} remote image(s) with concurrency {}",
            total, self.config.concurrency
        );

        let batch = cancel.child_token();
        let deadline = self.config.batch_deadline();
        let watchdog = {
            let batch = batch.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        warn!("Batch deadline of {:?} reached, cancelling remaining downloads", deadline);
                        batch.cancel();
                    }
                    _ = batch.cancelled() => {}
                }
            })
        };

        let mut results = run_tasks(
            tasks,
            self.fetcher.clone(),
            self.policy,
            self.config.concurrency,
            batch,
        )
        .await;
        watchdog.abort();
        results.sort_by_key(|r| r.task.index);

        let mut succeeded = 0;
        let mut failures = Vec::new();
        for result in results {
            match result.outcome {
                Ok(location) => {
                    doc.set_image_ref(result.task.node, &location)?;
                    succeeded += 1;
                }
                Err(e) => {
                    warn!("Keeping original image {}: {}", result.task.source, e);
                    failures.push(TaskFailure::new(&result.task, e));
                }
            }
        }

        let markup = doc.serialize()?;
        info!(
            "Replaced {}/{} image(s) in {:.2?} ({} failed)",
            succeeded,
            total,
            started.elapsed(),
            failures.len()
        );

        Ok(ReplaceReport {
            markup,
            total,
            succeeded,
            failures,
        })
    }

    /// Remove the scratch directory. Safe to call repeatedly.
    pub async fn cleanup(&self) -> Result<()> {
        self.scratch.cleanup().await.map_err(Error::Image)
    }
}

/// One-shot replacement over HTTP: build a replacer, run it, clean up.
pub async fn replace(
    markup: &str,
    config: ReplacerConfig,
    cdn: Arc<dyn CdnService>,
    cancel: CancellationToken,
) -> Result<String> {
    let replacer = ImageReplacer::new(config, cdn)?;
    let result = replacer.replace_with_cancel(markup, cancel).await;
    if let Err(e) = replacer.cleanup().await {
        warn!("Failed to clean up scratch directory: {}", e);
    }
    result
}

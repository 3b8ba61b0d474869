//! Bounded-concurrency execution of replacement tasks.

use crate::error::ImageError;
use crate::fetch::Fetcher;
use crate::models::{DownloadResult, ReplaceTask};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Run every task with at most `concurrency` workers alive at once.
///
/// A permit is taken before each worker is spawned, so queued tasks cost
/// nothing until a slot frees up. When `cancel` fires, undispatched tasks and
/// running workers report [`ImageError::Cancelled`]; results that already
/// arrived are kept. The returned results follow the order of `tasks`.
pub async fn run_tasks(
    tasks: Vec<ReplaceTask>,
    fetcher: Arc<Fetcher>,
    policy: RetryPolicy,
    concurrency: usize,
    cancel: CancellationToken,
) -> Vec<DownloadResult> {
    if tasks.is_empty() {
        return Vec::new();
    }

    let total = tasks.len();
    let originals = tasks.clone();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<(usize, DownloadResult)>(total);
    let mut slots: Vec<Option<DownloadResult>> = (0..total).map(|_| None).collect();

    let mut queue = tasks.into_iter().enumerate();
    for (slot, task) in queue.by_ref() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            slots[slot] = Some(DownloadResult::cancelled(task));
            break;
        };

        let tx = tx.clone();
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let label = format!("image {}", task.index);
            debug!("[{}] Fetching {}", label, task.source);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ImageError::Cancelled),
                result = policy.run(&label, || fetcher.fetch_and_persist(&task.source)) => result,
            };

            // The receiver only goes away if the batch itself was dropped.
            let _ = tx.send((slot, DownloadResult::new(task, outcome))).await;
        });
    }

    let skipped = queue.len();
    for (slot, task) in queue {
        slots[slot] = Some(DownloadResult::cancelled(task));
    }
    if skipped > 0 {
        info!("Cancelled before dispatch: {} image(s)", skipped);
    }

    drop(tx);
    while let Some((slot, result)) = rx.recv().await {
        slots[slot] = Some(result);
    }

    slots
        .into_iter()
        .zip(originals)
        .map(|(result, task)| {
            result.unwrap_or_else(|| {
                warn!("Worker for {} exited without a result", task.source);
                DownloadResult::new(task, Err(ImageError::WorkerLost))
            })
        })
        .collect()
}

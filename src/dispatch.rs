//! Fan-out over categories, fan-in before returning.
//!
//! Every category runs in its own tokio task: pipeline first, then delivery of
//! the resulting batch. A category that fails, or panics, is recorded in the
//! [`DispatchReport`] and never affects the others.
use chrono::{DateTime, Utc};

use crate::delivery::{Deliverer, DeliveryReport};
use crate::feed::FeedCategory;
use crate::pipeline::CategoryPipeline;

/// Outcome of one category run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryReport {
    pub name: String,
    pub feeds_ok: usize,
    pub feeds_failed: usize,
    /// Messages produced by the pipeline.
    pub selected: usize,
    pub delivered: usize,
    pub failed: usize,
    /// The category task panicked; counters hold whatever was known before.
    pub panicked: bool,
}

/// Outcome of a whole run, one entry per category in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub categories: Vec<CategoryReport>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.categories.iter().map(|c| c.delivered).sum()
    }

    pub fn failed(&self) -> usize {
        self.categories.iter().map(|c| c.failed).sum()
    }

    pub fn category(&self, name: &str) -> Option<&CategoryReport> {
        self.categories.iter().find(|c| c.name == name)
    }
}

/// Runs every category pipeline concurrently and delivers each batch.
///
/// Holds only immutable values built from the validated configuration.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pipeline: CategoryPipeline,
    deliverer: Deliverer,
}

impl Dispatcher {
    pub fn new(pipeline: CategoryPipeline, deliverer: Deliverer) -> Self {
        Self {
            pipeline,
            deliverer,
        }
    }

    /// Runs all `categories` with the window ending at `now`.
    ///
    /// Returns once every pipeline and every delivery, retries included, has
    /// finished. Nothing is cancelled part way.
    pub async fn run_all(&self, categories: &[FeedCategory], now: DateTime<Utc>) -> DispatchReport {
        let handles: Vec<_> = categories
            .iter()
            .cloned()
            .map(|category| {
                let name = category.name.clone();
                let pipeline = self.pipeline.clone();
                let deliverer = self.deliverer.clone();
                let handle = tokio::spawn(run_category(pipeline, deliverer, category, now));
                (name, handle)
            })
            .collect();

        let mut report = DispatchReport::default();
        for (name, handle) in handles {
            match handle.await {
                Ok(category_report) => report.categories.push(category_report),
                Err(e) => {
                    tracing::error!(category = %name, error = %e, "Category task failed");
                    report.categories.push(CategoryReport {
                        name,
                        panicked: e.is_panic(),
                        ..Default::default()
                    });
                }
            }
        }

        report
    }
}

async fn run_category(
    pipeline: CategoryPipeline,
    deliverer: Deliverer,
    category: FeedCategory,
    now: DateTime<Utc>,
) -> CategoryReport {
    let batch = pipeline.run(&category, now).await;

    let delivery = if batch.messages.is_empty() {
        tracing::info!(category = %category.name, "No new entries, nothing to deliver");
        DeliveryReport::default()
    } else {
        deliverer.deliver(&batch.messages).await
    };

    CategoryReport {
        name: category.name,
        feeds_ok: batch.feeds_ok,
        feeds_failed: batch.feeds_failed,
        selected: batch.messages.len(),
        delivered: delivery.delivered,
        failed: delivery.failed,
        panicked: false,
    }
}

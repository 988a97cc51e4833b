use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::cache::Cache;

/// Registers the periodic cache sweep and starts the scheduler. The caller
/// owns shutdown of the returned scheduler.
pub async fn configure_sweep_job(cron_spec: &str, cache: Cache) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let label = cron_spec.to_string();
    let job = Job::new_async(cron_spec, move |_id, _l| {
        let cache = cache.clone();
        let cron_label = label.clone();
        Box::pin(async move {
            cache.sweep().await;
            let stats = cache.stats();
            tracing::debug!(
                target: "scheduler",
                cron = %cron_label,
                backend = cache.backend_name(),
                hits = stats.hits,
                misses = stats.misses,
                "cache sweep finished"
            );
        })
    })?;
    scheduler.add(job).await?;
    tracing::info!(target: "scheduler", cron = %cron_spec, "cache sweep job registered");
    scheduler.start().await?;
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    #[tokio::test]
    async fn malformed_cron_is_rejected() {
        let cache = Cache::from_config(&CacheConfig::default());
        assert!(configure_sweep_job("every ten minutes", cache).await.is_err());
    }

    #[tokio::test]
    async fn default_cron_registers_and_shuts_down() {
        let cache = Cache::from_config(&CacheConfig::default());
        let mut scheduler = configure_sweep_job(&CacheConfig::default().sweep_cron, cache)
            .await
            .unwrap();
        scheduler.shutdown().await.unwrap();
    }
}

//! Providers that pretend to start, for exercising a manifest.

use async_trait::async_trait;
use stagehand_execution::{CompletionToken, Provider, ProviderRegistration, StartupContext};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::manifest::ProviderEntry;

/// A provider whose startup is a timed sleep.
pub struct SimulatedProvider {
    name: String,
    delay: Duration,
    fail: Option<String>,
    never_complete: bool,
    parked: Mutex<Option<CompletionToken>>,
}

impl SimulatedProvider {
    /// Build from a manifest entry.
    pub fn from_entry(entry: &ProviderEntry) -> Self {
        Self {
            name: entry.name.clone(),
            delay: Duration::from_millis(entry.delay_ms),
            fail: entry.fail.clone(),
            never_complete: entry.never_complete,
            parked: Mutex::new(None),
        }
    }
}

/// Register a manifest entry as a simulated provider with its constraints.
pub fn registration(entry: &ProviderEntry) -> ProviderRegistration {
    let mut registration =
        ProviderRegistration::new(&entry.name, Arc::new(SimulatedProvider::from_entry(entry)));
    registration.before = entry.before.clone();
    registration.after = entry.after.clone();
    registration
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn start(&self, ctx: StartupContext) -> anyhow::Result<()> {
        debug!(provider = %self.name, boot_id = %ctx.boot_id(), "Simulated start");

        if self.never_complete {
            let token = ctx.defer()?;
            *self.parked.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);
            return Ok(());
        }

        if self.delay.is_zero() {
            return match &self.fail {
                Some(message) => Err(anyhow::anyhow!(message.clone())),
                None => Ok(()),
            };
        }

        let token = ctx.defer()?;
        let delay = self.delay;
        let fail = self.fail.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let signalled = match fail {
                Some(message) => token.fail(anyhow::anyhow!(message)),
                None => token.complete(),
            };
            if let Err(e) = signalled {
                debug!(error = %e, "Simulated completion rejected");
            }
        });
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!(provider = %self.name, "Stopping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_execution::{StartupConfig, StartupError, StartupScheduler};

    fn entry(name: &str) -> ProviderEntry {
        ProviderEntry {
            name: name.to_string(),
            before: Vec::new(),
            after: Vec::new(),
            delay_ms: 0,
            fail: None,
            never_complete: false,
        }
    }

    fn register(scheduler: &mut StartupScheduler, entry: &ProviderEntry) {
        scheduler.register(registration(entry));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_providers_start_in_order() {
        let mut scheduler = StartupScheduler::new(StartupConfig::default());
        let db = ProviderEntry {
            delay_ms: 30,
            ..entry("db")
        };
        let web = ProviderEntry {
            after: vec!["db".to_string()],
            ..entry("web")
        };
        register(&mut scheduler, &web);
        register(&mut scheduler, &db);

        let report = scheduler.run().await.unwrap();
        assert_eq!(report.groups, vec![vec!["db".to_string()], vec!["web".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_failure_is_reported() {
        let mut scheduler = StartupScheduler::new(StartupConfig::default());
        register(
            &mut scheduler,
            &ProviderEntry {
                delay_ms: 5,
                fail: Some("disk full".to_string()),
                ..entry("storage")
            },
        );

        let err = scheduler.run().await.unwrap_err();
        assert!(matches!(err, StartupError::ProviderFailed { .. }));
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_completing_provider_times_out() {
        let mut scheduler = StartupScheduler::new(
            StartupConfig::default().with_max_wait(Duration::from_millis(100)),
        );
        register(
            &mut scheduler,
            &ProviderEntry {
                never_complete: true,
                ..entry("hang")
            },
        );

        assert!(matches!(
            scheduler.run().await,
            Err(StartupError::Timeout { .. })
        ));
    }
}

//! Startup providers and the handles they use to signal readiness.
//!
//! A provider's `start` is called once its "after" constraints have all
//! started. It either finishes synchronously (returns `Ok` without asking for
//! a token), fails synchronously (returns `Err`), or calls
//! [`StartupContext::defer`] and later signals through the returned
//! [`CompletionToken`], possibly from another thread.

use async_trait::async_trait;
use stagehand_core::BootId;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::scheduler::StartupError;

/// A resource that must finish initializing before the system is ready.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Begin starting. Must return promptly; long work belongs behind a
    /// deferred completion token.
    fn start(&self, ctx: StartupContext) -> anyhow::Result<()>;

    /// Stop the provider. Called at most once per boot, but must tolerate
    /// being called on a provider that never started.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// The runtime's interface for invoking work units.
pub trait WorkInvoker: Send + Sync {
    /// Invoke `unit` on behalf of `provider`.
    fn invoke(&self, provider: &str, unit: &str) -> anyhow::Result<()>;
}

/// Invoker that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInvoker;

impl WorkInvoker for LoggingInvoker {
    fn invoke(&self, provider: &str, unit: &str) -> anyhow::Result<()> {
        info!(provider, unit, "Invoking work unit");
        Ok(())
    }
}

/// A provider plus its ordering constraints.
#[derive(Clone)]
pub struct ProviderRegistration {
    /// Unique provider name
    pub name: String,
    /// Providers that must start after this one
    pub before: Vec<String>,
    /// Providers that must start before this one
    pub after: Vec<String>,
    /// The provider itself
    pub provider: Arc<dyn Provider>,
}

impl ProviderRegistration {
    /// Register a provider with no constraints.
    pub fn new(name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            name: name.into(),
            before: Vec::new(),
            after: Vec::new(),
            provider,
        }
    }

    /// This provider must start before `other`.
    pub fn before(mut self, other: impl Into<String>) -> Self {
        self.before.push(other.into());
        self
    }

    /// This provider must start after `other`.
    pub fn after(mut self, other: impl Into<String>) -> Self {
        self.after.push(other.into());
        self
    }
}

impl fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("name", &self.name)
            .field("before", &self.before)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

/// A provider settling, as seen by the scheduler.
#[derive(Debug)]
pub(crate) struct CompletionEvent {
    pub index: usize,
    pub outcome: anyhow::Result<()>,
}

const IDLE: u8 = 0;
const IN_START: u8 = 1;
const DEFERRED: u8 = 2;
const CLOSED: u8 = 3;

/// Per-provider state shared between the scheduler, the context and the
/// token.
///
/// The start phase is a single atomic so that handing out a token and
/// leaving `start` cannot interleave: exactly one of them wins the
/// transition out of `IN_START`.
#[derive(Debug)]
pub(crate) struct Slot {
    pub index: usize,
    pub name: String,
    phase: AtomicU8,
    ready: AtomicBool,
}

impl Slot {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            phase: AtomicU8::new(IDLE),
            ready: AtomicBool::new(false),
        }
    }

    pub fn begin_start(&self) {
        self.phase.store(IN_START, Ordering::SeqCst);
    }

    /// Leave the start phase; returns whether a token was handed out.
    pub fn end_start(&self) -> bool {
        match self
            .phase
            .compare_exchange(IN_START, CLOSED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => false,
            Err(phase) => phase == DEFERRED,
        }
    }

    /// Claim the single token of this start phase.
    fn claim_token(&self) -> Result<(), u8> {
        self.phase
            .compare_exchange(IN_START, DEFERRED, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// What a provider sees while starting.
///
/// Cloneable so a provider can keep it for invoking work once started.
#[derive(Clone)]
pub struct StartupContext {
    slot: Arc<Slot>,
    boot_id: BootId,
    events: mpsc::UnboundedSender<CompletionEvent>,
    invoker: Arc<dyn WorkInvoker>,
}

impl StartupContext {
    pub(crate) fn new(
        slot: Arc<Slot>,
        boot_id: BootId,
        events: mpsc::UnboundedSender<CompletionEvent>,
        invoker: Arc<dyn WorkInvoker>,
    ) -> Self {
        Self {
            slot,
            boot_id,
            events,
            invoker,
        }
    }

    /// Name of the provider being started.
    pub fn provider_name(&self) -> &str {
        &self.slot.name
    }

    /// The boot sequence this provider belongs to.
    pub fn boot_id(&self) -> BootId {
        self.boot_id
    }

    /// Declare that startup completes asynchronously.
    ///
    /// Only valid once, and only while `start` is running.
    pub fn defer(&self) -> Result<CompletionToken, StartupError> {
        if let Err(phase) = self.slot.claim_token() {
            let message = if phase == DEFERRED {
                "completion token already requested"
            } else {
                "completion token requested outside of start"
            };
            return Err(StartupError::IllegalState {
                provider: self.slot.name.clone(),
                message: message.to_string(),
            });
        }

        debug!(provider = %self.slot.name, "Startup deferred");
        Ok(CompletionToken {
            inner: Arc::new(TokenInner {
                slot: Arc::clone(&self.slot),
                used: AtomicBool::new(false),
                events: self.events.clone(),
            }),
        })
    }

    /// Invoke a work unit through the runtime.
    ///
    /// Fails with [`StartupError::IllegalState`] until this provider has
    /// signalled its own successful completion.
    pub fn invoke(&self, unit: &str) -> Result<(), StartupError> {
        if !self.slot.is_ready() {
            return Err(StartupError::IllegalState {
                provider: self.slot.name.clone(),
                message: format!("cannot invoke '{unit}' before signalling startup completion"),
            });
        }

        self.invoker
            .invoke(&self.slot.name, unit)
            .map_err(|e| StartupError::InvocationFailed {
                provider: self.slot.name.clone(),
                unit: unit.to_string(),
                source: e.into(),
            })
    }
}

impl fmt::Debug for StartupContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupContext")
            .field("provider", &self.slot.name)
            .field("boot_id", &self.boot_id)
            .finish_non_exhaustive()
    }
}

struct TokenInner {
    slot: Arc<Slot>,
    used: AtomicBool,
    events: mpsc::UnboundedSender<CompletionEvent>,
}

/// Single-use handle for signalling asynchronous readiness or failure.
///
/// Clones share the same single use. Safe to signal from any thread.
#[derive(Clone)]
pub struct CompletionToken {
    inner: Arc<TokenInner>,
}

impl CompletionToken {
    /// Signal that the provider has started.
    pub fn complete(&self) -> Result<(), StartupError> {
        self.settle(Ok(()))
    }

    /// Signal that the provider failed to start.
    pub fn fail(&self, cause: anyhow::Error) -> Result<(), StartupError> {
        self.settle(Err(cause))
    }

    fn settle(&self, outcome: anyhow::Result<()>) -> Result<(), StartupError> {
        let slot = &self.inner.slot;
        if self.inner.used.swap(true, Ordering::SeqCst) {
            return Err(StartupError::TokenReused {
                provider: slot.name.clone(),
            });
        }

        if outcome.is_ok() {
            slot.mark_ready();
        }

        let event = CompletionEvent {
            index: slot.index,
            outcome,
        };
        if self.inner.events.send(event).is_err() {
            // The boot already finished or gave up waiting.
            debug!(provider = %slot.name, "Completion arrived after boot ended");
        }
        Ok(())
    }
}

impl fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionToken")
            .field("provider", &self.inner.slot.name)
            .field("used", &self.inner.used.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(name: &str) -> (StartupContext, mpsc::UnboundedReceiver<CompletionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(Slot::new(3, name));
        (
            StartupContext::new(slot, BootId::new(), tx, Arc::new(LoggingInvoker)),
            rx,
        )
    }

    #[test]
    fn test_defer_outside_start_is_illegal() {
        let (ctx, _rx) = context("cache");
        let err = ctx.defer().unwrap_err();
        assert!(matches!(err, StartupError::IllegalState { .. }));
        assert!(err.to_string().contains("outside of start"));
    }

    #[test]
    fn test_defer_twice_is_illegal() {
        let (ctx, _rx) = context("cache");
        ctx.slot.begin_start();
        assert!(ctx.defer().is_ok());
        assert!(matches!(ctx.defer(), Err(StartupError::IllegalState { .. })));
        assert!(ctx.slot.end_start());
    }

    #[test]
    fn test_defer_after_start_returned_is_illegal() {
        let (ctx, _rx) = context("cache");
        let kept = ctx.clone();
        ctx.slot.begin_start();
        assert!(!ctx.slot.end_start());

        let err = kept.defer().unwrap_err();
        assert!(matches!(err, StartupError::IllegalState { ref provider, .. } if provider == "cache"));
        assert!(err.to_string().contains("outside of start"));
        // The scheduler's view is unchanged: still a synchronous start.
        assert!(!ctx.slot.end_start());
    }

    #[test]
    fn test_defer_races_end_of_start_with_one_winner() {
        for _ in 0..200 {
            let (ctx, _rx) = context("racer");
            ctx.slot.begin_start();

            let worker = {
                let ctx = ctx.clone();
                std::thread::spawn(move || ctx.defer().is_ok())
            };
            let deferred = ctx.slot.end_start();
            let token_issued = worker.join().unwrap();

            assert_eq!(deferred, token_issued);
        }
    }

    #[test]
    fn test_token_posts_one_event_and_rejects_reuse() {
        let (ctx, mut rx) = context("cache");
        ctx.slot.begin_start();
        let token = ctx.defer().unwrap();
        let clone = token.clone();

        token.complete().unwrap();
        let err = clone.fail(anyhow::anyhow!("late")).unwrap_err();
        assert!(matches!(err, StartupError::TokenReused { ref provider } if provider == "cache"));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.index, 3);
        assert!(event.outcome.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_failure_does_not_mark_ready() {
        let (ctx, mut rx) = context("db");
        ctx.slot.begin_start();
        let token = ctx.defer().unwrap();

        token.fail(anyhow::anyhow!("connection refused")).unwrap();

        assert!(!ctx.slot.is_ready());
        let event = rx.try_recv().unwrap();
        assert_eq!(event.outcome.unwrap_err().to_string(), "connection refused");
    }

    #[test]
    fn test_invoke_requires_completion() {
        let (ctx, _rx) = context("web");
        ctx.slot.begin_start();
        let token = ctx.defer().unwrap();

        let err = ctx.invoke("index").unwrap_err();
        assert!(err.to_string().contains("before signalling startup completion"));

        token.complete().unwrap();
        assert!(ctx.invoke("index").is_ok());
    }

    #[test]
    fn test_invoker_failure_is_wrapped() {
        struct Refusing;
        impl WorkInvoker for Refusing {
            fn invoke(&self, _provider: &str, _unit: &str) -> anyhow::Result<()> {
                anyhow::bail!("runtime closed")
            }
        }

        let (tx, _rx) = mpsc::unbounded_channel();
        let slot = Arc::new(Slot::new(0, "web"));
        slot.mark_ready();
        let ctx = StartupContext::new(slot, BootId::new(), tx, Arc::new(Refusing));

        let err = ctx.invoke("index").unwrap_err();
        assert!(matches!(err, StartupError::InvocationFailed { ref unit, .. } if unit == "index"));
    }

    #[test]
    fn test_completion_after_boot_is_ignored() {
        let (ctx, rx) = context("late");
        ctx.slot.begin_start();
        let token = ctx.defer().unwrap();
        drop(rx);

        assert!(token.complete().is_ok());
    }

    #[test]
    fn test_registration_builder() {
        struct Idle;
        #[async_trait]
        impl Provider for Idle {
            fn start(&self, _ctx: StartupContext) -> anyhow::Result<()> {
                Ok(())
            }
            async fn stop(&self) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let registration = ProviderRegistration::new("web", Arc::new(Idle))
            .after("db")
            .after("cache")
            .before("router");
        assert_eq!(registration.after, vec!["db", "cache"]);
        assert_eq!(registration.before, vec!["router"]);
        assert!(format!("{registration:?}").contains("web"));
    }
}

//! Dependency-ordered startup of providers.
//!
//! The scheduler turns "before"/"after" constraints into a dependency graph,
//! refuses to start anything if a constraint is unknown or cyclic, and then
//! starts providers in groups:
//!
//! ```text
//! eligible group → dispatch all → wait until every member settled → next group
//! ```
//!
//! Completion events arrive over a channel owned by the scheduler, so the
//! group-advance loop is the single place that mutates provider state. The
//! first failure ends the boot; every provider of every dispatched group is
//! then given a stop attempt.

use chrono::Utc;
use serde::Serialize;
use stagehand_core::{
    AssetKind, BootId, DependencyGraph, GraphError, IssueSink, ProviderState, Time,
    TracingIssueSink,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::config::StartupConfig;
use crate::provider::{
    CompletionEvent, LoggingInvoker, ProviderRegistration, Slot, StartupContext, WorkInvoker,
};

/// Boxed error cause carried by startup failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that end a boot, or that flag misuse of the startup protocol.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// A constraint names a provider that is not registered
    #[error("Provider '{asset}' references unknown provider '{name}'")]
    UnknownProvider {
        /// Provider declaring the constraint
        asset: String,
        /// The unknown name
        name: String,
    },

    /// Two registrations share a name
    #[error("Provider '{name}' is registered more than once")]
    DuplicateProvider {
        /// The duplicated name
        name: String,
    },

    /// The constraints are cyclic
    #[error("Startup cycle in '{boot}' between '{first}' and '{second}'")]
    Cycle {
        /// Boot asset name
        boot: String,
        /// Lexicographically lower provider name
        first: String,
        /// Lexicographically higher provider name
        second: String,
    },

    /// A provider failed, synchronously or through its token
    #[error("Provider '{provider}' failed to start: {source}")]
    ProviderFailed {
        /// The failing provider
        provider: String,
        /// What went wrong
        #[source]
        source: BoxError,
    },

    /// The overall wait bound elapsed
    #[error("Startup did not finish within {bound:?}")]
    Timeout {
        /// The configured bound
        bound: Duration,
    },

    /// A completion token was used twice
    #[error("Illegal use of completion token for provider '{provider}': already used")]
    TokenReused {
        /// Token owner
        provider: String,
    },

    /// A provider used the startup protocol out of order
    #[error("Illegal state for provider '{provider}': {message}")]
    IllegalState {
        /// Offending provider
        provider: String,
        /// What was attempted
        message: String,
    },

    /// The runtime refused a work invocation
    #[error("Provider '{provider}' failed to invoke '{unit}': {source}")]
    InvocationFailed {
        /// Invoking provider
        provider: String,
        /// Unit that was invoked
        unit: String,
        /// What went wrong
        #[source]
        source: BoxError,
    },

    /// The completion channel closed while providers were still pending
    #[error("Completion channel closed during startup of '{boot}'")]
    ChannelClosed {
        /// Boot asset name
        boot: String,
    },

    /// The provider graph could not be built
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Summary of a successful boot.
#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    /// Boot identifier
    pub boot_id: BootId,
    /// Provider names per group, in start order
    pub groups: Vec<Vec<String>>,
    /// When scheduling began
    pub started_at: Time,
    /// When the last provider started
    pub finished_at: Time,
}

impl StartupReport {
    /// Wall-clock time the boot took.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Starts providers according to their ordering constraints.
pub struct StartupScheduler {
    config: StartupConfig,
    registrations: Vec<ProviderRegistration>,
    sink: Arc<dyn IssueSink>,
    invoker: Arc<dyn WorkInvoker>,
}

impl StartupScheduler {
    /// Create a scheduler with no providers.
    pub fn new(config: StartupConfig) -> Self {
        Self {
            config,
            registrations: Vec::new(),
            sink: Arc::new(TracingIssueSink),
            invoker: Arc::new(LoggingInvoker),
        }
    }

    /// Set where configuration issues are reported.
    pub fn with_issue_sink(mut self, sink: Arc<dyn IssueSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set the runtime's work invoker.
    pub fn with_invoker(mut self, invoker: Arc<dyn WorkInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Register a provider.
    pub fn register(&mut self, registration: ProviderRegistration) -> &mut Self {
        self.registrations.push(registration);
        self
    }

    /// Number of registered providers.
    pub fn provider_count(&self) -> usize {
        self.registrations.len()
    }

    /// Build the provider graph, keyed by registration index.
    ///
    /// "A before B" becomes `B → A`; "A after B" becomes `A → B`. Every
    /// unknown name is reported before the first one is returned.
    fn build_graph(&self) -> Result<DependencyGraph<usize>, StartupError> {
        let mut graph = DependencyGraph::new();
        let mut by_name: HashMap<&str, usize> = HashMap::new();

        for (index, registration) in self.registrations.iter().enumerate() {
            if by_name.insert(registration.name.as_str(), index).is_some() {
                self.sink.report_issue(
                    AssetKind::Provider,
                    &registration.name,
                    "provider registered more than once",
                );
                return Err(StartupError::DuplicateProvider {
                    name: registration.name.clone(),
                });
            }
            graph.add_node(index, registration.name.clone())?;
        }

        let mut first_unknown = None;
        for (index, registration) in self.registrations.iter().enumerate() {
            let constraints = registration
                .before
                .iter()
                .map(|name| (name, true))
                .chain(registration.after.iter().map(|name| (name, false)));

            for (name, is_before) in constraints {
                let Some(&other) = by_name.get(name.as_str()) else {
                    let relation = if is_before { "before" } else { "after" };
                    self.sink.report_issue(
                        AssetKind::Provider,
                        &registration.name,
                        &format!("unknown provider '{name}' in '{relation}' constraint"),
                    );
                    first_unknown.get_or_insert_with(|| StartupError::UnknownProvider {
                        asset: registration.name.clone(),
                        name: name.clone(),
                    });
                    continue;
                };

                if is_before {
                    graph.add_dependency(&other, &index)?;
                } else {
                    graph.add_dependency(&index, &other)?;
                }
            }
        }

        if let Some(err) = first_unknown {
            return Err(err);
        }

        let closures = graph.closures();
        if let Some((first, second)) = graph.find_cycle(&closures) {
            self.sink.report_issue(
                AssetKind::Boot,
                &self.config.boot_name,
                &format!("startup cycle between '{first}' and '{second}'"),
            );
            return Err(StartupError::Cycle {
                boot: self.config.boot_name.clone(),
                first,
                second,
            });
        }

        Ok(graph)
    }

    /// Run the boot sequence to completion or first failure.
    pub async fn run(self) -> Result<StartupReport, StartupError> {
        let boot_id = BootId::new();
        let started_at = Utc::now();

        let graph = self.build_graph()?;
        info!(
            %boot_id,
            boot = %self.config.boot_name,
            providers = graph.len(),
            "Starting providers"
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let slots: Vec<Arc<Slot>> = self
            .registrations
            .iter()
            .enumerate()
            .map(|(index, r)| Arc::new(Slot::new(index, r.name.clone())))
            .collect();
        let mut states = vec![ProviderState::Pending; slots.len()];
        let mut dispatched: Vec<usize> = Vec::new();
        let mut groups: Vec<Vec<String>> = Vec::new();
        let deadline = self.config.max_wait.map(|bound| (Instant::now() + bound, bound));

        let outcome = 'boot: loop {
            let group = eligible(&graph, &states);
            if group.is_empty() {
                break Ok(());
            }

            let names: Vec<String> = group
                .iter()
                .map(|&i| self.registrations[i].name.clone())
                .collect();
            debug!(%boot_id, group = groups.len() + 1, providers = ?names, "Dispatching group");
            groups.push(names);
            dispatched.extend(&group);

            let mut awaiting = 0usize;
            for &index in &group {
                states[index] = ProviderState::Starting;
                let ctx = StartupContext::new(
                    Arc::clone(&slots[index]),
                    boot_id,
                    tx.clone(),
                    Arc::clone(&self.invoker),
                );

                if let Err(cause) = self.dispatch(&slots[index], ctx, &tx) {
                    states[index] = ProviderState::Failed;
                    break 'boot Err(self.failed(index, cause));
                }
                states[index] = ProviderState::AwaitingCompletion;
                awaiting += 1;
            }

            while awaiting > 0 {
                let event = match next_event(&mut rx, deadline, &self.config.boot_name).await {
                    Ok(event) => event,
                    Err(err) => break 'boot Err(err),
                };

                let index = event.index;
                if states.get(index) != Some(&ProviderState::AwaitingCompletion) {
                    warn!(%boot_id, index, "Ignoring completion for provider not awaiting one");
                    continue;
                }

                match event.outcome {
                    Ok(()) => {
                        states[index] = ProviderState::Started;
                        awaiting -= 1;
                        debug!(%boot_id, provider = %self.registrations[index].name, "Provider started");
                    }
                    Err(cause) => {
                        states[index] = ProviderState::Failed;
                        break 'boot Err(self.failed(index, cause));
                    }
                }
            }
        };

        // Completions arriving from now on have no effect.
        drop(rx);

        match outcome {
            Ok(()) => {
                let report = StartupReport {
                    boot_id,
                    groups,
                    started_at,
                    finished_at: Utc::now(),
                };
                info!(
                    %boot_id,
                    groups = report.groups.len(),
                    elapsed_ms = report.elapsed().num_milliseconds(),
                    "All providers started"
                );
                Ok(report)
            }
            Err(err) => {
                error!(%boot_id, error = %err, "Startup failed; stopping providers");
                self.stop_all(&dispatched).await;
                Err(err)
            }
        }
    }

    /// Call `start` on one provider. Returns the synchronous failure, if any.
    fn dispatch(
        &self,
        slot: &Slot,
        ctx: StartupContext,
        tx: &mpsc::UnboundedSender<CompletionEvent>,
    ) -> anyhow::Result<()> {
        let registration = &self.registrations[slot.index];
        debug!(provider = %registration.name, "Starting provider");

        slot.begin_start();
        let result = registration.provider.start(ctx);
        let deferred = slot.end_start();
        result?;

        if !deferred {
            slot.mark_ready();
            // The receiver lives as long as this boot, so the send only
            // fails once nobody is listening any more.
            let _ = tx.send(CompletionEvent {
                index: slot.index,
                outcome: Ok(()),
            });
        }
        Ok(())
    }

    fn failed(&self, index: usize, cause: anyhow::Error) -> StartupError {
        StartupError::ProviderFailed {
            provider: self.registrations[index].name.clone(),
            source: cause.into(),
        }
    }

    /// Give every dispatched provider a stop attempt, newest first. A failing
    /// stop does not prevent the others.
    async fn stop_all(&self, dispatched: &[usize]) {
        for &index in dispatched.iter().rev() {
            let registration = &self.registrations[index];
            match registration.provider.stop().await {
                Ok(()) => debug!(provider = %registration.name, "Provider stopped"),
                Err(e) => warn!(provider = %registration.name, error = %e, "Provider failed to stop"),
            }
        }
    }
}

/// Pending providers whose dependencies have all started, in registration
/// order.
fn eligible(graph: &DependencyGraph<usize>, states: &[ProviderState]) -> Vec<usize> {
    graph
        .keys()
        .copied()
        .filter(|&index| {
            !states[index].was_dispatched()
                && graph
                    .dependencies(&index)
                    .all(|&dep| states[dep] == ProviderState::Started)
        })
        .collect()
}

/// Wait for the next completion, up to the boot deadline.
///
/// `run` keeps a sender alive for the whole group loop, so a closed channel
/// cannot be observed there.
async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<CompletionEvent>,
    deadline: Option<(Instant, Duration)>,
    boot: &str,
) -> Result<CompletionEvent, StartupError> {
    let received = match deadline {
        Some((at, bound)) => timeout_at(at, rx.recv())
            .await
            .map_err(|_| StartupError::Timeout { bound })?,
        None => rx.recv().await,
    };

    received.ok_or_else(|| StartupError::ChannelClosed {
        boot: boot.to_string(),
    })
}

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jdsync_config::DispatchConfig;
use jdsync_jdi::{Event, EventSet, RequestId, SuspendPolicy, ThreadId, VirtualMachine};
use parking_lot::Mutex;

use crate::diagnostics::{DiagnosticSink, TracingDiagnostics};
use crate::listener::EventListener;
use crate::registry::ListenerRegistry;
use crate::watchdog::{run_guarded, run_with_timeout, VoteError};

/// Result of dispatching one event set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// AND of every vote cast; `true` when nobody voted.
    pub resume: bool,
    /// Number of listeners that actually voted.
    pub votes: usize,
}

type DisconnectHook = Box<dyn FnOnce() + Send>;

/// One debug session against one remote VM.
///
/// Cloning is cheap and every clone refers to the same session. Listener
/// registrations, availability and per-thread dispatch ordering are scoped
/// to the session and never shared with another target.
#[derive(Clone)]
pub struct DebugTarget {
    inner: Arc<Inner>,
}

struct Inner {
    vm: Arc<dyn VirtualMachine>,
    registry: ListenerRegistry,
    diagnostics: Arc<dyn DiagnosticSink>,
    listener_timeout: Option<Duration>,
    available: AtomicBool,
    /// One gate per suspended thread; sets without a thread share `None`.
    thread_gates: Mutex<HashMap<Option<ThreadId>, Arc<Mutex<()>>>>,
    disconnect_hooks: Mutex<Vec<DisconnectHook>>,
}

impl DebugTarget {
    pub fn new(
        vm: Arc<dyn VirtualMachine>,
        diagnostics: Arc<dyn DiagnosticSink>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                vm,
                registry: ListenerRegistry::new(),
                diagnostics,
                listener_timeout: config.listener_timeout(),
                available: AtomicBool::new(true),
                thread_gates: Mutex::new(HashMap::new()),
                disconnect_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Target with default dispatch settings that reports absorbed failures
    /// through `tracing`.
    pub fn with_tracing(vm: Arc<dyn VirtualMachine>) -> Self {
        Self::new(vm, Arc::new(TracingDiagnostics), &DispatchConfig::default())
    }

    pub fn name(&self) -> &str {
        self.inner.vm.name()
    }

    pub fn vm(&self) -> &Arc<dyn VirtualMachine> {
        &self.inner.vm
    }

    pub fn diagnostics(&self) -> &dyn DiagnosticSink {
        self.inner.diagnostics.as_ref()
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    /// Whether remote calls against this session can still succeed.
    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::Acquire) && self.inner.vm.is_connected()
    }

    /// Whether `self` and `other` are the same session.
    pub fn same_target(&self, other: &DebugTarget) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Idempotent; returns `false` if the pair was already registered.
    pub fn register_listener(&self, request: RequestId, listener: Arc<dyn EventListener>) -> bool {
        self.inner.registry.register(request, listener)
    }

    /// Deregistering an unknown pair is a no-op that returns `false`.
    pub fn deregister_listener(&self, request: RequestId, listener: &Arc<dyn EventListener>) -> bool {
        self.inner.registry.deregister(request, listener)
    }

    /// Runs `hook` once when the session disconnects, or right away if it
    /// already has.
    pub fn on_disconnect(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.inner.disconnect_hooks.lock();
        if self.inner.available.load(Ordering::Acquire) {
            hooks.push(Box::new(hook));
            return;
        }
        drop(hooks);
        hook();
    }

    /// Marks the session unavailable, drops every listener registration and
    /// runs the disconnect hooks.
    pub fn disconnect(&self) {
        let first = self.inner.available.swap(false, Ordering::AcqRel);
        self.inner.registry.close();
        if !first {
            return;
        }
        tracing::info!(target: "jdsync.dispatch", vm = self.name(), "debug target disconnected");
        let hooks = std::mem::take(&mut *self.inner.disconnect_hooks.lock());
        for hook in hooks {
            hook();
        }
    }

    /// Routes every event of `set` to its registered listeners, collects their
    /// votes and resumes according to the set's suspend policy when the vote
    /// is unanimous.
    ///
    /// Sets for the same thread are processed one at a time; sets for
    /// different threads may be dispatched concurrently.
    pub fn dispatch(&self, set: &EventSet) -> DispatchOutcome {
        let thread = set.thread();
        let gate = self.acquire_gate(thread);
        let outcome = {
            let _serialized = gate.lock();
            let outcome = self.collect_votes(set);
            if outcome.resume {
                self.resume(set);
            }
            outcome
        };
        self.release_gate(thread, gate);
        outcome
    }

    fn collect_votes(&self, set: &EventSet) -> DispatchOutcome {
        let mut resume = true;
        let mut votes = 0;

        for event in &set.events {
            if event.is_vm_termination() {
                self.disconnect();
                continue;
            }
            if !self.is_available() {
                tracing::debug!(target: "jdsync.dispatch", ?event, "target unavailable; event ignored");
                self.disconnect();
                continue;
            }
            let Some(request) = event.request_id() else {
                continue;
            };

            // Looked up per event so a listener removed by an earlier event of
            // this set is not called again.
            for listener in self.inner.registry.listeners_for(request) {
                if !self.inner.registry.is_registered(request, &listener) {
                    continue;
                }
                match self.poll(listener, event) {
                    Ok(vote) => {
                        votes += 1;
                        resume &= vote;
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "jdsync.dispatch",
                            request,
                            error = %err,
                            "listener cast no vote"
                        );
                        self.inner.diagnostics.log(&err);
                    }
                }
            }
        }

        tracing::trace!(target: "jdsync.dispatch", resume, votes, "event set decided");
        DispatchOutcome { resume, votes }
    }

    fn poll(&self, listener: Arc<dyn EventListener>, event: &Event) -> Result<bool, VoteError> {
        match self.inner.listener_timeout {
            None => run_guarded(|| listener.handle_event(event, self)),
            Some(timeout) => {
                let target = self.clone();
                let event = event.clone();
                run_with_timeout(timeout, move || listener.handle_event(&event, &target))
            }
        }
    }

    fn resume(&self, set: &EventSet) {
        if !self.is_available() {
            return;
        }
        let vm = &self.inner.vm;
        let result = match (set.suspend_policy, set.thread()) {
            (SuspendPolicy::None, _) => return,
            (SuspendPolicy::EventThread, Some(thread)) => vm.resume_thread(thread),
            (SuspendPolicy::EventThread, None) | (SuspendPolicy::All, _) => vm.resume(),
        };
        if let Err(err) = result {
            if self.is_available() {
                self.inner.diagnostics.log(&err);
            } else {
                tracing::debug!(target: "jdsync.dispatch", error = %err, "resume raced a disconnect");
            }
        }
    }

    fn acquire_gate(&self, thread: Option<ThreadId>) -> Arc<Mutex<()>> {
        self.inner
            .thread_gates
            .lock()
            .entry(thread)
            .or_default()
            .clone()
    }

    fn release_gate(&self, thread: Option<ThreadId>, gate: Arc<Mutex<()>>) {
        let mut gates = self.inner.thread_gates.lock();
        // Only the map and `gate` hold it: no other dispatch is queued.
        if Arc::strong_count(&gate) == 2 {
            gates.remove(&thread);
        }
    }
}

impl fmt::Debug for DebugTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugTarget")
            .field("vm", &self.name())
            .field("available", &self.is_available())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

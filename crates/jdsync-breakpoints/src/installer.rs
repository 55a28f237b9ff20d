//! Per-session breakpoint lifecycle.
//!
//! A [`BreakpointInstaller`] owns every request it created on one
//! [`DebugTarget`]. Breakpoints whose type is not loaded yet are bound when
//! the session reports the class as prepared; redefined classes get their
//! requests replaced at the same location. When the session ends every
//! request and class watch is forgotten; the breakpoints stay tracked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use jdsync_jdi::{BreakpointRequest, ClassInfo, Event, ReferenceTypeId, RequestId, SuspendPolicy};
use parking_lot::Mutex;

use crate::attributes::MarkerId;
use crate::binder::RequestBinder;
use crate::breakpoint::Breakpoint;
use crate::error::BindError;
use crate::listener::EventListener;
use crate::target::DebugTarget;

pub struct BreakpointInstaller {
    target: DebugTarget,
    this: Weak<BreakpointInstaller>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    breakpoints: HashMap<MarkerId, Installed>,
    /// One class-prepare request per pending type name.
    class_watches: HashMap<String, ClassWatch>,
}

struct Installed {
    breakpoint: Arc<Breakpoint>,
    listener: Arc<BreakpointListener>,
    requests: Vec<BreakpointRequest>,
}

impl Installed {
    fn listener(&self) -> Arc<dyn EventListener> {
        self.listener.clone()
    }

    fn wants(&self, type_name: &str) -> bool {
        self.breakpoint.is_enabled() && self.breakpoint.type_name() == type_name
    }
}

struct ClassWatch {
    request: RequestId,
    listener: Arc<dyn EventListener>,
}

impl BreakpointInstaller {
    pub fn new(target: DebugTarget) -> Arc<Self> {
        let installer = Arc::new_cyclic(|this| Self {
            target,
            this: this.clone(),
            state: Mutex::new(State::default()),
        });
        let this = Arc::downgrade(&installer);
        installer.target.on_disconnect(move || {
            if let Some(installer) = this.upgrade() {
                installer.session_ended();
            }
        });
        installer
    }

    pub fn target(&self) -> &DebugTarget {
        &self.target
    }

    /// Starts tracking `breakpoint` and, if it is enabled, binds it against
    /// every loaded class of its type. Returns `false` if the marker is
    /// already tracked.
    pub fn add_breakpoint(&self, breakpoint: Arc<Breakpoint>) -> bool {
        let marker = breakpoint.marker();
        let mut state = self.state.lock();
        if state.breakpoints.contains_key(&marker) {
            return false;
        }
        state.breakpoints.insert(
            marker,
            Installed {
                listener: Arc::new(BreakpointListener::new(breakpoint.clone())),
                breakpoint,
                requests: Vec::new(),
            },
        );
        self.install(&mut state, marker);
        true
    }

    /// Stops tracking the breakpoint and destroys its requests.
    pub fn remove_breakpoint(&self, marker: MarkerId) -> Option<Arc<Breakpoint>> {
        let mut state = self.state.lock();
        let mut installed = state.breakpoints.remove(&marker)?;
        self.uninstall(&mut installed);
        self.release_watch(&mut state, &installed.breakpoint.type_name());
        Some(installed.breakpoint)
    }

    /// Re-creates the requests of a breakpoint after its attributes changed:
    /// existing requests are destroyed and, if the breakpoint is still
    /// enabled, fresh ones carry the new attributes.
    pub fn breakpoint_changed(&self, marker: MarkerId) {
        let mut state = self.state.lock();
        let Some(installed) = state.breakpoints.get_mut(&marker) else {
            return;
        };
        self.uninstall(installed);
        let type_name = installed.breakpoint.type_name();
        if installed.breakpoint.is_enabled() {
            self.install(&mut state, marker);
        } else {
            self.release_watch(&mut state, &type_name);
        }
    }

    /// Binds every enabled breakpoint waiting for `class`.
    pub fn class_prepared(&self, class: &ClassInfo) {
        let mut state = self.state.lock();
        let binder = RequestBinder::new(&self.target);
        for installed in state.breakpoints.values_mut() {
            if installed.wants(&class.name) {
                self.bind_into(&binder, installed, class);
            }
        }
    }

    /// Replaces every request on a redefined class with one at the same
    /// location. The old request is destroyed whether or not the replacement
    /// could be created.
    pub fn class_redefined(&self, type_id: ReferenceTypeId) {
        let mut state = self.state.lock();
        let binder = RequestBinder::new(&self.target);
        for installed in state.breakpoints.values_mut() {
            let (stale, mut current): (Vec<_>, Vec<_>) = installed
                .requests
                .drain(..)
                .partition(|request| request.location().class_id == type_id);
            let spec = installed.breakpoint.spec();
            let listener = installed.listener();

            for old in stale {
                match binder.rebind(&spec, &old) {
                    Ok(request) => {
                        if self.adopt(request.id(), &listener) {
                            current.push(request);
                        }
                    }
                    Err(err) => log_unbound(installed.breakpoint.marker(), &err),
                }
                self.target.deregister_listener(old.id(), &listener);
                self.delete_remote(old.id());
            }
            installed.requests = current;
        }
    }

    /// Destroys every request this installer created and marks the target
    /// disconnected. Remote deletes are skipped when the session is already
    /// gone.
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            for installed in state.breakpoints.values_mut() {
                self.uninstall(installed);
            }
            for (_, watch) in state.class_watches.drain() {
                self.target.deregister_listener(watch.request, &watch.listener);
                self.delete_remote(watch.request);
            }
            state.breakpoints.clear();
        }
        self.target.disconnect();
    }

    /// The session is gone: its requests died with it, so only local
    /// bookkeeping is dropped.
    fn session_ended(&self) {
        let mut state = self.state.lock();
        let mut dropped = 0;
        for installed in state.breakpoints.values_mut() {
            dropped += installed.requests.len();
            installed.requests.clear();
        }
        state.class_watches.clear();
        tracing::debug!(
            target: "jdsync.installer",
            vm = self.target.name(),
            dropped,
            "session ended; requests forgotten"
        );
    }

    pub fn requests(&self, marker: MarkerId) -> Vec<BreakpointRequest> {
        self.state
            .lock()
            .breakpoints
            .get(&marker)
            .map(|installed| installed.requests.clone())
            .unwrap_or_default()
    }

    /// Whether the breakpoint currently has at least one live request.
    pub fn is_installed(&self, marker: MarkerId) -> bool {
        self.state
            .lock()
            .breakpoints
            .get(&marker)
            .is_some_and(|installed| !installed.requests.is_empty())
    }

    /// Times the breakpoint fired in this session.
    pub fn hits(&self, marker: MarkerId) -> u64 {
        self.state
            .lock()
            .breakpoints
            .get(&marker)
            .map_or(0, |installed| installed.listener.hits())
    }

    pub fn breakpoints(&self) -> Vec<Arc<Breakpoint>> {
        self.state
            .lock()
            .breakpoints
            .values()
            .map(|installed| installed.breakpoint.clone())
            .collect()
    }

    fn install(&self, state: &mut State, marker: MarkerId) {
        let Some(type_name) = state
            .breakpoints
            .get(&marker)
            .filter(|installed| installed.breakpoint.is_enabled())
            .map(|installed| installed.breakpoint.type_name())
        else {
            return;
        };

        // Watch before looking up loaded classes so a load in between is
        // still reported.
        self.watch(state, &type_name);

        let binder = RequestBinder::new(&self.target);
        let classes = match binder.loaded_classes(&type_name) {
            Ok(classes) => classes,
            Err(err) => {
                log_unbound(marker, &err);
                return;
            }
        };
        if let Some(installed) = state.breakpoints.get_mut(&marker) {
            for class in &classes {
                self.bind_into(&binder, installed, class);
            }
        }
    }

    fn bind_into(&self, binder: &RequestBinder<'_>, installed: &mut Installed, class: &ClassInfo) {
        if installed
            .requests
            .iter()
            .any(|request| request.location().class_id == class.type_id)
        {
            return;
        }
        match binder.bind(&installed.breakpoint.spec(), class) {
            Ok(request) => {
                if self.adopt(request.id(), &installed.listener()) {
                    installed.requests.push(request);
                }
            }
            Err(err) => log_unbound(installed.breakpoint.marker(), &err),
        }
    }

    /// Registers `listener` for a freshly created request. If the session went
    /// away in the meantime the request is dropped instead, so nothing stays
    /// half registered.
    ///
    /// A disconnect closes the registry, so a registration that lands after
    /// it is refused; one that lands before is cleared by it.
    fn adopt(&self, request: RequestId, listener: &Arc<dyn EventListener>) -> bool {
        if self.target.register_listener(request, listener.clone()) && self.target.is_available() {
            return true;
        }
        self.target.deregister_listener(request, listener);
        self.delete_remote(request);
        false
    }

    fn uninstall(&self, installed: &mut Installed) {
        let listener = installed.listener();
        for request in installed.requests.drain(..) {
            self.target.deregister_listener(request.id(), &listener);
            self.delete_remote(request.id());
        }
    }

    fn watch(&self, state: &mut State, type_name: &str) {
        if state.class_watches.contains_key(type_name) {
            return;
        }
        match RequestBinder::new(&self.target).watch_class(type_name) {
            Ok(request) => {
                let listener: Arc<dyn EventListener> = Arc::new(ClassPrepareListener {
                    installer: self.this.clone(),
                });
                if !self.adopt(request, &listener) {
                    return;
                }
                state
                    .class_watches
                    .insert(type_name.to_owned(), ClassWatch { request, listener });
            }
            Err(err) => {
                tracing::debug!(
                    target: "jdsync.installer",
                    type_name,
                    error = %err,
                    "class-prepare request not installed"
                );
            }
        }
    }

    /// Drops the class-prepare request of `type_name` once no enabled
    /// breakpoint needs it.
    fn release_watch(&self, state: &mut State, type_name: &str) {
        if state.breakpoints.values().any(|installed| installed.wants(type_name)) {
            return;
        }
        if let Some(watch) = state.class_watches.remove(type_name) {
            self.target.deregister_listener(watch.request, &watch.listener);
            self.delete_remote(watch.request);
        }
    }

    fn delete_remote(&self, request: RequestId) {
        if !self.target.is_available() {
            return;
        }
        if let Err(err) = self
            .target
            .vm()
            .event_request_manager()
            .delete_event_request(request)
        {
            if self.target.is_available() {
                self.target.diagnostics().log(&err);
            }
        }
    }
}

impl std::fmt::Debug for BreakpointInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BreakpointInstaller")
            .field("target", &self.target.name())
            .field("breakpoints", &state.breakpoints.len())
            .field("class_watches", &state.class_watches.len())
            .finish()
    }
}

fn log_unbound(marker: MarkerId, err: &BindError) {
    tracing::debug!(target: "jdsync.installer", %marker, error = %err, "breakpoint not bound");
}

/// Counts hits and keeps the thread suspended unless the breakpoint asks
/// for no suspension.
struct BreakpointListener {
    breakpoint: Arc<Breakpoint>,
    hits: AtomicU64,
}

impl BreakpointListener {
    fn new(breakpoint: Arc<Breakpoint>) -> Self {
        Self {
            breakpoint,
            hits: AtomicU64::new(0),
        }
    }

    fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

impl EventListener for BreakpointListener {
    fn handle_event(&self, event: &Event, target: &DebugTarget) -> bool {
        let Event::Breakpoint {
            thread, location, ..
        } = event
        else {
            return true;
        };
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            target: "jdsync.installer",
            vm = target.name(),
            marker = %self.breakpoint.marker(),
            thread,
            line = location.line,
            hits,
            "breakpoint hit"
        );
        self.breakpoint.spec().suspend_policy == SuspendPolicy::None
    }
}

/// Binds pending breakpoints when their class loads, then lets the loading
/// thread continue.
struct ClassPrepareListener {
    installer: Weak<BreakpointInstaller>,
}

impl EventListener for ClassPrepareListener {
    fn handle_event(&self, event: &Event, _target: &DebugTarget) -> bool {
        if let (Event::ClassPrepare { class, .. }, Some(installer)) =
            (event, self.installer.upgrade())
        {
            installer.class_prepared(class);
        }
        true
    }
}

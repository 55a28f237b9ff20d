use std::sync::Arc;

use jdsync_jdi::{
    BreakpointRequest, ClassInfo, JdiError, Location, RequestId, SuspendPolicy, VirtualMachine,
};

use crate::breakpoint::{BreakpointKind, BreakpointSpec};
use crate::error::{BindError, UnbindableReason};
use crate::target::DebugTarget;

/// Turns breakpoint descriptions into configured breakpoint requests on one
/// debug target.
///
/// Every failure is absorbed into a [`BindError`]. Remote failures that are
/// not explained by the session going away are reported to the target's
/// diagnostic sink before being returned.
#[derive(Debug, Clone, Copy)]
pub struct RequestBinder<'a> {
    target: &'a DebugTarget,
}

impl<'a> RequestBinder<'a> {
    pub fn new(target: &'a DebugTarget) -> Self {
        Self { target }
    }

    /// Resolves `spec` against `class` and installs a configured request at
    /// the resolved location.
    pub fn bind(
        &self,
        spec: &BreakpointSpec,
        class: &ClassInfo,
    ) -> Result<BreakpointRequest, BindError> {
        if !class.is_class() {
            return Err(BindError::Unbindable(UnbindableReason::NotAClass));
        }

        let location = match self.resolve(spec, class)? {
            Some(location) if location.has_code() => location,
            _ => return Err(BindError::Unbindable(UnbindableReason::NoExecutableCode)),
        };
        self.create_request(self.target.vm(), location, spec)
    }

    /// Installs a replacement for `existing` at the same location, e.g. after
    /// its class was redefined. `existing` is left untouched; deleting it is
    /// up to the caller.
    pub fn rebind(
        &self,
        spec: &BreakpointSpec,
        existing: &BreakpointRequest,
    ) -> Result<BreakpointRequest, BindError> {
        self.create_request(existing.virtual_machine(), existing.location(), spec)
    }

    /// Classes with this name currently loaded in the session, one per class
    /// loader.
    pub fn loaded_classes(&self, type_name: &str) -> Result<Vec<ClassInfo>, BindError> {
        let vm = self.target.vm();
        self.remote("classes_by_name", || vm.classes_by_name(type_name))
    }

    /// Asks the session to report every future load of `type_name`.
    pub fn watch_class(&self, type_name: &str) -> Result<RequestId, BindError> {
        let manager = self.target.vm().event_request_manager();
        self.remote("create_class_prepare_request", || {
            manager.create_class_prepare_request(type_name, SuspendPolicy::EventThread)
        })
    }

    fn resolve(
        &self,
        spec: &BreakpointSpec,
        class: &ClassInfo,
    ) -> Result<Option<Location>, BindError> {
        let vm = self.target.vm();
        match &spec.kind {
            BreakpointKind::MethodEntry { method: None } => {
                Err(BindError::Unbindable(UnbindableReason::Unconfigured))
            }
            BreakpointKind::MethodEntry {
                method: Some(method),
            } => {
                let resolved = self
                    .remote("concrete_method_by_name", || {
                        vm.concrete_method_by_name(class.type_id, &method.name, &method.signature)
                    })?
                    .ok_or(BindError::Unbindable(UnbindableReason::NoSuchMethod))?;
                self.remote("method_location", || {
                    vm.method_location(class.type_id, resolved.method_id)
                })
            }
            BreakpointKind::Line => {
                let line = spec
                    .line_number
                    .ok_or(BindError::Unbindable(UnbindableReason::NoLineNumber))?;
                let locations =
                    self.remote("line_locations", || vm.line_locations(class.type_id, line))?;
                Ok(locations.into_iter().find(Location::has_code))
            }
        }
    }

    /// Creates the request and applies the breakpoint's attributes. A request
    /// that could not be configured is deleted again.
    fn create_request(
        &self,
        vm: &Arc<dyn VirtualMachine>,
        location: Location,
        spec: &BreakpointSpec,
    ) -> Result<BreakpointRequest, BindError> {
        let manager = vm.event_request_manager();
        let config = spec.request_config();

        let id = self.remote("create_breakpoint_request", || {
            manager.create_breakpoint_request(location)
        })?;
        if let Err(err) = self.remote("configure_request", || {
            manager.configure_request(id, &config)
        }) {
            if self.target.is_available() {
                if let Err(delete_err) = manager.delete_event_request(id) {
                    tracing::debug!(
                        target: "jdsync.binder",
                        request = id,
                        error = %delete_err,
                        "failed to delete unconfigured request"
                    );
                }
            }
            return Err(err);
        }

        tracing::debug!(
            target: "jdsync.binder",
            vm = vm.name(),
            request = id,
            ?location,
            kind = spec.kind.as_str(),
            "breakpoint request installed"
        );
        Ok(BreakpointRequest::new(id, location, vm.clone()))
    }

    fn remote<T>(
        &self,
        op: &'static str,
        call: impl FnOnce() -> Result<T, JdiError>,
    ) -> Result<T, BindError> {
        if !self.target.is_available() {
            return Err(BindError::SessionUnavailable);
        }
        call().map_err(|err| self.absorb(op, err))
    }

    fn absorb(&self, op: &'static str, err: JdiError) -> BindError {
        if !self.target.is_available() {
            tracing::debug!(
                target: "jdsync.binder",
                op,
                error = %err,
                "session became unavailable during remote call"
            );
            return BindError::SessionUnavailable;
        }

        let err = BindError::RemoteOperation(err);
        tracing::warn!(target: "jdsync.binder", op, error = ?err, "remote operation failed");
        self.target.diagnostics().log(&err);
        err
    }
}

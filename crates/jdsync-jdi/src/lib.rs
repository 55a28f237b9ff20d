//! Remote virtual machine capability consumed by the jdsync breakpoint layer.
//!
//! The breakpoint core never speaks a wire protocol itself. It talks to the
//! debuggee through the narrow [`VirtualMachine`] / [`EventRequestManager`]
//! traits defined here, and receives [`EventSet`]s that some transport decoded
//! on its behalf. Keeping the surface this small lets the core be exercised
//! against [`mock::MockVm`] without a JVM.

#[cfg(any(test, feature = "test-support"))]
mod sync;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ThreadId = u64;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type RequestId = i32;

/// Code index reported for locations that have nothing to stop at (native or
/// abstract methods, synthetic lines).
pub const NO_CODE_INDEX: i64 = -1;

pub const ACC_NATIVE: u32 = 0x0100;
pub const ACC_ABSTRACT: u32 = 0x0400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Class,
    Interface,
    Array,
}

/// A reference type currently loaded in the debuggee.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassInfo {
    pub tag: TypeTag,
    pub type_id: ReferenceTypeId,
    /// Fully qualified binary name, e.g. `com.example.Foo`.
    pub name: String,
}

impl ClassInfo {
    /// Whether this type can declare concrete methods. Interfaces and arrays
    /// are not class-like for breakpoint binding.
    pub fn is_class(&self) -> bool {
        self.tag == TypeTag::Class
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
}

impl MethodInfo {
    pub fn is_abstract(&self) -> bool {
        self.mod_bits & ACC_ABSTRACT != 0
    }

    /// Non-abstract. Native methods are concrete but have no code index.
    pub fn is_concrete(&self) -> bool {
        !self.is_abstract()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub code_index: i64,
    /// Source line, or `-1` when unknown.
    pub line: i32,
}

impl Location {
    pub fn has_code(&self) -> bool {
        self.code_index >= 0
    }
}

/// Which threads the debuggee suspends when a request fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendPolicy {
    None,
    #[default]
    EventThread,
    All,
}

impl SuspendPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SuspendPolicy::None => "none",
            SuspendPolicy::EventThread => "event_thread",
            SuspendPolicy::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(SuspendPolicy::None),
            "event_thread" => Some(SuspendPolicy::EventThread),
            "all" => Some(SuspendPolicy::All),
            _ => None,
        }
    }
}

/// Behavior attributes applied to a freshly created request before it is
/// usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestConfig {
    /// Fire only on the n-th hit.
    pub hit_count: Option<u32>,
    pub suspend_policy: SuspendPolicy,
    pub enabled: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            hit_count: None,
            suspend_policy: SuspendPolicy::default(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Breakpoint {
        request_id: RequestId,
        thread: ThreadId,
        location: Location,
    },
    ClassPrepare {
        request_id: RequestId,
        thread: ThreadId,
        class: ClassInfo,
    },
    VmStart {
        thread: ThreadId,
    },
    VmDeath,
    VmDisconnect,
}

impl Event {
    /// The request that produced this event. Automatically generated events
    /// (VM start/death/disconnect) have none.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Event::Breakpoint { request_id, .. } | Event::ClassPrepare { request_id, .. } => {
                Some(*request_id)
            }
            Event::VmStart { .. } | Event::VmDeath | Event::VmDisconnect => None,
        }
    }

    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            Event::Breakpoint { thread, .. }
            | Event::ClassPrepare { thread, .. }
            | Event::VmStart { thread } => Some(*thread),
            Event::VmDeath | Event::VmDisconnect => None,
        }
    }

    pub fn is_vm_termination(&self) -> bool {
        matches!(self, Event::VmDeath | Event::VmDisconnect)
    }
}

/// A batch of events delivered together, all pertaining to the same
/// suspended thread (or to no thread at all).
#[derive(Debug, Clone, PartialEq)]
pub struct EventSet {
    pub suspend_policy: SuspendPolicy,
    pub events: Vec<Event>,
}

impl EventSet {
    pub fn new(suspend_policy: SuspendPolicy, events: Vec<Event>) -> Self {
        Self {
            suspend_policy,
            events,
        }
    }

    pub fn thread(&self) -> Option<ThreadId> {
        self.events.iter().find_map(Event::thread)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JdiError {
    #[error("virtual machine is disconnected")]
    VmDisconnected,
    #[error("invalid event request {0}")]
    InvalidRequest(RequestId),
    #[error("class {0} is not prepared")]
    ClassNotPrepared(ReferenceTypeId),
    #[error("invalid method {0}")]
    InvalidMethod(MethodId),
    #[error("JDI protocol error: {0}")]
    Protocol(String),
    #[error("{0}")]
    Other(String),
}

/// Creates and destroys event requests on the debuggee.
pub trait EventRequestManager: Send + Sync {
    /// Installs a location-triggered request. The request is not usable until
    /// [`EventRequestManager::configure_request`] has been applied.
    fn create_breakpoint_request(&self, location: Location) -> Result<RequestId, JdiError>;

    fn configure_request(&self, request: RequestId, config: &RequestConfig)
        -> Result<(), JdiError>;

    /// Requests a `ClassPrepare` event whenever a type matching `class_pattern`
    /// loads. A trailing `*` matches any suffix.
    fn create_class_prepare_request(
        &self,
        class_pattern: &str,
        suspend_policy: SuspendPolicy,
    ) -> Result<RequestId, JdiError>;

    /// Deleting an unknown request is a no-op on the debuggee side.
    fn delete_event_request(&self, request: RequestId) -> Result<(), JdiError>;
}

/// Handle to a connected debuggee.
pub trait VirtualMachine: Send + Sync {
    /// Human readable name used in logs.
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    fn event_request_manager(&self) -> &dyn EventRequestManager;

    /// All loaded reference types with the given fully qualified name. More
    /// than one entry means the name was loaded by several class loaders.
    fn classes_by_name(&self, name: &str) -> Result<Vec<ClassInfo>, JdiError>;

    fn methods(&self, class: ReferenceTypeId) -> Result<Vec<MethodInfo>, JdiError>;

    /// Entry location of a method, `None` when the VM reports no location.
    fn method_location(
        &self,
        class: ReferenceTypeId,
        method: MethodId,
    ) -> Result<Option<Location>, JdiError>;

    fn line_locations(&self, class: ReferenceTypeId, line: i32) -> Result<Vec<Location>, JdiError>;

    fn resume_thread(&self, thread: ThreadId) -> Result<(), JdiError>;

    fn resume(&self) -> Result<(), JdiError>;

    /// First non-abstract method with the given name and signature.
    fn concrete_method_by_name(
        &self,
        class: ReferenceTypeId,
        name: &str,
        signature: &str,
    ) -> Result<Option<MethodInfo>, JdiError> {
        Ok(self
            .methods(class)?
            .into_iter()
            .find(|m| m.is_concrete() && m.name == name && m.signature == signature))
    }
}

/// A breakpoint request installed on a specific debuggee.
///
/// The request itself lives in the VM; this is only a reference to it. Two
/// handles are the same request when their ids match on the same VM.
#[derive(Clone)]
pub struct BreakpointRequest {
    id: RequestId,
    location: Location,
    vm: Arc<dyn VirtualMachine>,
}

impl BreakpointRequest {
    pub fn new(id: RequestId, location: Location, vm: Arc<dyn VirtualMachine>) -> Self {
        Self { id, location, vm }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn virtual_machine(&self) -> &Arc<dyn VirtualMachine> {
        &self.vm
    }
}

impl PartialEq for BreakpointRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && std::ptr::addr_eq(Arc::as_ptr(&self.vm), Arc::as_ptr(&other.vm))
    }
}

impl Eq for BreakpointRequest {}

impl fmt::Debug for BreakpointRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakpointRequest")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("vm", &self.vm.name())
            .finish()
    }
}

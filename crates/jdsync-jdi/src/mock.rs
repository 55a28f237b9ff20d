use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::{
    sync::lock, ClassInfo, Event, EventRequestManager, JdiError, Location, MethodId, MethodInfo,
    ReferenceTypeId, RequestConfig, RequestId, SuspendPolicy, ThreadId, TypeTag, VirtualMachine,
    ACC_ABSTRACT, ACC_NATIVE, NO_CODE_INDEX,
};

/// Method definition used to populate a [`MockVm`] class.
#[derive(Clone, Debug)]
pub struct MockMethod {
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
    /// Code index of the entry location; `None` when the VM reports no
    /// location at all.
    pub entry_index: Option<i64>,
    /// `(line, code_index)` pairs.
    pub lines: Vec<(i32, i64)>,
}

impl MockMethod {
    pub fn concrete(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            mod_bits: 0,
            entry_index: Some(0),
            lines: Vec::new(),
        }
    }

    pub fn abstract_method(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            mod_bits: ACC_ABSTRACT,
            entry_index: None,
            ..Self::concrete(name, signature)
        }
    }

    pub fn native(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            mod_bits: ACC_NATIVE,
            entry_index: Some(NO_CODE_INDEX),
            ..Self::concrete(name, signature)
        }
    }

    pub fn with_entry_index(mut self, entry_index: Option<i64>) -> Self {
        self.entry_index = entry_index;
        self
    }

    pub fn with_lines(mut self, lines: impl IntoIterator<Item = (i32, i64)>) -> Self {
        self.lines = lines.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRequestKind {
    Breakpoint { location: Location },
    ClassPrepare { pattern: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEventRequest {
    pub request_id: RequestId,
    pub kind: MockRequestKind,
    /// `None` until `configure_request` has been applied.
    pub config: Option<RequestConfig>,
}

/// VM entry points that can have faults injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    ClassesByName,
    Methods,
    MethodLocation,
    LineLocations,
    CreateBreakpointRequest,
    ConfigureRequest,
    CreateClassPrepareRequest,
    DeleteEventRequest,
    Resume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFault {
    /// Fail the call with the given error.
    Error(JdiError),
    /// Drop the connection while the call is in flight.
    Disconnect,
}

#[derive(Debug)]
struct MockClass {
    info: ClassInfo,
    methods: Vec<(MethodInfo, MockMethod)>,
}

#[derive(Debug)]
struct State {
    connected: bool,
    next_type_id: ReferenceTypeId,
    next_method_id: MethodId,
    next_request_id: RequestId,
    classes: Vec<MockClass>,
    requests: BTreeMap<RequestId, MockEventRequest>,
    faults: HashMap<MockOp, VecDeque<MockFault>>,
    resumed_threads: Vec<ThreadId>,
    vm_resumes: usize,
}

impl State {
    fn enter(&mut self, op: MockOp) -> Result<(), JdiError> {
        if !self.connected {
            return Err(JdiError::VmDisconnected);
        }
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            None => Ok(()),
            Some(MockFault::Error(err)) => Err(err),
            Some(MockFault::Disconnect) => {
                self.connected = false;
                Err(JdiError::VmDisconnected)
            }
        }
    }

    fn class(&self, type_id: ReferenceTypeId) -> Result<&MockClass, JdiError> {
        self.classes
            .iter()
            .find(|c| c.info.type_id == type_id)
            .ok_or(JdiError::ClassNotPrepared(type_id))
    }

    fn alloc_request(&mut self, kind: MockRequestKind) -> RequestId {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.requests.insert(
            request_id,
            MockEventRequest {
                request_id,
                kind,
                config: None,
            },
        );
        request_id
    }
}

/// Deterministic, in-memory debuggee used by tests.
///
/// Classes and methods are defined up front; event requests are recorded so
/// tests can assert on what the breakpoint layer installed, and faults can be
/// queued per entry point to simulate remote failures and disconnects.
#[derive(Debug)]
pub struct MockVm {
    name: String,
    state: Mutex<State>,
}

impl Default for MockVm {
    fn default() -> Self {
        Self::new("mock-vm")
    }
}

impl MockVm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                connected: true,
                next_type_id: 0x100,
                next_method_id: 0x1000,
                next_request_id: 1,
                classes: Vec::new(),
                requests: BTreeMap::new(),
                faults: HashMap::new(),
                resumed_threads: Vec::new(),
                vm_resumes: 0,
            }),
        }
    }

    pub fn define_class(&self, name: impl Into<String>, tag: TypeTag) -> ClassInfo {
        let mut state = lock(&self.state, "MockVm::define_class");
        let info = ClassInfo {
            tag,
            type_id: state.next_type_id,
            name: name.into(),
        };
        state.next_type_id += 1;
        state.classes.push(MockClass {
            info: info.clone(),
            methods: Vec::new(),
        });
        info
    }

    pub fn define_class_with_methods(
        &self,
        name: impl Into<String>,
        tag: TypeTag,
        methods: impl IntoIterator<Item = MockMethod>,
    ) -> ClassInfo {
        let class = self.define_class(name, tag);
        for method in methods {
            self.add_method(class.type_id, method);
        }
        class
    }

    /// Adds a method to an already defined class.
    ///
    /// Panics if the class is unknown; this is a test fixture error.
    pub fn add_method(&self, class: ReferenceTypeId, method: MockMethod) -> MethodId {
        let mut state = lock(&self.state, "MockVm::add_method");
        let method_id = state.next_method_id;
        state.next_method_id += 1;
        let Some(entry) = state.classes.iter_mut().find(|c| c.info.type_id == class) else {
            panic!("mock class {class:#x} is not defined");
        };
        entry.methods.push((
            MethodInfo {
                method_id,
                name: method.name.clone(),
                signature: method.signature.clone(),
                mod_bits: method.mod_bits,
            },
            method,
        ));
        method_id
    }

    pub fn disconnect(&self) {
        lock(&self.state, "MockVm::disconnect").connected = false;
    }

    /// Queues a fault for the next call to `op`.
    pub fn inject(&self, op: MockOp, fault: MockFault) {
        lock(&self.state, "MockVm::inject")
            .faults
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    pub fn requests(&self) -> Vec<MockEventRequest> {
        lock(&self.state, "MockVm::requests")
            .requests
            .values()
            .cloned()
            .collect()
    }

    pub fn request(&self, request_id: RequestId) -> Option<MockEventRequest> {
        lock(&self.state, "MockVm::request")
            .requests
            .get(&request_id)
            .cloned()
    }

    pub fn breakpoint_requests(&self) -> Vec<MockEventRequest> {
        self.requests()
            .into_iter()
            .filter(|r| matches!(r.kind, MockRequestKind::Breakpoint { .. }))
            .collect()
    }

    pub fn resumed_threads(&self) -> Vec<ThreadId> {
        lock(&self.state, "MockVm::resumed_threads")
            .resumed_threads
            .clone()
    }

    pub fn vm_resume_count(&self) -> usize {
        lock(&self.state, "MockVm::vm_resume_count").vm_resumes
    }

    /// Builds the event the VM would emit when `thread` reaches the location
    /// of breakpoint request `request_id`.
    pub fn breakpoint_event(&self, request_id: RequestId, thread: ThreadId) -> Option<Event> {
        let state = lock(&self.state, "MockVm::breakpoint_event");
        match &state.requests.get(&request_id)?.kind {
            MockRequestKind::Breakpoint { location } => Some(Event::Breakpoint {
                request_id,
                thread,
                location: *location,
            }),
            MockRequestKind::ClassPrepare { .. } => None,
        }
    }

    /// Events for every class-prepare request whose pattern matches `class`.
    pub fn class_prepare_events(&self, class: &ClassInfo, thread: ThreadId) -> Vec<Event> {
        let state = lock(&self.state, "MockVm::class_prepare_events");
        state
            .requests
            .values()
            .filter_map(|request| match &request.kind {
                MockRequestKind::ClassPrepare { pattern }
                    if class_pattern_matches(pattern, &class.name) =>
                {
                    Some(Event::ClassPrepare {
                        request_id: request.request_id,
                        thread,
                        class: class.clone(),
                    })
                }
                _ => None,
            })
            .collect()
    }
}

fn class_pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}

impl EventRequestManager for MockVm {
    fn create_breakpoint_request(&self, location: Location) -> Result<RequestId, JdiError> {
        let mut state = lock(&self.state, "MockVm::create_breakpoint_request");
        state.enter(MockOp::CreateBreakpointRequest)?;
        let request_id = state.alloc_request(MockRequestKind::Breakpoint { location });
        tracing::debug!(target: "jdsync.mock", request_id, ?location, "breakpoint request created");
        Ok(request_id)
    }

    fn configure_request(
        &self,
        request: RequestId,
        config: &RequestConfig,
    ) -> Result<(), JdiError> {
        let mut state = lock(&self.state, "MockVm::configure_request");
        state.enter(MockOp::ConfigureRequest)?;
        let entry = state
            .requests
            .get_mut(&request)
            .ok_or(JdiError::InvalidRequest(request))?;
        entry.config = Some(*config);
        Ok(())
    }

    fn create_class_prepare_request(
        &self,
        class_pattern: &str,
        suspend_policy: SuspendPolicy,
    ) -> Result<RequestId, JdiError> {
        let mut state = lock(&self.state, "MockVm::create_class_prepare_request");
        state.enter(MockOp::CreateClassPrepareRequest)?;
        let request_id = state.alloc_request(MockRequestKind::ClassPrepare {
            pattern: class_pattern.to_string(),
        });
        if let Some(entry) = state.requests.get_mut(&request_id) {
            entry.config = Some(RequestConfig {
                suspend_policy,
                ..RequestConfig::default()
            });
        }
        Ok(request_id)
    }

    fn delete_event_request(&self, request: RequestId) -> Result<(), JdiError> {
        let mut state = lock(&self.state, "MockVm::delete_event_request");
        state.enter(MockOp::DeleteEventRequest)?;
        state.requests.remove(&request);
        Ok(())
    }
}

impl VirtualMachine for MockVm {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        lock(&self.state, "MockVm::is_connected").connected
    }

    fn event_request_manager(&self) -> &dyn EventRequestManager {
        self
    }

    fn classes_by_name(&self, name: &str) -> Result<Vec<ClassInfo>, JdiError> {
        let mut state = lock(&self.state, "MockVm::classes_by_name");
        state.enter(MockOp::ClassesByName)?;
        Ok(state
            .classes
            .iter()
            .filter(|c| c.info.name == name)
            .map(|c| c.info.clone())
            .collect())
    }

    fn methods(&self, class: ReferenceTypeId) -> Result<Vec<MethodInfo>, JdiError> {
        let mut state = lock(&self.state, "MockVm::methods");
        state.enter(MockOp::Methods)?;
        Ok(state
            .class(class)?
            .methods
            .iter()
            .map(|(info, _)| info.clone())
            .collect())
    }

    fn method_location(
        &self,
        class: ReferenceTypeId,
        method: MethodId,
    ) -> Result<Option<Location>, JdiError> {
        let mut state = lock(&self.state, "MockVm::method_location");
        state.enter(MockOp::MethodLocation)?;
        let (_, def) = state
            .class(class)?
            .methods
            .iter()
            .find(|(info, _)| info.method_id == method)
            .ok_or(JdiError::InvalidMethod(method))?;
        Ok(def.entry_index.map(|code_index| Location {
            class_id: class,
            method_id: method,
            code_index,
            line: def.lines.first().map(|(line, _)| *line).unwrap_or(-1),
        }))
    }

    fn line_locations(&self, class: ReferenceTypeId, line: i32) -> Result<Vec<Location>, JdiError> {
        let mut state = lock(&self.state, "MockVm::line_locations");
        state.enter(MockOp::LineLocations)?;
        let mut locations = Vec::new();
        for (info, def) in &state.class(class)?.methods {
            for &(entry_line, code_index) in &def.lines {
                if entry_line == line {
                    locations.push(Location {
                        class_id: class,
                        method_id: info.method_id,
                        code_index,
                        line,
                    });
                }
            }
        }
        Ok(locations)
    }

    fn resume_thread(&self, thread: ThreadId) -> Result<(), JdiError> {
        let mut state = lock(&self.state, "MockVm::resume_thread");
        state.enter(MockOp::Resume)?;
        state.resumed_threads.push(thread);
        Ok(())
    }

    fn resume(&self) -> Result<(), JdiError> {
        let mut state = lock(&self.state, "MockVm::resume");
        state.enter(MockOp::Resume)?;
        state.vm_resumes += 1;
        Ok(())
    }
}

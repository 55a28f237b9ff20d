//! Breakpoint synchronization between persisted breakpoint descriptions and
//! live requests on a remote Java VM.
//!
//! The crate has two halves:
//!
//! - binding: [`RequestBinder`] resolves a [`BreakpointSpec`] against a loaded
//!   class and installs a configured [`jdsync_jdi::BreakpointRequest`];
//!   [`BreakpointInstaller`] keeps those requests in sync with breakpoint
//!   changes, class loads and class redefinitions for one session.
//! - dispatch: [`DebugTarget::dispatch`] routes each event of an
//!   [`jdsync_jdi::EventSet`] to the listeners registered for its request and
//!   resumes the suspended thread only if every listener votes to.
//!
//! Nothing here fails hard. Bind failures surface as [`BindError`] values and
//! unexpected remote failures are reported to a [`DiagnosticSink`].

pub mod attributes;
mod binder;
mod breakpoint;
mod diagnostics;
mod error;
mod installer;
mod listener;
mod registry;
mod target;
mod watchdog;

pub use attributes::{AttributeMap, AttributeStore, AttributeValue, InMemoryAttributeStore, MarkerId};
pub use binder::RequestBinder;
pub use breakpoint::{Breakpoint, BreakpointKind, BreakpointSpec, MethodRef, MODEL_IDENTIFIER};
pub use diagnostics::{DiagnosticSink, RecordingDiagnostics, TracingDiagnostics};
pub use error::{AttributeError, BindError, UnbindableReason};
pub use installer::BreakpointInstaller;
pub use listener::EventListener;
pub use registry::ListenerRegistry;
pub use target::{DebugTarget, DispatchOutcome};
pub use watchdog::VoteError;

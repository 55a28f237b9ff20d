use std::sync::Arc;

use jdsync_breakpoints::attributes::keys;
use jdsync_breakpoints::{
    AttributeMap, AttributeStore, Breakpoint, BreakpointInstaller, InMemoryAttributeStore,
    MethodRef,
};
use jdsync_jdi::mock::{MockFault, MockMethod, MockOp, MockRequestKind};
use jdsync_jdi::{EventSet, JdiError, SuspendPolicy, TypeTag, VirtualMachine};

use crate::harness::{Session, FOO};

fn store() -> Arc<InMemoryAttributeStore> {
    Arc::new(InMemoryAttributeStore::new())
}

fn bar_breakpoint(store: &Arc<InMemoryAttributeStore>) -> Arc<Breakpoint> {
    Breakpoint::create_method_entry(
        store.clone(),
        store.create_marker(),
        FOO,
        Some(MethodRef::new("bar", "()V")),
        Some(10),
        None,
        None,
        true,
        AttributeMap::new(),
    )
    .unwrap()
}

fn hit(session: &Session, request_id: i32, thread: u64) -> bool {
    let event = session.vm.breakpoint_event(request_id, thread).unwrap();
    session
        .target
        .dispatch(&EventSet::new(SuspendPolicy::EventThread, vec![event]))
        .resume
}

#[test]
fn breakpoint_on_a_loaded_class_binds_immediately() {
    let session = Session::new();
    let foo = session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());

    assert!(installer.add_breakpoint(bp.clone()));
    assert!(!installer.add_breakpoint(bp.clone()));

    let requests = installer.requests(bp.marker());
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].location().class_id, foo.type_id);
    assert_eq!(session.vm.breakpoint_requests().len(), 1);
    assert!(session.diagnostics.is_empty());
}

#[test]
fn breakpoint_binds_once_its_class_is_prepared() {
    let session = Session::new();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());

    installer.add_breakpoint(bp.clone());
    assert!(!installer.is_installed(bp.marker()));
    let watches: Vec<_> = session
        .vm
        .requests()
        .into_iter()
        .filter(|r| matches!(&r.kind, MockRequestKind::ClassPrepare { pattern } if pattern == FOO))
        .collect();
    assert_eq!(watches.len(), 1);

    let foo = session.define_foo();
    let events = session.vm.class_prepare_events(&foo, 5);
    let outcome = session
        .target
        .dispatch(&EventSet::new(SuspendPolicy::EventThread, events));

    assert!(outcome.resume);
    assert_eq!(session.vm.resumed_threads(), vec![5]);
    assert!(installer.is_installed(bp.marker()));
    let request = &installer.requests(bp.marker())[0];
    assert_eq!(request.location().class_id, foo.type_id);
    assert!(session.vm.request(request.id()).unwrap().config.is_some());
}

#[test]
fn every_class_loader_gets_its_own_request() {
    let session = Session::new();
    session.define_foo();
    session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());

    installer.add_breakpoint(bp.clone());
    assert_eq!(installer.requests(bp.marker()).len(), 2);

    // A late class-prepare for an already bound class changes nothing.
    let foo = session.vm.classes_by_name(FOO).unwrap();
    installer.class_prepared(&foo[0]);
    assert_eq!(installer.requests(bp.marker()).len(), 2);
}

#[test]
fn hits_are_counted_and_suspend_unless_the_policy_is_none() {
    let session = Session::new();
    session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());
    installer.add_breakpoint(bp.clone());
    let request = installer.requests(bp.marker())[0].id();

    assert!(!hit(&session, request, 1));
    assert_eq!(installer.hits(bp.marker()), 1);
    assert!(session.vm.resumed_threads().is_empty());

    bp.set_suspend_policy(SuspendPolicy::None).unwrap();
    installer.breakpoint_changed(bp.marker());
    let request = installer.requests(bp.marker())[0].id();
    assert_eq!(
        session.vm.request(request).unwrap().config.unwrap().suspend_policy,
        SuspendPolicy::None
    );

    assert!(hit(&session, request, 1));
    assert_eq!(installer.hits(bp.marker()), 2);
}

#[test]
fn disabling_destroys_requests_and_enabling_restores_them() {
    let session = Session::new();
    session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());
    installer.add_breakpoint(bp.clone());
    let old = installer.requests(bp.marker())[0].id();

    bp.set_enabled(false).unwrap();
    installer.breakpoint_changed(bp.marker());
    assert!(!installer.is_installed(bp.marker()));
    assert!(session.vm.requests().is_empty());
    assert!(session.target.registry().is_empty());

    bp.set_enabled(true).unwrap();
    installer.breakpoint_changed(bp.marker());
    let requests = installer.requests(bp.marker());
    assert_eq!(requests.len(), 1);
    assert_ne!(requests[0].id(), old);
    assert_eq!(session.vm.breakpoint_requests().len(), 1);
}

#[test]
fn hit_count_changes_reach_the_request() {
    let session = Session::new();
    session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());
    installer.add_breakpoint(bp.clone());

    bp.set_hit_count(Some(5)).unwrap();
    installer.breakpoint_changed(bp.marker());

    let request = installer.requests(bp.marker())[0].id();
    assert_eq!(
        session.vm.request(request).unwrap().config.unwrap().hit_count,
        Some(5)
    );
    assert_eq!(session.vm.breakpoint_requests().len(), 1);
}

#[test]
fn removing_a_breakpoint_destroys_everything_it_installed() {
    let session = Session::new();
    session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());
    installer.add_breakpoint(bp.clone());

    let removed = installer.remove_breakpoint(bp.marker()).unwrap();
    assert_eq!(removed.marker(), bp.marker());
    assert!(installer.remove_breakpoint(bp.marker()).is_none());
    assert!(session.vm.requests().is_empty());
    assert!(session.target.registry().is_empty());
    assert!(installer.breakpoints().is_empty());
}

#[test]
fn class_redefinition_replaces_requests_at_the_same_location() {
    let session = Session::new();
    let foo = session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());
    installer.add_breakpoint(bp.clone());
    let old = installer.requests(bp.marker())[0].clone();

    installer.class_redefined(foo.type_id);

    let new = installer.requests(bp.marker())[0].clone();
    assert_ne!(new.id(), old.id());
    assert_eq!(new.location(), old.location());
    assert!(session.vm.request(old.id()).is_none());

    // The old request no longer routes to the breakpoint.
    assert!(!hit(&session, new.id(), 2));
    let stale = jdsync_jdi::Event::Breakpoint {
        request_id: old.id(),
        thread: 2,
        location: old.location(),
    };
    let outcome = session
        .target
        .dispatch(&EventSet::new(SuspendPolicy::EventThread, vec![stale]));
    assert_eq!(outcome.votes, 0);
    assert_eq!(installer.hits(bp.marker()), 1);
}

#[test]
fn failed_rebind_still_destroys_the_old_request() {
    let session = Session::new();
    let foo = session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());
    installer.add_breakpoint(bp.clone());
    let old = installer.requests(bp.marker())[0].id();
    session.vm.inject(
        MockOp::CreateBreakpointRequest,
        MockFault::Error(JdiError::Other("redefinition in progress".to_string())),
    );

    installer.class_redefined(foo.type_id);

    assert!(!installer.is_installed(bp.marker()));
    assert!(session.vm.request(old).is_none());
    assert_eq!(session.diagnostics.entries().len(), 1);
}

#[test]
fn disconnect_mid_bind_leaves_nothing_registered() {
    let session = Session::new();
    session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());
    session
        .vm
        .inject(MockOp::ConfigureRequest, MockFault::Disconnect);

    installer.add_breakpoint(bp.clone());

    assert!(!installer.is_installed(bp.marker()));
    let created = session.vm.breakpoint_requests();
    assert_eq!(created.len(), 1);
    assert!(session
        .target
        .registry()
        .listeners_for(created[0].request_id)
        .is_empty());
    assert!(session.diagnostics.is_empty());
}

#[test]
fn disconnect_destroys_requests_while_the_vm_is_reachable() {
    let session = Session::new();
    session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());
    installer.add_breakpoint(bp.clone());

    installer.disconnect();

    assert!(session.vm.requests().is_empty());
    assert!(!session.target.is_available());
    assert!(session.target.registry().is_empty());
    assert!(installer.breakpoints().is_empty());

    // Nothing binds against a disconnected target.
    assert!(installer.add_breakpoint(bp.clone()));
    assert!(!installer.is_installed(bp.marker()));
    assert!(session.vm.requests().is_empty());
}

#[test]
fn disconnect_after_the_vm_died_is_silent() {
    let session = Session::new();
    session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    installer.add_breakpoint(bar_breakpoint(&store()));

    session.vm.disconnect();
    installer.disconnect();

    assert!(session.diagnostics.is_empty());
    assert!(session.target.registry().is_empty());
}

#[test]
fn vm_death_forgets_requests_and_class_watches() {
    let session = Session::new();
    session.define_foo();
    let store = store();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bound = bar_breakpoint(&store);
    let pending = Breakpoint::create_line(
        store.clone(),
        store.create_marker(),
        "com.example.Later",
        3,
        None,
        None,
        true,
        AttributeMap::new(),
    )
    .unwrap();
    installer.add_breakpoint(bound.clone());
    installer.add_breakpoint(pending.clone());
    let request = installer.requests(bound.marker())[0].id();
    assert!(!hit(&session, request, 1));

    session
        .target
        .dispatch(&EventSet::new(SuspendPolicy::All, vec![jdsync_jdi::Event::VmDeath]));

    assert!(!session.target.is_available());
    assert!(!installer.is_installed(bound.marker()));
    assert!(installer.requests(bound.marker()).is_empty());
    assert!(session.target.registry().is_empty());
    // Tracking and hit counts outlive the session.
    assert_eq!(installer.breakpoints().len(), 2);
    assert_eq!(installer.hits(bound.marker()), 1);
    assert!(session.diagnostics.is_empty());

    // Nothing comes back to life on a dead session.
    installer.breakpoint_changed(bound.marker());
    assert!(!installer.is_installed(bound.marker()));
    assert!(session.target.registry().is_empty());
}

#[test]
fn remote_disconnect_seen_by_dispatch_forgets_requests() {
    let session = Session::new();
    session.define_foo();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store());
    installer.add_breakpoint(bp.clone());
    let request = installer.requests(bp.marker())[0].id();

    session.vm.disconnect();
    let event = jdsync_jdi::Event::Breakpoint {
        request_id: request,
        thread: 1,
        location: installer.requests(bp.marker())[0].location(),
    };
    let outcome = session
        .target
        .dispatch(&EventSet::new(SuspendPolicy::EventThread, vec![event]));

    assert_eq!(outcome.votes, 0);
    assert!(!installer.is_installed(bp.marker()));
    assert_eq!(installer.hits(bp.marker()), 0);
}

#[test]
fn sessions_do_not_share_binding_state() {
    let first = Session::new();
    let second = Session::new();
    first.define_foo();
    second.define_foo();
    let first_installer = BreakpointInstaller::new(first.target.clone());
    let second_installer = BreakpointInstaller::new(second.target.clone());
    let bp = bar_breakpoint(&store());

    first_installer.add_breakpoint(bp.clone());
    second_installer.add_breakpoint(bp.clone());
    assert_eq!(first.vm.breakpoint_requests().len(), 1);
    assert_eq!(second.vm.breakpoint_requests().len(), 1);

    first_installer.remove_breakpoint(bp.marker());
    assert!(first.vm.breakpoint_requests().is_empty());
    assert!(second_installer.is_installed(bp.marker()));
    assert_eq!(second.vm.breakpoint_requests().len(), 1);
}

#[test]
fn reloaded_attributes_drive_the_next_bind() {
    let session = Session::new();
    session.vm.define_class_with_methods(
        FOO,
        TypeTag::Class,
        [
            MockMethod::concrete("bar", "()V").with_entry_index(Some(4)),
            MockMethod::concrete("baz", "(I)V").with_entry_index(Some(30)),
        ],
    );
    let store = store();
    let installer = BreakpointInstaller::new(session.target.clone());
    let bp = bar_breakpoint(&store);
    installer.add_breakpoint(bp.clone());
    assert_eq!(installer.requests(bp.marker())[0].location().code_index, 4);

    // Storage changed underneath the breakpoint, e.g. restored on restart.
    let mut changes = AttributeMap::new();
    changes.insert(keys::METHOD_NAME.to_owned(), "baz".into());
    changes.insert(keys::METHOD_SIGNATURE.to_owned(), "(I)V".into());
    store.update(bp.marker(), &changes, &[]).unwrap();

    bp.reload().unwrap();
    installer.breakpoint_changed(bp.marker());

    assert_eq!(bp.method_name().as_deref(), Some("baz"));
    assert_eq!(installer.requests(bp.marker())[0].location().code_index, 30);
    assert!(!bp.supports_condition());
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, OnceLock, Weak};
use std::time::Duration;

use jdsync_breakpoints::{DebugTarget, DispatchOutcome, EventListener};
use jdsync_config::DispatchConfig;
use jdsync_jdi::{Event, EventSet, SuspendPolicy};

use crate::harness::{breakpoint_event, count, counter, voter, Session};

fn set(events: Vec<Event>) -> EventSet {
    EventSet::new(SuspendPolicy::EventThread, events)
}

#[test]
fn unanimous_votes_resume_the_event_thread() {
    let session = Session::new();
    let calls = counter();
    for _ in 0..3 {
        session.target.register_listener(7, voter(true, &calls));
    }

    let outcome = session.target.dispatch(&set(vec![breakpoint_event(7, 1)]));

    assert_eq!(
        outcome,
        DispatchOutcome {
            resume: true,
            votes: 3
        }
    );
    assert_eq!(session.vm.resumed_threads(), vec![1]);
}

#[test]
fn a_single_no_keeps_the_thread_suspended() {
    let session = Session::new();
    let calls = counter();
    session.target.register_listener(7, voter(true, &calls));
    session.target.register_listener(7, voter(false, &calls));
    session.target.register_listener(7, voter(true, &calls));

    let outcome = session.target.dispatch(&set(vec![breakpoint_event(7, 1)]));

    assert!(!outcome.resume);
    assert_eq!(outcome.votes, 3);
    // Every listener still sees the event.
    assert_eq!(count(&calls), 3);
    assert!(session.vm.resumed_threads().is_empty());
}

#[test]
fn no_listeners_means_resume() {
    let session = Session::new();

    let outcome = session.target.dispatch(&set(vec![breakpoint_event(7, 4)]));

    assert_eq!(
        outcome,
        DispatchOutcome {
            resume: true,
            votes: 0
        }
    );
    assert_eq!(session.vm.resumed_threads(), vec![4]);
}

#[test]
fn events_for_unregistered_requests_reach_nobody() {
    let session = Session::new();
    let calls = counter();
    session.target.register_listener(7, voter(false, &calls));

    let outcome = session.target.dispatch(&set(vec![breakpoint_event(8, 1)]));

    assert_eq!(count(&calls), 0);
    assert!(outcome.resume);
}

#[test]
fn votes_from_every_event_of_the_set_are_combined() {
    let session = Session::new();
    let calls = counter();
    session.target.register_listener(7, voter(true, &calls));
    session.target.register_listener(8, voter(false, &calls));

    let outcome = session
        .target
        .dispatch(&set(vec![breakpoint_event(7, 1), breakpoint_event(8, 1)]));

    assert_eq!(
        outcome,
        DispatchOutcome {
            resume: false,
            votes: 2
        }
    );
}

/// Deregisters itself from request 7 on its first call.
struct OneShot {
    this: Weak<OneShot>,
    calls: AtomicUsize,
}

impl EventListener for OneShot {
    fn handle_event(&self, event: &Event, target: &DebugTarget) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let (Some(request), Some(this)) = (event.request_id(), self.this.upgrade()) {
            let this: Arc<dyn EventListener> = this;
            target.deregister_listener(request, &this);
        }
        false
    }
}

#[test]
fn listener_deregistering_itself_is_not_called_again_in_the_same_set() {
    let session = Session::new();
    let one_shot = Arc::new_cyclic(|this| OneShot {
        this: this.clone(),
        calls: AtomicUsize::new(0),
    });
    let steady = counter();
    session.target.register_listener(7, one_shot.clone());
    session.target.register_listener(7, voter(true, &steady));

    let outcome = session.target.dispatch(&set(vec![
        breakpoint_event(7, 1),
        breakpoint_event(7, 1),
        breakpoint_event(7, 1),
    ]));

    assert_eq!(one_shot.calls.load(Ordering::SeqCst), 1);
    assert_eq!(count(&steady), 3);
    assert_eq!(outcome.votes, 4);
    assert!(!outcome.resume);

    let outcome = session.target.dispatch(&set(vec![breakpoint_event(7, 1)]));
    assert!(outcome.resume);
    assert_eq!(one_shot.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn listener_removed_by_an_earlier_listener_is_skipped() {
    let session = Session::new();
    let victim_calls = counter();
    let victim = voter(false, &victim_calls);
    let slot: Arc<OnceLock<Arc<dyn EventListener>>> = Arc::new(OnceLock::new());
    let _ = slot.set(victim.clone());

    let remover_slot = slot.clone();
    session.target.register_listener(
        7,
        Arc::new(move |_: &Event, target: &DebugTarget| {
            if let Some(victim) = remover_slot.get() {
                target.deregister_listener(7, victim);
            }
            true
        }),
    );
    session.target.register_listener(7, victim);

    let outcome = session.target.dispatch(&set(vec![breakpoint_event(7, 1)]));

    assert_eq!(count(&victim_calls), 0);
    assert!(outcome.resume);
}

#[test]
fn panicking_listener_casts_no_vote() {
    let session = Session::new();
    let calls = counter();
    session.target.register_listener(
        7,
        Arc::new(|_: &Event, _: &DebugTarget| -> bool { panic!("listener bug") }),
    );
    session.target.register_listener(7, voter(true, &calls));

    let outcome = session
        .target
        .dispatch(&set(vec![breakpoint_event(7, 1), breakpoint_event(7, 1)]));

    assert_eq!(
        outcome,
        DispatchOutcome {
            resume: true,
            votes: 2
        }
    );
    assert_eq!(count(&calls), 2);
    assert_eq!(
        session.diagnostics.entries(),
        vec!["listener panicked", "listener panicked"]
    );
}

#[test]
fn slow_listener_times_out_without_blocking_the_decision() {
    let session = Session::with_config(&DispatchConfig {
        listener_timeout_ms: Some(50),
    });
    let calls = counter();
    session.target.register_listener(
        7,
        Arc::new(|_: &Event, _: &DebugTarget| {
            std::thread::sleep(Duration::from_secs(1));
            false
        }),
    );
    session.target.register_listener(7, voter(true, &calls));

    let outcome = session.target.dispatch(&set(vec![breakpoint_event(7, 1)]));

    assert_eq!(
        outcome,
        DispatchOutcome {
            resume: true,
            votes: 1
        }
    );
    let entries = session.diagnostics.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("listener did not vote within"), "{entries:?}");
}

#[test]
fn sets_for_the_same_thread_are_serialized() {
    let session = Session::new();
    let active = counter();
    let max_active = counter();
    {
        let active = active.clone();
        let max_active = max_active.clone();
        session.target.register_listener(
            7,
            Arc::new(move |_: &Event, _: &DebugTarget| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
                true
            }),
        );
    }

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..3 {
                    session.target.dispatch(&set(vec![breakpoint_event(7, 1)]));
                }
            });
        }
    });

    assert_eq!(count(&max_active), 1);
    assert_eq!(session.vm.resumed_threads(), vec![1; 12]);
}

#[test]
fn sets_for_different_threads_run_concurrently() {
    // Both listeners wait for each other; serialized dispatch would time out.
    let session = Session::with_config(&DispatchConfig {
        listener_timeout_ms: Some(5_000),
    });
    let barrier = Arc::new(Barrier::new(2));
    session.target.register_listener(
        7,
        Arc::new(move |_: &Event, _: &DebugTarget| {
            barrier.wait();
            true
        }),
    );

    let outcomes: Vec<DispatchOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = [1, 2]
            .into_iter()
            .map(|thread| {
                let target = &session.target;
                scope.spawn(move || target.dispatch(&set(vec![breakpoint_event(7, thread)])))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    for outcome in outcomes {
        assert_eq!(
            outcome,
            DispatchOutcome {
                resume: true,
                votes: 1
            }
        );
    }
    let mut resumed = session.vm.resumed_threads();
    resumed.sort_unstable();
    assert_eq!(resumed, vec![1, 2]);
}

#[test]
fn resume_follows_the_set_suspend_policy() {
    let session = Session::new();

    let none = EventSet::new(SuspendPolicy::None, vec![breakpoint_event(7, 1)]);
    assert!(session.target.dispatch(&none).resume);
    assert!(session.vm.resumed_threads().is_empty());
    assert_eq!(session.vm.vm_resume_count(), 0);

    let all = EventSet::new(SuspendPolicy::All, vec![breakpoint_event(7, 1)]);
    assert!(session.target.dispatch(&all).resume);
    assert!(session.vm.resumed_threads().is_empty());
    assert_eq!(session.vm.vm_resume_count(), 1);

    let thread = EventSet::new(SuspendPolicy::EventThread, vec![breakpoint_event(7, 3)]);
    assert!(session.target.dispatch(&thread).resume);
    assert_eq!(session.vm.resumed_threads(), vec![3]);
}

#[test]
fn vm_death_stops_dispatch_for_the_rest_of_the_set() {
    let session = Session::new();
    let calls = counter();
    session.target.register_listener(7, voter(false, &calls));

    let outcome = session
        .target
        .dispatch(&set(vec![Event::VmDeath, breakpoint_event(7, 1)]));

    assert_eq!(count(&calls), 0);
    assert!(outcome.resume);
    assert!(!session.target.is_available());
    assert!(session.target.registry().is_empty());
    assert!(session.vm.resumed_threads().is_empty());
    assert!(session.diagnostics.is_empty());
}

#[test]
fn events_after_a_remote_disconnect_are_ignored() {
    let session = Session::new();
    let calls = counter();
    session.target.register_listener(7, voter(false, &calls));
    session.vm.disconnect();

    let outcome = session.target.dispatch(&set(vec![breakpoint_event(7, 1)]));

    assert_eq!(count(&calls), 0);
    assert_eq!(outcome.votes, 0);
    assert!(session.diagnostics.is_empty());
}

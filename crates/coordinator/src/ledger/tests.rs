use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use fanout_core::{
    FanoutError, Node, NodeId, ReportStatus, SchedulerConfig, ScriptConfig, TaskConfig, WorkerRegistration,
    WorkerSelection, MAX_POWER,
};

use super::*;

fn ledger() -> Ledger {
    Ledger::new(&SchedulerConfig::default())
}

fn worker(id: &str, power: u64) -> WorkerRegistration {
    WorkerRegistration {
        node: Node::new(id, "127.0.0.1", 9000, 9001),
        power,
    }
}

fn owner(id: &str) -> Node {
    Node::new(id, "127.0.0.1", 7000, 7001)
}

fn task(owner: &str) -> TaskConfig {
    TaskConfig {
        owner_id: owner.into(),
        generator: ScriptConfig {
            script: "function gen(i) { return i; }".into(),
            func_name: "gen".into(),
        },
        compute: ScriptConfig {
            script: "function cost(p) { return p; }".into(),
            func_name: "cost".into(),
        },
        data: json!({"matrix": [[0, 1], [1, 0]]}),
        task_name: "tsp".into(),
    }
}

fn assigned(plan: DispatchPlan) -> Vec<Assignment> {
    match plan {
        DispatchPlan::Assign(a) => a,
        DispatchPlan::TaskGone => panic!("expected assignments, task is gone"),
        DispatchPlan::Exhausted { .. } => panic!("expected assignments, input space exhausted"),
    }
}

/// Owner `o1` with a running task and the given workers registered.
fn running(ledger: &Ledger, workers: &[(&str, u64)]) -> u64 {
    ledger.register_owner(owner("o1")).unwrap();
    for (id, power) in workers {
        ledger.register_worker(worker(id, *power)).unwrap();
    }
    ledger.submit_task(task("o1")).unwrap().epoch
}

#[test]
fn test_register_worker_joins_free_set() {
    let ledger = ledger();
    assert!(ledger.register_worker(worker("w1", 0)).unwrap());
    assert!(ledger.is_free(&"w1".into()));
    // Re-registering is an upsert.
    assert!(!ledger.register_worker(worker("w1", 10)).unwrap());
    assert_eq!(ledger.snapshot().workers.len(), 1);
    ledger.check_invariants().unwrap();
}

#[test]
fn test_register_rejects_invalid_node() {
    let ledger = ledger();
    let bad = Node::new("", "127.0.0.1", 1, 2);
    assert!(matches!(ledger.register_owner(bad), Err(FanoutError::InvalidNode(_))));
}

#[test]
fn test_reregistering_busy_worker_stays_busy() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0)]);
    let first = assigned(ledger.plan_dispatch(&"o1".into(), epoch));
    assert_eq!(first.len(), 1);

    let mut moved = worker("w1", 0);
    moved.node.url = "10.9.9.9".into();
    ledger.register_worker(moved).unwrap();

    assert!(!ledger.is_free(&"w1".into()));
    assert_eq!(ledger.busy_with(&"w1".into()), Some(first[0].subtask_id()));
    let record = ledger.subtask(&first[0].subtask_id()).unwrap();
    assert_eq!(record.target.as_deref(), Some("http://127.0.0.1:9000"));
    ledger.check_invariants().unwrap();
}

#[test]
fn test_submit_for_unknown_owner_creates_nothing() {
    let ledger = ledger();
    let err = ledger.submit_task(task("ghost")).unwrap_err();
    assert!(matches!(err, FanoutError::OwnerNotFound(id) if id == "ghost"));
    let snap = ledger.snapshot();
    assert!(snap.tasks.is_empty());
    assert!(snap.owners.is_empty());
}

#[test]
fn test_dispatch_cuts_disjoint_windows() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0), ("w2", 20), ("w3", 0)]);
    let batch = assigned(ledger.plan_dispatch(&"o1".into(), epoch));

    let windows: Vec<(u64, u64)> = batch.iter().map(|a| (a.request.start, a.request.amount)).collect();
    assert_eq!(windows, vec![(0, 50), (50, 20), (70, 50)]);
    assert!(batch.iter().all(|a| a.request.data == json!({"matrix": [[0, 1], [1, 0]]})));
    assert!(batch.iter().all(|a| a.request.generate.func_name == "gen"));

    // Nobody is free, so the next tick cuts nothing.
    assert!(assigned(ledger.plan_dispatch(&"o1".into(), epoch)).is_empty());
    assert_eq!(ledger.snapshot().tasks[0].cursor, 120);
    ledger.check_invariants().unwrap();
}

#[test]
fn test_declared_power_is_clamped() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", u64::MAX)]);
    assert_eq!(ledger.snapshot().workers[0].power, MAX_POWER);

    let first = assigned(ledger.plan_dispatch(&"o1".into(), epoch)).remove(0);
    assert_eq!((first.request.start, first.request.amount), (0, MAX_POWER));
    ledger.complete_subtask(&first.subtask_id(), ReportStatus::Ok);

    let second = assigned(ledger.plan_dispatch(&"o1".into(), epoch)).remove(0);
    assert_eq!((second.request.start, second.request.amount), (MAX_POWER, MAX_POWER));
    assert_eq!(ledger.snapshot().tasks[0].cursor, 2 * MAX_POWER);
    ledger.check_invariants().unwrap();
}

#[test]
fn test_cursor_at_end_of_input_space_exhausts_task() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0), ("w2", 0)]);
    if let Some(task) = ledger.lock().tasks.get_mut(&NodeId::from("o1")) {
        task.cursor = u64::MAX - 30;
    }

    let (assignments, completion) = match ledger.plan_dispatch(&"o1".into(), epoch) {
        DispatchPlan::Exhausted { assignments, completion } => (assignments, completion),
        other => panic!("expected exhaustion, got {other:?}"),
    };
    // The last window is cut short instead of wrapping around.
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].window().start, u64::MAX - 30);
    assert_eq!(assignments[0].window().amount, 30);
    assert_eq!(completion.epoch, epoch);

    // The spare worker goes back to the pool and the loop has nothing left.
    assert!(ledger.is_free(&"w2".into()));
    assert!(ledger.snapshot().tasks.is_empty());
    assert_eq!(ledger.in_flight(&"o1".into(), epoch), 1);
    assert!(matches!(ledger.plan_dispatch(&"o1".into(), epoch), DispatchPlan::TaskGone));
    ledger.check_invariants().unwrap();
}

#[test]
fn test_by_id_selection_orders_workers_lexically() {
    let ledger = Ledger::new(&SchedulerConfig {
        worker_selection: WorkerSelection::ById,
        ..SchedulerConfig::default()
    });
    let epoch = running(&ledger, &[("w3", 0), ("w1", 0), ("w2", 0)]);
    let batch = assigned(ledger.plan_dispatch(&"o1".into(), epoch));
    let order: Vec<&str> = batch.iter().map(|a| a.worker_id.as_str()).collect();
    assert_eq!(order, vec!["w1", "w2", "w3"]);
}

#[test]
fn test_ok_result_forwards_and_frees_worker() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0)]);
    let a = assigned(ledger.plan_dispatch(&"o1".into(), epoch)).remove(0);

    match ledger.complete_subtask(&a.subtask_id(), ReportStatus::Ok) {
        ResultOutcome::Forward { owner, window } => {
            assert_eq!(owner.id, NodeId::from("o1"));
            assert_eq!(window.start, 0);
        }
        other => panic!("expected forward, got {other:?}"),
    }
    assert!(ledger.is_free(&"w1".into()));
    assert!(ledger.subtask(&a.subtask_id()).is_none());

    // A duplicate report for the same id is ignored.
    assert!(matches!(
        ledger.complete_subtask(&a.subtask_id(), ReportStatus::Ok),
        ResultOutcome::Unknown
    ));

    let next = assigned(ledger.plan_dispatch(&"o1".into(), epoch)).remove(0);
    assert_eq!(next.request.start, 50);
    ledger.check_invariants().unwrap();
}

#[test]
fn test_retry_bound_aborts_on_fourth_failure() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0)]);
    let mut current = assigned(ledger.plan_dispatch(&"o1".into(), epoch)).remove(0);

    for attempt in 1..=3 {
        match ledger.fail_subtask(&current.subtask_id()) {
            FailureOutcome::Reassigned(next) => {
                assert_ne!(next.subtask_id(), current.subtask_id());
                assert_eq!(next.window(), current.window());
                assert_eq!(next.errors, attempt);
                current = next;
            }
            other => panic!("attempt {attempt}: expected reassignment, got {other:?}"),
        }
        ledger.check_invariants().unwrap();
    }

    match ledger.fail_subtask(&current.subtask_id()) {
        FailureOutcome::Aborted(abort) => {
            assert_eq!(abort.errors, 4);
            assert_eq!(abort.owner.unwrap().id, NodeId::from("o1"));
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(ledger.owner_status(&"o1".into()), Some(TaskStatus::Error));
    assert!(matches!(ledger.plan_dispatch(&"o1".into(), epoch), DispatchPlan::TaskGone));
    assert!(ledger.is_free(&"w1".into()));
    ledger.check_invariants().unwrap();
}

#[test]
fn test_failure_without_free_worker_stalls_until_claimed() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0), ("w2", 0)]);
    let batch = assigned(ledger.plan_dispatch(&"o1".into(), epoch));

    // w2 is still busy and w1 is gone, so nobody can take the window.
    let stalled = match ledger.evict_worker(&"w1".into()).unwrap().failed {
        Some((_, FailureOutcome::Stalled { subtask_id, errors })) => {
            assert_eq!(errors, 1);
            subtask_id
        }
        other => panic!("expected a stalled subtask, got {other:?}"),
    };
    assert_eq!(ledger.subtask(&stalled).unwrap().status, SubtaskStatus::Error);
    assert_eq!(ledger.in_flight(&"o1".into(), epoch), 2);
    ledger.check_invariants().unwrap();

    ledger.register_worker(worker("w3", 0)).unwrap();
    let claimed = ledger.claim_stalled();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].worker_id, NodeId::from("w3"));
    assert_eq!(claimed[0].window(), batch[0].window());
    assert_eq!(claimed[0].errors, 1);
    assert!(ledger.subtask(&stalled).is_none());
    ledger.check_invariants().unwrap();
}

#[test]
fn test_dispatch_tick_prefers_stalled_windows() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0)]);
    let first = assigned(ledger.plan_dispatch(&"o1".into(), epoch)).remove(0);
    ledger.evict_worker(&"w1".into());

    ledger.register_worker(worker("w2", 0)).unwrap();
    let batch = assigned(ledger.plan_dispatch(&"o1".into(), epoch));
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].window(), first.window());
    assert_eq!(batch[0].errors, 1);
    // The cursor did not move for the resend.
    assert_eq!(ledger.snapshot().tasks[0].cursor, 50);
}

#[test]
fn test_empty_report_exhausts_task_once() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0), ("w2", 0)]);
    let batch = assigned(ledger.plan_dispatch(&"o1".into(), epoch));

    match ledger.complete_subtask(&batch[1].subtask_id(), ReportStatus::Empty) {
        ResultOutcome::Exhausted(done) => assert_eq!(done.epoch, epoch),
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert!(matches!(ledger.plan_dispatch(&"o1".into(), epoch), DispatchPlan::TaskGone));
    assert_eq!(ledger.in_flight(&"o1".into(), epoch), 1);

    // Partials from windows still out keep flowing while the task drains.
    assert!(matches!(
        ledger.complete_subtask(&batch[0].subtask_id(), ReportStatus::Ok),
        ResultOutcome::Forward { .. }
    ));
    assert_eq!(ledger.in_flight(&"o1".into(), epoch), 0);
    assert!(ledger.mark_done(&"o1".into(), epoch).is_some());
    assert_eq!(ledger.owner_status(&"o1".into()), Some(TaskStatus::Done));
    assert!(ledger.mark_done(&"o1".into(), epoch).is_none());
}

#[test]
fn test_second_empty_while_draining_is_not_a_new_completion() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0), ("w2", 0)]);
    let batch = assigned(ledger.plan_dispatch(&"o1".into(), epoch));

    assert!(matches!(
        ledger.complete_subtask(&batch[1].subtask_id(), ReportStatus::Empty),
        ResultOutcome::Exhausted(_)
    ));
    assert!(matches!(
        ledger.complete_subtask(&batch[0].subtask_id(), ReportStatus::Empty),
        ResultOutcome::AlreadyFinishing
    ));
}

#[test]
fn test_resubmission_orphans_old_subtasks() {
    let ledger = ledger();
    let first_epoch = running(&ledger, &[("w1", 0)]);
    let old = assigned(ledger.plan_dispatch(&"o1".into(), first_epoch)).remove(0);

    let restart = ledger.submit_task(task("o1")).unwrap();
    assert!(restart.replaced);
    assert_eq!(restart.epoch, first_epoch + 1);
    assert!(matches!(ledger.plan_dispatch(&"o1".into(), first_epoch), DispatchPlan::TaskGone));

    // A late result from the first submission is not forwarded.
    assert!(matches!(
        ledger.complete_subtask(&old.subtask_id(), ReportStatus::Ok),
        ResultOutcome::Dropped
    ));
    let fresh = assigned(ledger.plan_dispatch(&"o1".into(), restart.epoch)).remove(0);
    assert_eq!(fresh.request.start, 0);
}

#[test]
fn test_close_task_stops_dispatch() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0)]);
    let start = ledger.snapshot();
    assert_eq!(start.tasks.len(), 1);

    assert!(ledger.close_task(&"o1".into()).unwrap());
    assert!(matches!(ledger.plan_dispatch(&"o1".into(), epoch), DispatchPlan::TaskGone));
    assert_eq!(ledger.owner_status(&"o1".into()), Some(TaskStatus::Closed));
    assert!(matches!(
        ledger.close_task(&"ghost".into()),
        Err(FanoutError::OwnerNotFound(_))
    ));
}

#[test]
fn test_evicting_idle_worker_leaves_both_sets() {
    let ledger = ledger();
    ledger.register_worker(worker("w1", 0)).unwrap();
    let eviction = ledger.evict_worker(&"w1".into()).unwrap();
    assert!(eviction.failed.is_none());
    assert!(!ledger.is_free(&"w1".into()));
    assert!(ledger.evict_worker(&"w1".into()).is_none());
    ledger.check_invariants().unwrap();
}

#[test]
fn test_evicting_busy_worker_reassigns_its_window() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0)]);
    let a = assigned(ledger.plan_dispatch(&"o1".into(), epoch)).remove(0);
    ledger.register_worker(worker("w2", 0)).unwrap();

    let eviction = ledger.evict_worker(&"w1".into()).unwrap();
    match eviction.failed {
        Some((sid, FailureOutcome::Reassigned(next))) => {
            assert_eq!(sid, a.subtask_id());
            assert_eq!(next.worker_id, NodeId::from("w2"));
            assert_eq!(next.window(), a.window());
        }
        other => panic!("expected reassignment, got {other:?}"),
    }
    assert!(ledger.busy_with(&"w1".into()).is_none());
    ledger.check_invariants().unwrap();
}

#[test]
fn test_evicting_owner_ends_its_task() {
    let ledger = ledger();
    let epoch = running(&ledger, &[("w1", 0)]);
    let a = assigned(ledger.plan_dispatch(&"o1".into(), epoch)).remove(0);

    assert!(ledger.evict_owner(&"o1".into()));
    assert!(matches!(ledger.plan_dispatch(&"o1".into(), epoch), DispatchPlan::TaskGone));
    // The worker's failure is released rather than retried.
    assert!(matches!(ledger.fail_subtask(&a.subtask_id()), FailureOutcome::Released));
    assert!(ledger.is_free(&"w1".into()));
    ledger.check_invariants().unwrap();
}

#[tokio::test]
async fn test_wait_drained_wakes_on_last_resolution() {
    let ledger = Arc::new(ledger());
    let epoch = running(&ledger, &[("w1", 0), ("w2", 0)]);
    let batch = assigned(ledger.plan_dispatch(&"o1".into(), epoch));

    let waiter = {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { ledger.wait_drained(&"o1".into(), epoch).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    ledger.complete_subtask(&batch[0].subtask_id(), ReportStatus::Empty);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    ledger.complete_subtask(&batch[1].subtask_id(), ReportStatus::Ok);
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("drain should finish")
        .unwrap();
}

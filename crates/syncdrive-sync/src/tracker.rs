//! The dependency tracker and worker pool: turns a flat `Actions`
//! list plus `Deps[i]` into a ready queue workers pull from, tracks
//! per-cycle completion for watch mode, and supports in-flight
//! cancellation-by-path for deduplicating a superseded observation.
//!
//! The tracker assigns its own globally unique ids to actions as they're
//! added (`add_plan`) rather than reusing `Action::seq`, because in watch
//! mode every re-plan restarts its local indices at zero while a prior
//! cycle's actions may still be draining.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use syncdrive_core::domain::{Action, ActionPlan, CycleId, Outcome, SyncPath};

/// One action as tracked internally: the action itself, which cycle it
/// belongs to, and the cancellation token a worker's handler should observe
/// if this path gets superseded mid-flight.
#[derive(Clone)]
pub struct TrackedAction {
    pub id: usize,
    pub cycle_id: CycleId,
    pub action: Action,
    pub cancel: CancellationToken,
}

struct CycleBookkeeping {
    pending: usize,
    failed: bool,
    done_tx: watch::Sender<bool>,
}

struct State {
    remaining: HashMap<usize, usize>,
    dependents: HashMap<usize, Vec<usize>>,
    tracked: HashMap<usize, TrackedAction>,
    ready: VecDeque<usize>,
    inflight: HashMap<String, usize>,
    cycles: HashMap<CycleId, CycleBookkeeping>,
    next_id: usize,
}

/// The DAG-aware scheduler driving plan execution. Cheaply cloneable via `Arc`
/// for sharing between the engine and the worker pool.
pub struct DependencyTracker {
    state: Mutex<State>,
    notify: Notify,
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                remaining: HashMap::new(),
                dependents: HashMap::new(),
                tracked: HashMap::new(),
                ready: VecDeque::new(),
                inflight: HashMap::new(),
                cycles: HashMap::new(),
                next_id: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Registers every action in `plan` under a fresh `cycle_id`, remapping
    /// the plan's local `depends_on` indices to the tracker's global ids.
    /// Returns the global id assigned to each local index, in plan order.
    pub async fn add_plan(&self, plan: ActionPlan, cycle_id: CycleId) -> Vec<usize> {
        let mut state = self.state.lock().await;

        let local_to_global: Vec<usize> = (0..plan.actions.len())
            .map(|_| {
                let id = state.next_id;
                state.next_id += 1;
                id
            })
            .collect();

        let (done_tx, _) = watch::channel(false);
        state.cycles.insert(
            cycle_id,
            CycleBookkeeping {
                pending: plan.actions.len(),
                failed: false,
                done_tx,
            },
        );

        for (local_idx, action) in plan.actions.iter().enumerate() {
            let id = local_to_global[local_idx];
            let dep_ids: Vec<usize> = action
                .depends_on
                .iter()
                .map(|&dep_local| local_to_global[dep_local])
                .collect();

            for &dep in &dep_ids {
                state.dependents.entry(dep).or_default().push(id);
            }
            state.remaining.insert(id, dep_ids.len());
            state.tracked.insert(
                id,
                TrackedAction {
                    id,
                    cycle_id,
                    action: action.clone(),
                    cancel: CancellationToken::new(),
                },
            );

            if dep_ids.is_empty() {
                state.ready.push_back(id);
            }
        }

        if plan.actions.is_empty() {
            // A plan with no actions completes its own cycle immediately.
            self.finish_cycle_if_done(&mut state, cycle_id);
        }

        drop(state);
        self.notify.notify_waiters();
        local_to_global
    }

    /// Blocks until a ready action is available or `cancel` fires. Marks the
    /// action's path in-flight so `has_in_flight`/`cancel_by_path` can see it
    /// between now and the matching `complete`.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<TrackedAction> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(id) = state.ready.pop_front() {
                    let tracked = state.tracked.get(&id).cloned().expect("ready id must be tracked");
                    state.inflight.insert(tracked.action.path.as_str().to_string(), id);
                    return Some(tracked);
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Marks an action complete, propagating readiness to its dependents and
    /// decrementing its cycle's pending counter.
    pub async fn complete(&self, id: usize, success: bool) {
        let mut state = self.state.lock().await;

        let Some(tracked) = state.tracked.get(&id).cloned() else {
            warn!(id, "complete() called for unknown action id");
            return;
        };
        state.inflight.remove(tracked.action.path.as_str());

        let dependents = state.dependents.remove(&id).unwrap_or_default();
        for dependent in dependents {
            if let Some(count) = state.remaining.get_mut(&dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.ready.push_back(dependent);
                }
            }
        }

        if let Some(bookkeeping) = state.cycles.get_mut(&tracked.cycle_id) {
            bookkeeping.pending = bookkeeping.pending.saturating_sub(1);
            if !success {
                bookkeeping.failed = true;
            }
        }

        let cycle_id = tracked.cycle_id;
        self.finish_cycle_if_done(&mut state, cycle_id);

        drop(state);
        self.notify.notify_waiters();
    }

    fn finish_cycle_if_done(&self, state: &mut State, cycle_id: CycleId) {
        if let Some(bookkeeping) = state.cycles.get(&cycle_id) {
            if bookkeeping.pending == 0 {
                let _ = bookkeeping.done_tx.send(true);
            }
        }
    }

    /// Awaits `CycleDone(cycle_id)`: resolves once every action added under
    /// this cycle has completed (successfully or not). Returns whether any
    /// action in the cycle failed.
    pub async fn wait_cycle_done(&self, cycle_id: CycleId) -> bool {
        let mut rx = {
            let state = self.state.lock().await;
            match state.cycles.get(&cycle_id) {
                Some(b) => b.done_tx.subscribe(),
                None => return false,
            }
        };
        if !*rx.borrow() {
            let _ = rx.changed().await;
        }
        let state = self.state.lock().await;
        state.cycles.get(&cycle_id).map(|b| b.failed).unwrap_or(false)
    }

    pub async fn has_in_flight(&self, path: &SyncPath) -> bool {
        self.state.lock().await.inflight.contains_key(path.as_str())
    }

    /// Cancels the in-flight action at `path`, if any, by firing its
    /// cancellation token. Does not remove it from tracking - the worker
    /// executing it is responsible for observing cancellation, returning a
    /// failed outcome, and calling `complete` as usual so the DAG still
    /// unblocks; the caller then enqueues the superseding action fresh.
    pub async fn cancel_by_path(&self, path: &SyncPath) {
        let state = self.state.lock().await;
        if let Some(&id) = state.inflight.get(path.as_str()) {
            if let Some(tracked) = state.tracked.get(&id) {
                debug!(path = path.as_str(), id, "cancelling superseded in-flight action");
                tracked.cancel.cancel();
            }
        }
    }

    /// Drops bookkeeping for a finished cycle (tracked actions, dependency
    /// edges, and the pending counter were already cleared by `complete`;
    /// this just removes the cycle's entry itself).
    pub async fn cleanup_cycle(&self, cycle_id: CycleId) {
        let mut state = self.state.lock().await;
        state.cycles.remove(&cycle_id);
        let stale: Vec<usize> = state
            .tracked
            .iter()
            .filter(|(_, t)| t.cycle_id == cycle_id)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            state.tracked.remove(&id);
        }
    }
}

/// One worker's report after executing (or being cancelled out of) a single
/// action.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub id: usize,
    pub cycle_id: CycleId,
    pub path: SyncPath,
    pub success: bool,
    pub err_msg: Option<String>,
}

/// What a worker does with a dispatched action: run the handler, then
/// persist its outcome to the baseline. Kept as one trait (rather than a
/// handler trait plus a separate committer) because building the baseline
/// upsert from an `Outcome` needs the same action-type-specific knowledge
/// the handler already has.
#[async_trait::async_trait]
pub trait ActionRunner: Send + Sync {
    /// Executes `action`, returning its outcome. Implementations should
    /// check `cancel` at I/O suspension points and return promptly with a
    /// failed outcome if it fires.
    async fn run(&self, action: &Action, cancel: &CancellationToken) -> Outcome;

    /// Buffers `outcome` against `cycle_id` for the caller's later batched
    /// `BaselineStore::commit_cycle` call. Called before `complete` so a
    /// dependent that becomes ready can immediately see the pending state
    /// through the runner's own in-memory view, even though nothing is
    /// durable yet.
    async fn commit(&self, cycle_id: CycleId, action: &Action, outcome: &Outcome);
}

/// Spawns `worker_count` tasks pulling from `tracker`, each running actions
/// through `runner` until `shutdown` fires. Results are published on the
/// returned channel; the caller drains it to build the cycle report.
pub fn spawn_workers(
    tracker: Arc<DependencyTracker>,
    runner: Arc<dyn ActionRunner>,
    worker_count: usize,
    shutdown: CancellationToken,
) -> (Vec<tokio::task::JoinHandle<()>>, mpsc::Receiver<WorkerResult>) {
    let (tx, rx) = mpsc::channel(worker_count.max(1) * 4);

    let handles = (0..worker_count.max(1))
        .map(|worker_idx| {
            let tracker = tracker.clone();
            let runner = runner.clone();
            let shutdown = shutdown.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                loop {
                    let Some(tracked) = tracker.next(&shutdown).await else {
                        debug!(worker_idx, "worker stopping: shutdown requested");
                        break;
                    };

                    let outcome = runner.run(&tracked.action, &tracked.cancel).await;
                    if outcome.success {
                        runner.commit(tracked.cycle_id, &tracked.action, &outcome).await;
                    }

                    let result = WorkerResult {
                        id: tracked.id,
                        cycle_id: tracked.cycle_id,
                        path: tracked.action.path.clone(),
                        success: outcome.success,
                        err_msg: outcome.error.clone(),
                    };

                    tracker.complete(tracked.id, outcome.success).await;

                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
            })
        })
        .collect();

    (handles, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncdrive_core::domain::{ActionType, DriveId};
    use tokio::time::{timeout, Duration};

    fn action(seq: usize, path: &str, deps: Vec<usize>) -> Action {
        let mut a = Action::new(
            seq,
            ActionType::Upload,
            DriveId::new("d1".into()).unwrap(),
            SyncPath::new(path).unwrap(),
        );
        a.depends_on = deps;
        a
    }

    #[tokio::test]
    async fn independent_actions_are_all_ready_immediately() {
        let tracker = DependencyTracker::new();
        let plan = ActionPlan {
            actions: vec![action(0, "a.txt", vec![]), action(1, "b.txt", vec![])],
        };
        let cycle = CycleId::new();
        tracker.add_plan(plan, cycle).await;

        let cancel = CancellationToken::new();
        let first = tracker.next(&cancel).await.unwrap();
        let second = tracker.next(&cancel).await.unwrap();
        let paths: HashSet<_> = [first.action.path.as_str(), second.action.path.as_str()]
            .into_iter()
            .collect();
        assert!(paths.contains("a.txt") && paths.contains("b.txt"));
    }

    #[tokio::test]
    async fn dependent_action_waits_for_its_dependency() {
        let tracker = DependencyTracker::new();
        let plan = ActionPlan {
            actions: vec![action(0, "folder", vec![]), action(1, "folder/child.txt", vec![0])],
        };
        let cycle = CycleId::new();
        tracker.add_plan(plan, cycle).await;

        let cancel = CancellationToken::new();
        let first = tracker.next(&cancel).await.unwrap();
        assert_eq!(first.action.path.as_str(), "folder");

        // child isn't ready yet; next() would block, so race it against a
        // short timeout to prove it's not immediately available.
        let not_yet = timeout(Duration::from_millis(50), tracker.next(&cancel)).await;
        assert!(not_yet.is_err());

        tracker.complete(first.id, true).await;
        let second = tracker.next(&cancel).await.unwrap();
        assert_eq!(second.action.path.as_str(), "folder/child.txt");
    }

    #[tokio::test]
    async fn cycle_done_reports_failure_when_any_action_fails() {
        let tracker = DependencyTracker::new();
        let plan = ActionPlan {
            actions: vec![action(0, "a.txt", vec![]), action(1, "b.txt", vec![])],
        };
        let cycle = CycleId::new();
        tracker.add_plan(plan, cycle).await;

        let cancel = CancellationToken::new();
        let first = tracker.next(&cancel).await.unwrap();
        let second = tracker.next(&cancel).await.unwrap();
        tracker.complete(first.id, true).await;
        tracker.complete(second.id, false).await;

        let failed = tracker.wait_cycle_done(cycle).await;
        assert!(failed);
    }

    #[tokio::test]
    async fn empty_plan_completes_its_cycle_immediately() {
        let tracker = DependencyTracker::new();
        let cycle = CycleId::new();
        tracker.add_plan(ActionPlan::default(), cycle).await;
        let failed = tracker.wait_cycle_done(cycle).await;
        assert!(!failed);
    }

    #[tokio::test]
    async fn cancel_by_path_fires_the_in_flight_token() {
        let tracker = DependencyTracker::new();
        let plan = ActionPlan {
            actions: vec![action(0, "a.txt", vec![])],
        };
        let cycle = CycleId::new();
        tracker.add_plan(plan, cycle).await;

        let cancel = CancellationToken::new();
        let tracked = tracker.next(&cancel).await.unwrap();
        assert!(tracker.has_in_flight(&SyncPath::new("a.txt").unwrap()).await);

        tracker.cancel_by_path(&SyncPath::new("a.txt").unwrap()).await;
        assert!(tracked.cancel.is_cancelled());
    }
}

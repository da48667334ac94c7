//! Hierarchical progress tracking and cancellation
//!
//! A [`TaskInfo`] is a cheap, cloneable handle to one node of a task tree.
//! Every node owns its own lock and never takes another node's lock while
//! holding it: a parent's percentage is computed on read from its children,
//! and changes are pushed to observers as [`TaskEvent`] messages over a
//! broadcast channel shared by the whole tree.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};

const EVENT_CAPACITY: usize = 256;

/// Lifecycle of a task node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Running,
    Completed,
    Faulted,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Faulted | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Created => "created",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Faulted => "faulted",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A change on one node, as seen by subscribers
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub name: String,
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone)]
pub enum TaskEventKind {
    ChildAdded(Uuid),
    Status(TaskStatus),
    Progress(f64),
    Message(String),
}

/// Point-in-time copy of a task tree
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    pub percentage: f64,
    pub message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub children: Vec<TaskSnapshot>,
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    percentage: f64,
    message: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct TaskNode {
    id: Uuid,
    name: String,
    weight: f64,
    state: RwLock<TaskState>,
    children: RwLock<Vec<TaskInfo>>,
    cancellation: CancellationToken,
    events: broadcast::Sender<TaskEvent>,
}

/// Handle to a node of the task tree
#[derive(Debug, Clone)]
pub struct TaskInfo {
    node: Arc<TaskNode>,
}

impl TaskInfo {
    /// Create a root task with its own event channel and cancellation token
    pub fn new(name: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self::with_parts(name, 1.0, CancellationToken::new(), events)
    }

    fn with_parts(
        name: &str,
        weight: f64,
        cancellation: CancellationToken,
        events: broadcast::Sender<TaskEvent>,
    ) -> Self {
        Self {
            node: Arc::new(TaskNode {
                id: Uuid::new_v4(),
                name: name.to_string(),
                weight,
                state: RwLock::new(TaskState {
                    status: TaskStatus::Created,
                    percentage: 0.0,
                    message: String::new(),
                    started_at: None,
                    completed_at: None,
                }),
                children: RwLock::new(Vec::new()),
                cancellation,
                events,
            }),
        }
    }

    /// Add a child with weight 1
    pub fn add_child(&self, name: &str) -> Result<TaskInfo> {
        self.add_weighted_child(name, 1.0)
    }

    /// Add a child whose percentage counts `weight` times in this node's average
    ///
    /// Only allowed while this node is `Created` or `Running`.
    pub fn add_weighted_child(&self, name: &str, weight: f64) -> Result<TaskInfo> {
        if weight.is_nan() || weight <= 0.0 {
            return Err(Error::TaskError(format!(
                "weight of child '{}' must be positive",
                name
            )));
        }

        // Children lock before state lock, as in `transition`
        let child = {
            let mut children = self.node.children.write();
            let status = self.node.state.read().status;
            if status.is_terminal() {
                return Err(Error::TaskError(format!(
                    "cannot add child '{}' to {} task '{}'",
                    name, status, self.node.name
                )));
            }
            let child = Self::with_parts(
                name,
                weight,
                self.node.cancellation.child_token(),
                self.node.events.clone(),
            );
            children.push(child.clone());
            child
        };
        self.emit(TaskEventKind::ChildAdded(child.id()));
        Ok(child)
    }

    pub fn id(&self) -> Uuid {
        self.node.id
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn status(&self) -> TaskStatus {
        self.node.state.read().status
    }

    pub fn message(&self) -> String {
        self.node.state.read().message.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.node.state.read().started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.node.state.read().completed_at
    }

    /// Children in insertion order
    pub fn children(&self) -> Vec<TaskInfo> {
        self.node.children.read().clone()
    }

    pub fn is_leaf(&self) -> bool {
        self.node.children.read().is_empty()
    }

    /// Percentage of this node: its own value for a leaf, the weighted
    /// average of its children otherwise
    pub fn percentage(&self) -> f64 {
        let children = self.children();
        if children.is_empty() {
            return self.node.state.read().percentage;
        }

        let (sum, weights) = children.iter().fold((0.0, 0.0), |(sum, weights), child| {
            (sum + child.percentage() * child.node.weight, weights + child.node.weight)
        });
        sum / weights
    }

    /// Set the percentage of a leaf node, clamped to 0..=100
    pub fn set_percentage(&self, percentage: f64) -> Result<()> {
        if !self.is_leaf() {
            return Err(Error::TaskError(format!(
                "percentage of '{}' is computed from its children",
                self.node.name
            )));
        }
        let value = percentage.clamp(0.0, 100.0);
        {
            let mut state = self.node.state.write();
            if state.status.is_terminal() {
                return Err(Error::TaskError(format!(
                    "cannot update progress of {} task '{}'",
                    state.status, self.node.name
                )));
            }
            state.percentage = value;
        }
        self.emit(TaskEventKind::Progress(value));
        Ok(())
    }

    /// Set the percentage from a processed/total pair
    pub fn set_progress(&self, processed: usize, total: usize) -> Result<()> {
        let percentage = if total == 0 {
            100.0
        } else {
            processed as f64 * 100.0 / total as f64
        };
        self.set_percentage(percentage)
    }

    pub fn set_message(&self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        {
            let mut state = self.node.state.write();
            if state.status.is_terminal() {
                return Err(Error::TaskError(format!(
                    "cannot update message of {} task '{}'",
                    state.status, self.node.name
                )));
            }
            state.message = message.clone();
        }
        self.emit(TaskEventKind::Message(message));
        Ok(())
    }

    /// `Created -> Running`
    pub fn start(&self) -> Result<()> {
        self.transition(TaskStatus::Running, None)
    }

    /// `Running -> Completed`; a leaf is pinned at 100%
    pub fn complete(&self) -> Result<()> {
        self.transition(TaskStatus::Completed, None)
    }

    /// `Created | Running -> Faulted`, keeping `message` on the node
    pub fn fault(&self, message: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Faulted, Some(message.into()))
    }

    /// `Created | Running -> Cancelled`
    pub fn mark_cancelled(&self) -> Result<()> {
        self.transition(TaskStatus::Cancelled, None)
    }

    fn transition(&self, to: TaskStatus, message: Option<String>) -> Result<()> {
        {
            let children = self.node.children.read();
            let leaf = children.is_empty();
            let mut state = self.node.state.write();
            let allowed = match (state.status, to) {
                (TaskStatus::Created, TaskStatus::Running) => true,
                (TaskStatus::Running, TaskStatus::Completed) => true,
                (TaskStatus::Created | TaskStatus::Running, TaskStatus::Faulted) => true,
                (TaskStatus::Created | TaskStatus::Running, TaskStatus::Cancelled) => true,
                _ => false,
            };
            if !allowed {
                return Err(Error::TaskError(format!(
                    "task '{}' cannot go from {} to {}",
                    self.node.name, state.status, to
                )));
            }

            let now = Utc::now();
            match to {
                TaskStatus::Running => state.started_at = Some(now),
                _ => state.completed_at = Some(now),
            }
            if to == TaskStatus::Completed && leaf {
                state.percentage = 100.0;
            }
            if let Some(message) = &message {
                state.message = message.clone();
            }
            state.status = to;
        }

        if let Some(message) = message {
            self.emit(TaskEventKind::Message(message));
        }
        self.emit(TaskEventKind::Status(to));
        Ok(())
    }

    /// Request cancellation of this node and its whole subtree
    ///
    /// Cooperative: the operations owning the nodes observe the token and
    /// move their nodes to `Cancelled` themselves.
    pub fn cancel(&self) {
        self.node.cancellation.cancel();
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.node.cancellation.is_cancelled()
    }

    /// Token observed by the operation that owns this node
    pub fn cancellation_token(&self) -> CancellationToken {
        self.node.cancellation.clone()
    }

    /// Receive every event raised anywhere in this node's tree
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.node.events.subscribe()
    }

    /// Recursive copy of the node for rendering or serialization
    pub fn snapshot(&self) -> TaskSnapshot {
        let percentage = self.percentage();
        let children = self.children().iter().map(TaskInfo::snapshot).collect();
        let state = self.node.state.read();
        TaskSnapshot {
            id: self.node.id,
            name: self.node.name.clone(),
            status: state.status,
            percentage,
            message: state.message.clone(),
            started_at: state.started_at,
            completed_at: state.completed_at,
            children,
        }
    }

    fn emit(&self, kind: TaskEventKind) {
        // No subscribers is not an error
        let _ = self.node.events.send(TaskEvent {
            task_id: self.node.id,
            name: self.node.name.clone(),
            kind,
        });
    }
}

/// Settle a running `task` according to the outcome of its work
///
/// `Ok` completes the task, `Error::Cancelled` marks it cancelled and any
/// other error faults it with the error text.
pub fn settle<T>(task: &TaskInfo, outcome: Result<T>) -> Result<T> {
    let settled = match &outcome {
        Ok(_) => task.complete(),
        Err(Error::Cancelled) => task.mark_cancelled(),
        Err(e) => task.fault(e.to_string()),
    };
    if let Err(e) = settled {
        tracing::debug!(task = task.name(), error = %e, "task already settled");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_percentage_is_mean_of_children() {
        let root = TaskInfo::new("root");
        let a = root.add_child("a").unwrap();
        let b = root.add_child("b").unwrap();
        a.set_percentage(50.0).unwrap();
        b.set_percentage(100.0).unwrap();
        assert_eq!(root.percentage(), 75.0);
    }

    #[test]
    fn weighted_children() {
        let root = TaskInfo::new("root");
        let a = root.add_weighted_child("a", 3.0).unwrap();
        let _b = root.add_child("b").unwrap();
        a.set_percentage(100.0).unwrap();
        assert_eq!(root.percentage(), 75.0);
    }

    #[test]
    fn parent_percentage_cannot_be_written() {
        let root = TaskInfo::new("root");
        root.add_child("a").unwrap();
        assert!(matches!(root.set_percentage(10.0), Err(Error::TaskError(_))));
    }

    #[test]
    fn terminal_states_are_final() {
        let task = TaskInfo::new("t");
        task.start().unwrap();
        task.set_percentage(40.0).unwrap();
        task.complete().unwrap();
        assert_eq!(task.percentage(), 100.0);
        assert!(task.set_percentage(10.0).is_err());
        assert!(task.set_message("late").is_err());
        assert!(task.fault("late").is_err());
        assert!(task.start().is_err());
        assert!(task.add_child("late").is_err());
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[test]
    fn completed_parent_refuses_children() {
        let parent = TaskInfo::new("parent");
        parent.start().unwrap();
        let child = parent.add_child("child").unwrap();
        child.start().unwrap();
        child.complete().unwrap();
        parent.complete().unwrap();

        let refused = parent.add_child("late");
        assert!(matches!(refused, Err(Error::TaskError(_))));
        assert_eq!(parent.children().len(), 1);
        assert_eq!(parent.percentage(), 100.0);
    }

    #[test]
    fn add_child_racing_complete_never_lands_on_finished_task() {
        for _ in 0..200 {
            let task = TaskInfo::new("t");
            task.start().unwrap();

            let added = std::thread::scope(|scope| {
                let adder = scope.spawn(|| task.add_child("late"));
                task.complete().unwrap();
                adder.join().unwrap()
            });

            match added {
                // Attached while running; the task then completed as a parent
                Ok(child) => assert_eq!(task.children()[0].id(), child.id()),
                Err(Error::TaskError(_)) => {
                    assert!(task.is_leaf());
                    assert_eq!(task.percentage(), 100.0);
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
    }

    #[test]
    fn complete_requires_running() {
        let task = TaskInfo::new("t");
        assert!(task.complete().is_err());
        assert!(task.mark_cancelled().is_ok());
    }

    #[test]
    fn cancellation_propagates_down() {
        let root = TaskInfo::new("root");
        let child = root.add_child("child").unwrap();
        let grandchild = child.add_child("grandchild").unwrap();
        let sibling_root = TaskInfo::new("other");

        root.cancel();
        assert!(child.is_cancellation_requested());
        assert!(grandchild.is_cancellation_requested());
        assert!(!sibling_root.is_cancellation_requested());
        // cancellation is only a request
        assert_eq!(grandchild.status(), TaskStatus::Created);
    }

    #[test]
    fn fault_keeps_message() {
        let task = TaskInfo::new("t");
        task.start().unwrap();
        task.fault("boom").unwrap();
        assert_eq!(task.status(), TaskStatus::Faulted);
        assert_eq!(task.message(), "boom");
        assert!(task.completed_at().is_some());
    }

    #[test]
    fn events_reach_subscribers() {
        let root = TaskInfo::new("root");
        let mut events = root.subscribe();
        let child = root.add_child("child").unwrap();
        child.start().unwrap();

        let first = events.try_recv().unwrap();
        assert!(matches!(first.kind, TaskEventKind::ChildAdded(id) if id == child.id()));
        let second = events.try_recv().unwrap();
        assert_eq!(second.task_id, child.id());
        assert!(matches!(second.kind, TaskEventKind::Status(TaskStatus::Running)));
    }

    #[test]
    fn snapshot_is_recursive() {
        let root = TaskInfo::new("root");
        let child = root.add_child("child").unwrap();
        child.set_percentage(20.0).unwrap();
        let snapshot = root.snapshot();
        assert_eq!(snapshot.children.len(), 1);
        assert_eq!(snapshot.children[0].name, "child");
        assert_eq!(snapshot.percentage, 20.0);
    }

    #[test]
    fn settle_maps_outcomes() {
        let task = TaskInfo::new("t");
        task.start().unwrap();
        let outcome: Result<()> = settle(&task, Err(Error::Cancelled));
        assert!(outcome.unwrap_err().is_cancelled());
        assert_eq!(task.status(), TaskStatus::Cancelled);
    }
}

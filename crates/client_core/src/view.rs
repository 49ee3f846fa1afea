use std::fmt;

use shared::domain::TaskId;

use crate::{
    backend::MutationKind,
    controller::{ControllerEvent, TaskListState},
};

pub const HEADER: &str = "My-To-Do";
pub const LOADING_TEXT: &str = "Loading tasks...";
pub const INPUT_PLACEHOLDER: &str = "Add a new task";
pub const ADD_ACTION: &str = "Add Task";

const STRIKE: char = '\u{0336}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    /// Zero-based position in the current snapshot.
    pub index: usize,
    pub id: TaskId,
    pub title: String,
    pub completed: bool,
    pub struck_through: bool,
    pub dimmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskListView {
    Loading,
    Ready { draft: String, rows: Vec<TaskRow> },
}

impl TaskListView {
    pub fn from_state(state: &TaskListState) -> Self {
        if !state.ready {
            return Self::Loading;
        }
        let rows = state
            .tasks
            .iter()
            .enumerate()
            .map(|(index, task)| TaskRow {
                index,
                id: task.id.clone(),
                title: task.title.clone(),
                completed: task.completed,
                struck_through: task.completed,
                dimmed: task.completed,
            })
            .collect();
        Self::Ready {
            draft: state.draft_title.clone(),
            rows,
        }
    }
}

fn strike(text: &str) -> String {
    text.chars().flat_map(|c| [c, STRIKE]).collect()
}

impl fmt::Display for TaskListView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (draft, rows) = match self {
            Self::Loading => return writeln!(f, "{LOADING_TEXT}"),
            Self::Ready { draft, rows } => (draft, rows),
        };

        writeln!(f, "{HEADER}")?;
        if draft.is_empty() {
            writeln!(f, "> ({INPUT_PLACEHOLDER})  [{ADD_ACTION}]")?;
        } else {
            writeln!(f, "> {draft}  [{ADD_ACTION}]")?;
        }
        if rows.is_empty() {
            return writeln!(f, "  (no tasks)");
        }
        for row in rows {
            let mark = if row.completed { 'x' } else { ' ' };
            let title = if row.struck_through {
                strike(&row.title)
            } else {
                row.title.clone()
            };
            writeln!(f, "{:>3}. [{mark}] {title}", row.index + 1)?;
        }
        Ok(())
    }
}

pub fn toast_text(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::MutationFailed { kind, message, .. } => {
            let action = match kind {
                MutationKind::Create => "add task",
                MutationKind::Update => "update task",
                MutationKind::Delete => "delete task",
            };
            format!("Could not {action}: {message}")
        }
        ControllerEvent::SubscriptionFailed { message } => {
            format!("Task list unavailable: {message}")
        }
    }
}

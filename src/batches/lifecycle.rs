//! Batch status transitions.
//!
//! ```text
//! active ──pause──▶ inactive ──resume──▶ active
//! active | inactive ──complete──▶ completed
//! active ──cancel──▶ cancelled
//! ```

use crate::error::{AppError, AppResult};
use crate::types::BatchStatus;
use chrono::{DateTime, Local};

pub const DEFAULT_CANCEL_REASON: &str = "cancelled by operator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAction {
    Complete,
    Cancel { reason: String },
    Pause,
    Resume,
}

impl BatchAction {
    pub fn name(&self) -> &'static str {
        match self {
            BatchAction::Complete => "complete",
            BatchAction::Cancel { .. } => "cancel",
            BatchAction::Pause => "pause",
            BatchAction::Resume => "resume",
        }
    }
}

/// The outcome of a legal transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: BatchStatus,
    /// Set when the batch leaves production.
    pub ends: bool,
    pub note: Option<String>,
}

pub fn transition(
    current: BatchStatus,
    action: &BatchAction,
    at: DateTime<Local>,
) -> AppResult<Transition> {
    let stamp = at.format("%d.%m.%Y %H:%M");
    let next = match (current, action) {
        (BatchStatus::Active | BatchStatus::Inactive, BatchAction::Complete) => Transition {
            status: BatchStatus::Completed,
            ends: true,
            note: None,
        },
        (BatchStatus::Active, BatchAction::Cancel { reason }) => {
            let reason = reason.trim();
            let reason = if reason.is_empty() {
                DEFAULT_CANCEL_REASON
            } else {
                reason
            };
            Transition {
                status: BatchStatus::Cancelled,
                ends: true,
                note: Some(format!("Cancelled: {reason}")),
            }
        }
        (BatchStatus::Active, BatchAction::Pause) => Transition {
            status: BatchStatus::Inactive,
            ends: false,
            note: Some(format!("Paused: {stamp}")),
        },
        (BatchStatus::Inactive, BatchAction::Resume) => Transition {
            status: BatchStatus::Active,
            ends: false,
            note: Some(format!("Resumed: {stamp}")),
        },
        (status, action) => {
            return Err(AppError::Validation(format!(
                "cannot {} a batch that is {status}",
                action.name()
            )))
        }
    };
    Ok(next)
}

/// Notes accumulate one line per event.
pub fn append_note(existing: Option<&str>, note: &str) -> String {
    match existing.map(str::trim_end).filter(|n| !n.is_empty()) {
        Some(notes) => format!("{notes}\n{note}"),
        None => note.to_string(),
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Describes the states of an analysis run and the transitions between them
//!
//! An analysis only moves forward: `waiting-in-queue` to `started` or
//! `running` to a terminal status (`completed`, `error`, `failed`, or
//! `abort`).  Nothing here ever moves an analysis backward on a timer; the
//! only resets are an authorized Terminate and an authorized Re-analyze,
//! and those are handled by the operation entry points.  Soft deletion is
//! orthogonal to status.

use petri_common::api::AnalysisState;
use petri_common::api::Error;

/// What kind of notification a status change calls for
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotificationKind {
    Completed,
    Failed { run_status: &'static str },
}

impl NotificationKind {
    /// The run status named in the notification body
    pub fn run_status(&self) -> &'static str {
        match self {
            NotificationKind::Completed => "completed",
            NotificationKind::Failed { run_status } => run_status,
        }
    }
}

/// Verifies that a reported status change moves the analysis forward
///
/// Re-asserting the current status is always allowed (workers may report
/// the same status more than once).  Terminal statuses accept no further
/// movement, and active statuses never move backward.
pub fn verify_transition(
    from: AnalysisState,
    to: AnalysisState,
) -> Result<(), Error> {
    if from == to {
        return Ok(());
    }
    if from.is_terminal() || to < from {
        return Err(Error::invalid_request(&format!(
            "analysis status cannot change from \"{}\" to \"{}\"",
            from, to
        )));
    }
    Ok(())
}

/// Verifies that the analysis may be terminated in its current status
pub fn verify_terminatable(status: AnalysisState) -> Result<(), Error> {
    if status.is_active() {
        return Ok(());
    }
    Err(Error::invalid_request(&format!(
        "cannot terminate analysis in status \"{}\"",
        status
    )))
}

/// The notification (if any) called for by a committed status change
///
/// Fires exactly on the edge into a terminal status: re-asserting a
/// terminal status produces nothing, so each run notifies at most once.
pub fn status_change_notification(
    from: AnalysisState,
    to: AnalysisState,
) -> Option<NotificationKind> {
    if from == to || !to.is_terminal() {
        return None;
    }
    match to {
        AnalysisState::Completed => Some(NotificationKind::Completed),
        AnalysisState::Abort => {
            Some(NotificationKind::Failed { run_status: "aborted" })
        }
        AnalysisState::Error | AnalysisState::Failed => {
            Some(NotificationKind::Failed { run_status: "failed" })
        }
        _ => None,
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data structures exposed at the edge of the control plane
//!
//! These types cross component boundaries: the authorization engine, the
//! analysis lifecycle, and the queue adapter all speak in terms of them.

mod error;

pub use error::Error;
pub use error::InternalContext;
pub use error::LookupType;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;

/// Result of a create operation for the specified type
pub type CreateResult<T> = Result<T, Error>;
/// Result of a delete operation for the specified type
pub type DeleteResult = Result<(), Error>;
/// Result of a list operation that returns an ObjectStream
pub type ListResultVec<T> = Result<Vec<T>, Error>;
/// Result of a lookup operation for the specified type
pub type LookupResult<T> = Result<T, Error>;
/// Result of an update operation for the specified type
pub type UpdateResult<T> = Result<T, Error>;

/// Identifies a kind of resource subject to authorization and lookup
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum ResourceType {
    Project,
    Sample,
    Analysis,
    AnalysisLog,
    Instance,
    Host,
    User,
    Workflow,
    Genome,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(
            f,
            "{}",
            match self {
                ResourceType::Project => "project",
                ResourceType::Sample => "sample",
                ResourceType::Analysis => "analysis",
                ResourceType::AnalysisLog => "analysis log",
                ResourceType::Instance => "instance",
                ResourceType::Host => "host",
                ResourceType::User => "user",
                ResourceType::Workflow => "workflow",
                ResourceType::Genome => "genome",
            }
        )
    }
}

/// Who can see a Project or Sample without an explicit grant
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn is_public(&self) -> bool {
        matches!(self, Visibility::Public)
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Private
    }
}

/// Level of access conferred by a share grant
///
/// Levels are strictly ordered: `view < edit < admin`.  An action requiring
/// a level is satisfied by any grant at or above it.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    View,
    Edit,
    Admin,
}

impl PermissionLevel {
    pub fn label(&self) -> &'static str {
        match self {
            PermissionLevel::View => "view",
            PermissionLevel::Edit => "edit",
            PermissionLevel::Admin => "admin",
        }
    }
}

impl Display for PermissionLevel {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{}", self.label())
    }
}

impl TryFrom<&str> for PermissionLevel {
    type Error = String;

    fn try_from(variant: &str) -> Result<Self, Self::Error> {
        match variant {
            "view" => Ok(PermissionLevel::View),
            "edit" => Ok(PermissionLevel::Edit),
            "admin" => Ok(PermissionLevel::Admin),
            _ => Err(format!("unexpected permission level {:?}", variant)),
        }
    }
}

/// Runtime status of an Analysis
///
/// An analysis moves forward along `waiting-in-queue -> started/running ->
/// terminal`.  The only edges that reset a running or terminal analysis are
/// an authorized Terminate (to `abort`) and an authorized Re-analyze (back
/// to `waiting-in-queue`); neither ever happens on a timer.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    JsonSchema,
)]
pub enum AnalysisState {
    #[serde(rename = "waiting-in-queue")]
    WaitingInQueue,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "abort")]
    Abort,
}

impl AnalysisState {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisState::WaitingInQueue => "waiting-in-queue",
            AnalysisState::Started => "started",
            AnalysisState::Running => "running",
            AnalysisState::Completed => "completed",
            AnalysisState::Error => "error",
            AnalysisState::Failed => "failed",
            AnalysisState::Abort => "abort",
        }
    }

    /// Returns true if a compute attempt is underway (and may be terminated)
    pub fn is_active(&self) -> bool {
        matches!(self, AnalysisState::Started | AnalysisState::Running)
    }

    /// Returns true for states that end a compute attempt
    ///
    /// Entering a terminal state is the edge that triggers completion and
    /// failure notifications.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisState::Completed
                | AnalysisState::Error
                | AnalysisState::Failed
                | AnalysisState::Abort
        )
    }
}

impl Display for AnalysisState {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{}", self.label())
    }
}

impl TryFrom<&str> for AnalysisState {
    type Error = String;

    fn try_from(variant: &str) -> Result<Self, String> {
        let r = match variant {
            "waiting-in-queue" => AnalysisState::WaitingInQueue,
            "started" => AnalysisState::Started,
            "running" => AnalysisState::Running,
            "completed" => AnalysisState::Completed,
            "error" => AnalysisState::Error,
            "failed" => AnalysisState::Failed,
            "abort" => AnalysisState::Abort,
            _ => return Err(format!("unexpected analysis state {:?}", variant)),
        };
        Ok(r)
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inputs to the authorization rules
//!
//! An [`AccessSnapshot`] is loaded once per decision by the datastore and
//! captures everything the rules may consult.  See the [`crate::authz`]
//! module documentation for why prefetching beats lazy lookup here.

use petri_common::api::Error;
use petri_common::api::PermissionLevel;
use petri_common::api::ResourceType;
use petri_common::api::Visibility;
use uuid::Uuid;

/// The authorization-relevant attributes of the acting user
#[derive(Clone, Copy, Debug)]
pub struct ActorProfile {
    pub id: Uuid,
    pub is_superuser: bool,
    pub is_active: bool,
}

/// The authorization-relevant attributes of the resource being acted on
#[derive(Clone, Debug)]
pub struct ResourceSummary {
    pub resource_type: ResourceType,
    pub id: Uuid,
    /// Ownerless resources deny ownership-based checks.
    pub owner_id: Option<Uuid>,
    pub visibility: Visibility,
    /// Soft-delete marker.  Deleted resources stay addressable by id for
    /// audit but fail every active-state check.
    pub deleted: bool,
}

impl ResourceSummary {
    /// Returns an error as though this resource were not found, suitable
    /// for use when an actor should not be able to see that this resource
    /// exists
    pub fn not_found(&self) -> Error {
        Error::not_found_by_id(self.resource_type, &self.id)
    }
}

/// The actor's standing on one active Project containing the resource
#[derive(Clone, Copy, Debug)]
pub struct ProjectStanding {
    pub project_id: Uuid,
    /// the actor owns this project
    pub owned: bool,
    /// the actor's direct grant level on this project, if any
    pub level: Option<PermissionLevel>,
    /// the project is publicly visible
    pub public: bool,
}

impl ProjectStanding {
    /// Returns whether this standing satisfies the given required level,
    /// ignoring public visibility
    pub fn satisfies(&self, required: PermissionLevel) -> bool {
        self.owned || self.level.map_or(false, |level| level >= required)
    }
}

/// Everything the authorization rules may consult for one decision
///
/// The fields are loaded together, against one consistent view of the
/// world, before any rule runs.
#[derive(Clone, Debug)]
pub struct AccessSnapshot {
    pub actor: ActorProfile,
    pub resource: ResourceSummary,
    /// The actor's direct grant level on the resource itself, if any.
    /// Grants made to the actor's email address before they registered
    /// count here too.
    pub direct_level: Option<PermissionLevel>,
    /// For Samples and Analyses: the actor's standing on every active
    /// Project containing the resource.  Empty for Projects.
    pub containing_projects: Vec<ProjectStanding>,
    /// For Projects: whether the actor owns or holds a grant on at least
    /// one active Sample or Analysis inside the project.  Always false for
    /// other resource types.
    pub reaches_contained: bool,
}

impl AccessSnapshot {
    /// Returns a snapshot for an actor with no relationship at all to the
    /// resource (no ownership, no grants, no project path)
    pub fn unrelated(
        actor: ActorProfile,
        resource: ResourceSummary,
    ) -> AccessSnapshot {
        AccessSnapshot {
            actor,
            resource,
            direct_level: None,
            containing_projects: Vec::new(),
            reaches_contained: false,
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Authorization subsystem
//!
//! ## Authorization basics
//!
//! An *actor* can perform an *action* on a *resource* (a Project, Sample, or
//! Analysis) if one of a small, ordered set of *rules* allows it.  Each rule
//! is an independent predicate over a `(snapshot, action)` pair that returns
//! either "allow" or "abstain"; the first rule that allows wins, and if
//! every rule abstains the action is denied.  The rules, in order:
//!
//! 1. **owner** — the actor owns the resource.  Owners can do anything to
//!    their own resources, regardless of any grant state.
//! 2. **direct grant** — the actor holds an explicit share grant on the
//!    resource at or above the level the action requires (`view` for read,
//!    `edit` for modify, `admin` for delete and share).
//! 3. **project inherited** — for Samples and Analyses, the actor owns or
//!    holds a sufficient grant on *any* active Project containing the
//!    resource.  For read access, a public containing Project also
//!    suffices.  Sharing happens at the leaf level but access flows down
//!    from projects.
//! 4. **project contents** — for Projects, a non-owner may still read a
//!    Project's aggregate data if the Project is public or if they own or
//!    were granted access to at least one Sample or Analysis inside it.
//!    Sharing happens at the leaf level but the UI still needs to render
//!    the parent project.
//!
//! Superusers bypass the rules entirely.
//!
//! Later rules are strictly broader than earlier ones, so the ordering only
//! affects short-circuit performance, never the outcome.
//!
//! ## Snapshots
//!
//! The rules themselves are synchronous and pure.  Before evaluating them,
//! the caller loads an [`AccessSnapshot`] capturing everything the rules
//! might consult: the actor's flags, the resource's summary (owner,
//! visibility, soft-delete marker), the actor's direct grant level, the
//! actor's standing on every active Project containing the resource, and
//! (for Projects) whether the actor can reach any contained Sample or
//! Analysis.  Loading everything up front keeps the decision consistent
//! with a single read of the world and keeps the datastore out of the
//! decision logic.  This mirrors the usual prefetch-then-decide split: the
//! alternative of querying lazily from inside each rule would issue more
//! lookups, not fewer, and would force the rules to be async.
//!
//! ## Failure modes
//!
//! Denied reads degrade to `ObjectNotFound` so that actors cannot probe for
//! the existence of resources they cannot see.  Denied writes raise
//! `Forbidden` — unless the actor cannot even read the resource, in which
//! case the write also degrades to `ObjectNotFound` for the same reason.
//!
//! ## Create, move, and copy
//!
//! Create actions have no resource to snapshot; they validate the *target*
//! projects and samples named in the request payload instead.  See the
//! [`payload`] module for those checks and for move/copy detection.

mod payload;
mod rules;
mod snapshot;

pub use payload::can_add_sample;
pub use payload::can_analyze;
pub use payload::CreateTarget;
pub use payload::ProjectSetChange;
pub use rules::Decision;
pub use snapshot::AccessSnapshot;
pub use snapshot::ActorProfile;
pub use snapshot::ProjectStanding;
pub use snapshot::ResourceSummary;

use petri_common::api::Error;
use petri_common::api::PermissionLevel;
use slog::trace;

/// Actions that can be authorized against a resource
///
/// Actions map directly to the permission level they require; the mapping
/// lives in [`Action::required_level()`] and is checked through the same
/// rule set for every resource variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Read,
    Modify,
    Delete,
    Share,
}

impl Action {
    /// The minimum grant level that satisfies this action
    pub fn required_level(&self) -> PermissionLevel {
        match self {
            Action::Read => PermissionLevel::View,
            Action::Modify => PermissionLevel::Edit,
            Action::Delete => PermissionLevel::Admin,
            Action::Share => PermissionLevel::Admin,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Action::Read)
    }
}

/// Authorization decision engine
///
/// Construct one of these at startup and use [`Authz::authorize()`] with a
/// freshly loaded [`AccessSnapshot`] for every decision.
pub struct Authz {
    log: slog::Logger,
}

impl Authz {
    pub fn new(log: &slog::Logger) -> Authz {
        Authz { log: log.new(slog::o!("component" => "authz")) }
    }

    /// Returns whether `action` is allowed for the snapshot's actor, with no
    /// side effects and no error mapping
    pub fn is_allowed(
        &self,
        snapshot: &AccessSnapshot,
        action: Action,
    ) -> bool {
        if snapshot.actor.is_superuser {
            return true;
        }
        rules::evaluate(snapshot, action).is_some()
    }

    /// Checks whether the snapshot's actor may perform `action`, mapping
    /// denials as described in the module documentation
    pub fn authorize(
        &self,
        snapshot: &AccessSnapshot,
        action: Action,
    ) -> Result<(), Error> {
        if snapshot.actor.is_superuser {
            return Ok(());
        }

        // Soft-deleted resources are invisible to reads.  Write paths check
        // the soft-delete marker themselves so that they can produce a more
        // specific message.
        if snapshot.resource.deleted && action.is_read() {
            return Err(snapshot.resource.not_found());
        }

        if let Some(rule) = rules::evaluate(snapshot, action) {
            trace!(self.log, "authorize: allowed";
                "actor_id" => snapshot.actor.id.to_string(),
                "resource_type" => snapshot.resource.resource_type.to_string(),
                "resource_id" => snapshot.resource.id.to_string(),
                "action" => ?action,
                "rule" => rule,
            );
            return Ok(());
        }

        if action.is_read() {
            return Err(snapshot.resource.not_found());
        }

        // If the actor failed an authz check and they can't even read this
        // resource, produce a 404 rather than a 403.
        if rules::evaluate(snapshot, Action::Read).is_none() {
            return Err(snapshot.resource.not_found());
        }
        Err(Error::Forbidden)
    }
}

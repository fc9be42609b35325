// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authorization checks that validate a request payload rather than an
//! existing resource
//!
//! Create actions have no resource yet, so they are checked against the
//! *target* projects and samples named in the request.  Move/copy detection
//! compares the resource's current project set against the requested one.
//! The caller resolves each named id to the actor's standing (via the same
//! snapshot machinery used for per-resource checks) and hands the pure
//! inputs to these functions.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use uuid::Uuid;

/// The actor's standing on the projects and samples named by a create
/// request
#[derive(Clone, Debug, Default)]
pub struct CreateTarget {
    /// named project id -> actor can edit it
    pub project_edit: BTreeMap<Uuid, bool>,
    /// named sample id -> actor can edit it
    pub sample_edit: BTreeMap<Uuid, bool>,
    /// named sample id -> active projects containing it
    pub sample_projects: BTreeMap<Uuid, BTreeSet<Uuid>>,
}

/// Whether the actor may create an analysis landing in the named projects
///
/// The actor must be able to edit every named project, UNLESS the actor can
/// edit every named sample AND every project the actor cannot edit contains
/// at least one of those samples.  This lets a user with only sample-level
/// edit access create an analysis that lands in a project they do not own,
/// provided the analysis is anchored by samples they already have rights
/// to.
pub fn can_analyze(target: &CreateTarget) -> bool {
    let no_auth_projects: Vec<Uuid> = target
        .project_edit
        .iter()
        .filter(|(_, can_edit)| !**can_edit)
        .map(|(id, _)| *id)
        .collect();
    if no_auth_projects.is_empty() {
        return true;
    }

    // First check that the actor has edit on each named sample.
    if target.sample_edit.is_empty()
        || target.sample_edit.values().any(|can_edit| !can_edit)
    {
        return false;
    }

    // Now check that each unauthorized project is the project of at least
    // one of the named samples.
    let sample_project_ids: BTreeSet<Uuid> = target
        .sample_projects
        .values()
        .flat_map(|projects| projects.iter().copied())
        .collect();
    no_auth_projects
        .iter()
        .all(|project_id| sample_project_ids.contains(project_id))
}

/// Whether the actor may create a sample in the named projects: edit access
/// is required on every one of them
pub fn can_add_sample(project_edit: &BTreeMap<Uuid, bool>) -> bool {
    project_edit.values().all(|can_edit| *can_edit)
}

/// Describes a requested change to a resource's project membership
///
/// `remove_directive`/`add_directive` are the explicit "move out of project
/// X"/"move into project Y" parameters a client may pass alongside the full
/// requested set.
#[derive(Clone, Debug)]
pub struct ProjectSetChange {
    /// the resource's current active project set
    pub current: BTreeSet<Uuid>,
    /// the full project set named in the update request
    pub requested: BTreeSet<Uuid>,
    pub remove_directive: Option<Uuid>,
    pub add_directive: Option<Uuid>,
}

impl ProjectSetChange {
    /// The projects the resource would newly join: requested-minus-current,
    /// plus any explicit add directive
    pub fn added(&self) -> BTreeSet<Uuid> {
        let mut added: BTreeSet<Uuid> =
            self.requested.difference(&self.current).copied().collect();
        if let Some(project_id) = self.add_directive {
            if !self.current.contains(&project_id) {
                added.insert(project_id);
            }
        }
        added
    }

    /// Whether this update is a move or copy at all
    ///
    /// A no-op update (identical set, no directives) is never treated as a
    /// move and must not require the stricter admin check.
    pub fn is_move_or_copy(&self) -> bool {
        self.remove_directive.is_some()
            || self.add_directive.is_some()
            || !self.added().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::can_add_sample;
    use super::can_analyze;
    use super::CreateTarget;
    use super::ProjectSetChange;
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    #[test]
    fn test_can_analyze_with_full_project_access() {
        let project = Uuid::new_v4();
        let target = CreateTarget {
            project_edit: BTreeMap::from([(project, true)]),
            ..Default::default()
        };
        assert!(can_analyze(&target));
    }

    #[test]
    fn test_can_analyze_denied_without_anchor_sample() {
        // The actor owns Sample S in Project P but cannot edit P.  Naming P
        // alone is denied; naming P and S is allowed because the sample
        // anchors the project.
        let project = Uuid::new_v4();
        let sample = Uuid::new_v4();

        let project_only = CreateTarget {
            project_edit: BTreeMap::from([(project, false)]),
            ..Default::default()
        };
        assert!(!can_analyze(&project_only));

        let with_sample = CreateTarget {
            project_edit: BTreeMap::from([(project, false)]),
            sample_edit: BTreeMap::from([(sample, true)]),
            sample_projects: BTreeMap::from([(
                sample,
                BTreeSet::from([project]),
            )]),
        };
        assert!(can_analyze(&with_sample));
    }

    #[test]
    fn test_can_analyze_denied_when_sample_not_editable() {
        let project = Uuid::new_v4();
        let sample = Uuid::new_v4();
        let target = CreateTarget {
            project_edit: BTreeMap::from([(project, false)]),
            sample_edit: BTreeMap::from([(sample, false)]),
            sample_projects: BTreeMap::from([(
                sample,
                BTreeSet::from([project]),
            )]),
        };
        assert!(!can_analyze(&target));
    }

    #[test]
    fn test_can_analyze_denied_when_project_not_anchored() {
        // Two unauthorized projects, but the named sample only lives in one
        // of them.
        let anchored = Uuid::new_v4();
        let unanchored = Uuid::new_v4();
        let sample = Uuid::new_v4();
        let target = CreateTarget {
            project_edit: BTreeMap::from([
                (anchored, false),
                (unanchored, false),
            ]),
            sample_edit: BTreeMap::from([(sample, true)]),
            sample_projects: BTreeMap::from([(
                sample,
                BTreeSet::from([anchored]),
            )]),
        };
        assert!(!can_analyze(&target));
    }

    #[test]
    fn test_can_add_sample() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        assert!(can_add_sample(&BTreeMap::from([(p1, true), (p2, true)])));
        assert!(!can_add_sample(&BTreeMap::from([(p1, true), (p2, false)])));
        // No named projects means nothing to refuse.
        assert!(can_add_sample(&BTreeMap::new()));
    }

    #[test]
    fn test_noop_update_is_not_a_move() {
        let p1 = Uuid::new_v4();
        let change = ProjectSetChange {
            current: BTreeSet::from([p1]),
            requested: BTreeSet::from([p1]),
            remove_directive: None,
            add_directive: None,
        };
        assert!(!change.is_move_or_copy());
        assert!(change.added().is_empty());
    }

    #[test]
    fn test_added_projects_detected() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let change = ProjectSetChange {
            current: BTreeSet::from([p1]),
            requested: BTreeSet::from([p1, p2]),
            remove_directive: None,
            add_directive: None,
        };
        assert!(change.is_move_or_copy());
        assert_eq!(change.added(), BTreeSet::from([p2]));
    }

    #[test]
    fn test_directives_force_move_detection() {
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        let change = ProjectSetChange {
            current: BTreeSet::from([p1]),
            requested: BTreeSet::from([p1]),
            remove_directive: Some(p1),
            add_directive: Some(p2),
        };
        assert!(change.is_move_or_copy());
        assert_eq!(change.added(), BTreeSet::from([p2]));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The ordered rule set behind every authorization decision
//!
//! Each rule is a pure function over `(snapshot, action)`.  Rules never
//! deny; they allow or abstain, and [`evaluate`] combines them by "first
//! allow wins, else deny".  Keeping the rules independent makes each one
//! testable on its own and keeps the precedence explicit in one place.

use super::snapshot::AccessSnapshot;
use super::Action;
use petri_common::api::ResourceType;

/// The outcome of one rule for one decision
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    Allow,
    Abstain,
}

type Rule = fn(&AccessSnapshot, Action) -> Decision;

/// The rules, in evaluation order.  See the module documentation in
/// [`crate::authz`] for what each one means.
const RULES: &[(&str, Rule)] = &[
    ("owner", rule_owner),
    ("direct-grant", rule_direct_grant),
    ("project-inherited", rule_project_inherited),
    ("project-contents", rule_project_contents),
];

/// Runs the rules in order and returns the name of the first rule that
/// allows, or `None` if every rule abstained
pub fn evaluate(
    snapshot: &AccessSnapshot,
    action: Action,
) -> Option<&'static str> {
    RULES.iter().find_map(|(name, rule)| {
        match rule(snapshot, action) {
            Decision::Allow => Some(*name),
            Decision::Abstain => None,
        }
    })
}

/// The actor owns the resource.
fn rule_owner(snapshot: &AccessSnapshot, _action: Action) -> Decision {
    match snapshot.resource.owner_id {
        Some(owner_id) if owner_id == snapshot.actor.id => Decision::Allow,
        _ => Decision::Abstain,
    }
}

/// The actor holds a direct grant at or above the required level.
fn rule_direct_grant(snapshot: &AccessSnapshot, action: Action) -> Decision {
    match snapshot.direct_level {
        Some(level) if level >= action.required_level() => Decision::Allow,
        _ => Decision::Abstain,
    }
}

/// For leaf resources (Samples and Analyses): the actor owns or holds a
/// sufficient grant on some active containing Project, or — for reads —
/// some containing Project is public.
fn rule_project_inherited(
    snapshot: &AccessSnapshot,
    action: Action,
) -> Decision {
    if snapshot.resource.resource_type == ResourceType::Project {
        return Decision::Abstain;
    }
    let required = action.required_level();
    let allowed = snapshot.containing_projects.iter().any(|standing| {
        standing.satisfies(required) || (action.is_read() && standing.public)
    });
    if allowed {
        Decision::Allow
    } else {
        Decision::Abstain
    }
}

/// For Projects: a non-owner may read a public Project, or a Project in
/// which they can reach at least one Sample or Analysis.
fn rule_project_contents(
    snapshot: &AccessSnapshot,
    action: Action,
) -> Decision {
    if snapshot.resource.resource_type != ResourceType::Project
        || !action.is_read()
    {
        return Decision::Abstain;
    }
    if snapshot.resource.visibility.is_public() || snapshot.reaches_contained
    {
        Decision::Allow
    } else {
        Decision::Abstain
    }
}

#[cfg(test)]
mod test {
    use super::super::AccessSnapshot;
    use super::super::Action;
    use super::super::ActorProfile;
    use super::super::Authz;
    use super::super::ProjectStanding;
    use super::super::ResourceSummary;
    use super::evaluate;
    use petri_common::api::Error;
    use petri_common::api::PermissionLevel;
    use petri_common::api::ResourceType;
    use petri_common::api::Visibility;
    use uuid::Uuid;

    fn make_actor() -> ActorProfile {
        ActorProfile {
            id: Uuid::new_v4(),
            is_superuser: false,
            is_active: true,
        }
    }

    fn make_resource(resource_type: ResourceType) -> ResourceSummary {
        ResourceSummary {
            resource_type,
            id: Uuid::new_v4(),
            owner_id: Some(Uuid::new_v4()),
            visibility: Visibility::Private,
            deleted: false,
        }
    }

    fn authz() -> Authz {
        Authz::new(&slog::Logger::root(slog::Discard, slog::o!()))
    }

    #[test]
    fn test_owner_always_allowed() {
        let actor = make_actor();
        let mut resource = make_resource(ResourceType::Analysis);
        resource.owner_id = Some(actor.id);
        let snapshot = AccessSnapshot::unrelated(actor, resource);
        for action in
            [Action::Read, Action::Modify, Action::Delete, Action::Share]
        {
            assert_eq!(evaluate(&snapshot, action), Some("owner"));
        }
    }

    #[test]
    fn test_ownerless_resource_denies_ownership() {
        let actor = make_actor();
        let mut resource = make_resource(ResourceType::Sample);
        resource.owner_id = None;
        let snapshot = AccessSnapshot::unrelated(actor, resource);
        assert_eq!(evaluate(&snapshot, Action::Read), None);
    }

    #[test]
    fn test_unrelated_actor_denied_and_read_degrades_to_not_found() {
        let snapshot = AccessSnapshot::unrelated(
            make_actor(),
            make_resource(ResourceType::Analysis),
        );
        assert_eq!(evaluate(&snapshot, Action::Read), None);
        assert!(matches!(
            authz().authorize(&snapshot, Action::Read),
            Err(Error::ObjectNotFound { .. })
        ));
        // A write denial for an unreadable resource also degrades to
        // not-found rather than leaking existence.
        assert!(matches!(
            authz().authorize(&snapshot, Action::Modify),
            Err(Error::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_direct_grant_levels() {
        let actor = make_actor();
        let resource = make_resource(ResourceType::Analysis);
        let mut snapshot = AccessSnapshot::unrelated(actor, resource);

        snapshot.direct_level = Some(PermissionLevel::View);
        assert_eq!(evaluate(&snapshot, Action::Read), Some("direct-grant"));
        assert_eq!(evaluate(&snapshot, Action::Modify), None);

        snapshot.direct_level = Some(PermissionLevel::Edit);
        assert_eq!(evaluate(&snapshot, Action::Modify), Some("direct-grant"));
        assert_eq!(evaluate(&snapshot, Action::Delete), None);
        assert_eq!(evaluate(&snapshot, Action::Share), None);

        snapshot.direct_level = Some(PermissionLevel::Admin);
        assert_eq!(evaluate(&snapshot, Action::Delete), Some("direct-grant"));
        assert_eq!(evaluate(&snapshot, Action::Share), Some("direct-grant"));
    }

    #[test]
    fn test_viewer_write_denial_is_forbidden() {
        // A viewer can read, so a denied write must surface Forbidden, not
        // not-found.
        let mut snapshot = AccessSnapshot::unrelated(
            make_actor(),
            make_resource(ResourceType::Analysis),
        );
        snapshot.direct_level = Some(PermissionLevel::View);
        assert!(matches!(
            authz().authorize(&snapshot, Action::Modify),
            Err(Error::Forbidden)
        ));
    }

    #[test]
    fn test_project_inherited_grant() {
        let actor = make_actor();
        let resource = make_resource(ResourceType::Sample);
        let mut snapshot = AccessSnapshot::unrelated(actor, resource);
        snapshot.containing_projects = vec![ProjectStanding {
            project_id: Uuid::new_v4(),
            owned: false,
            level: Some(PermissionLevel::Edit),
            public: false,
        }];
        assert_eq!(
            evaluate(&snapshot, Action::Modify),
            Some("project-inherited")
        );
        assert_eq!(evaluate(&snapshot, Action::Delete), None);
    }

    #[test]
    fn test_public_project_grants_read_only() {
        let actor = make_actor();
        let resource = make_resource(ResourceType::Sample);
        let mut snapshot = AccessSnapshot::unrelated(actor, resource);
        snapshot.containing_projects = vec![ProjectStanding {
            project_id: Uuid::new_v4(),
            owned: false,
            level: None,
            public: true,
        }];
        assert_eq!(
            evaluate(&snapshot, Action::Read),
            Some("project-inherited")
        );
        assert_eq!(evaluate(&snapshot, Action::Modify), None);
    }

    #[test]
    fn test_project_readable_through_contents() {
        let actor = make_actor();
        let resource = make_resource(ResourceType::Project);
        let mut snapshot = AccessSnapshot::unrelated(actor, resource);
        snapshot.reaches_contained = true;
        assert_eq!(
            evaluate(&snapshot, Action::Read),
            Some("project-contents")
        );
        // Reaching a leaf never confers write access on the parent.
        assert_eq!(evaluate(&snapshot, Action::Modify), None);
    }

    #[test]
    fn test_public_project_readable() {
        let actor = make_actor();
        let mut resource = make_resource(ResourceType::Project);
        resource.visibility = Visibility::Public;
        let snapshot = AccessSnapshot::unrelated(actor, resource);
        assert_eq!(
            evaluate(&snapshot, Action::Read),
            Some("project-contents")
        );
    }

    #[test]
    fn test_superuser_bypasses_rules() {
        let mut actor = make_actor();
        actor.is_superuser = true;
        let snapshot = AccessSnapshot::unrelated(
            actor,
            make_resource(ResourceType::Project),
        );
        let authz = authz();
        for action in
            [Action::Read, Action::Modify, Action::Delete, Action::Share]
        {
            assert!(authz.authorize(&snapshot, action).is_ok());
        }
    }

    #[test]
    fn test_deleted_resource_read_is_not_found() {
        let actor = make_actor();
        let mut resource = make_resource(ResourceType::Analysis);
        resource.owner_id = Some(actor.id);
        resource.deleted = true;
        let snapshot = AccessSnapshot::unrelated(actor, resource);
        assert!(matches!(
            authz().authorize(&snapshot, Action::Read),
            Err(Error::ObjectNotFound { .. })
        ));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory datastore
//!
//! All records live behind one mutex.  Compound read-decide-write sequences
//! (submit, terminate, move/copy, bulk share diff) run under a single lock
//! acquisition, via [`DataStore::analysis_update_with`] and the share
//! registry methods, so decisions and mutations see one snapshot of the
//! world.
//!
//! Resource-graph queries filter soft-deleted records and return empty
//! collections for absent inputs; only direct fetches by id produce
//! `ObjectNotFound`.

use chrono::Utc;
use petri_auth::authz::AccessSnapshot;
use petri_auth::authz::ActorProfile;
use petri_auth::authz::ProjectStanding;
use petri_common::api::Error;
use petri_common::api::LookupResult;
use petri_common::api::LookupType;
use petri_common::api::PermissionLevel;
use petri_common::api::ResourceType;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use uuid::Uuid;

use super::model::deep_merge;
use super::model::Analysis;
use super::model::AnalysisLog;
use super::model::Host;
use super::model::HostMembership;
use super::model::HostRole;
use super::model::Instance;
use super::model::Project;
use super::model::Sample;
use super::model::User;

/// Identifies one share grant
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) struct GrantKey {
    /// a user id rendered as a string, or an email for not-yet-registered
    /// grantees
    pub(crate) grantee: String,
    pub(crate) resource_type: ResourceType,
    pub(crate) resource_id: Uuid,
}

#[derive(Default)]
pub(crate) struct Inner {
    pub(crate) users: BTreeMap<Uuid, User>,
    pub(crate) projects: BTreeMap<Uuid, Project>,
    pub(crate) samples: BTreeMap<Uuid, Sample>,
    pub(crate) analyses: BTreeMap<Uuid, Analysis>,
    pub(crate) logs: BTreeMap<Uuid, AnalysisLog>,
    pub(crate) instances: BTreeMap<Uuid, Instance>,
    pub(crate) hosts: BTreeMap<Uuid, Host>,
    pub(crate) memberships: Vec<HostMembership>,
    pub(crate) grants: BTreeMap<GrantKey, PermissionLevel>,
}

impl Inner {
    /// The keys under which the given user may hold grants: their id, plus
    /// their email for grants made before they registered
    pub(crate) fn grantee_keys(&self, user_id: Uuid) -> Vec<String> {
        let mut keys = vec![user_id.to_string()];
        if let Some(user) = self.users.get(&user_id) {
            keys.push(user.email.clone());
        }
        keys
    }

    /// The highest grant level held under any of `keys` on the resource
    pub(crate) fn grant_level(
        &self,
        keys: &[String],
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Option<PermissionLevel> {
        keys.iter()
            .filter_map(|grantee| {
                self.grants
                    .get(&GrantKey {
                        grantee: grantee.clone(),
                        resource_type,
                        resource_id,
                    })
                    .copied()
            })
            .max()
    }

    /// The resource's owner, or `None` if the resource does not exist
    pub(crate) fn resource_owner(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Option<Option<Uuid>> {
        match resource_type {
            ResourceType::Project => {
                self.projects.get(&resource_id).map(|p| p.owner_id)
            }
            ResourceType::Sample => {
                self.samples.get(&resource_id).map(|s| s.owner_id)
            }
            ResourceType::Analysis => {
                self.analyses.get(&resource_id).map(|a| a.owner_id)
            }
            _ => None,
        }
    }

    pub(crate) fn shared_with_mut(
        &mut self,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Option<&mut Vec<super::model::SharedWithEntry>> {
        match resource_type {
            ResourceType::Project => {
                self.projects.get_mut(&resource_id).map(|p| &mut p.shared_with)
            }
            ResourceType::Sample => {
                self.samples.get_mut(&resource_id).map(|s| &mut s.shared_with)
            }
            ResourceType::Analysis => {
                self.analyses.get_mut(&resource_id).map(|a| &mut a.shared_with)
            }
            _ => None,
        }
    }

    /// Whether the actor owns or holds a grant on any active sample or
    /// analysis inside the project
    fn reaches_contents(&self, actor_keys: &[String], actor_id: Uuid, project_id: Uuid) -> bool {
        let reaches_sample = self.samples.values().any(|sample| {
            sample.deleted_on.is_none()
                && sample.project_ids.contains(&project_id)
                && (sample.owner_id == Some(actor_id)
                    || self
                        .grant_level(actor_keys, ResourceType::Sample, sample.id)
                        .is_some())
        });
        if reaches_sample {
            return true;
        }
        self.analyses.values().any(|analysis| {
            analysis.deleted_on.is_none()
                && analysis.project_ids.contains(&project_id)
                && (analysis.owner_id == Some(actor_id)
                    || self
                        .grant_level(
                            actor_keys,
                            ResourceType::Analysis,
                            analysis.id,
                        )
                        .is_some())
        })
    }
}

pub struct DataStore {
    inner: Mutex<Inner>,
}

impl DataStore {
    pub fn new() -> DataStore {
        DataStore { inner: Mutex::new(Inner::default()) }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    // Users

    pub fn user_create(&self, user: User) -> User {
        self.lock().users.insert(user.id, user.clone());
        user
    }

    pub fn user_fetch(&self, user_id: Uuid) -> LookupResult<User> {
        self.lock()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| Error::not_found_by_id(ResourceType::User, &user_id))
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        self.lock()
            .users
            .values()
            .find(|user| user.email == email && user.deleted_on.is_none())
            .cloned()
    }

    pub fn user_set_active_project(&self, user_id: Uuid, project_id: Uuid) {
        if let Some(user) = self.lock().users.get_mut(&user_id) {
            user.active_project = Some(project_id);
        }
    }

    /// Loads the authorization-relevant attributes of the acting user
    pub fn actor_profile(&self, user_id: Uuid) -> LookupResult<ActorProfile> {
        let user = self.user_fetch(user_id)?;
        if user.deleted_on.is_some() {
            return Err(Error::not_found_by_id(ResourceType::User, &user_id));
        }
        if !user.is_active {
            return Err(Error::Forbidden);
        }
        Ok(user.profile())
    }

    // Projects

    pub fn project_create(&self, project: Project) -> Project {
        self.lock().projects.insert(project.id, project.clone());
        project
    }

    pub fn project_fetch(&self, project_id: Uuid) -> LookupResult<Project> {
        self.lock().projects.get(&project_id).cloned().ok_or_else(|| {
            Error::not_found_by_id(ResourceType::Project, &project_id)
        })
    }

    // Samples

    pub fn sample_create(&self, sample: Sample) -> Sample {
        self.lock().samples.insert(sample.id, sample.clone());
        sample
    }

    pub fn sample_fetch(&self, sample_id: Uuid) -> LookupResult<Sample> {
        self.lock().samples.get(&sample_id).cloned().ok_or_else(|| {
            Error::not_found_by_id(ResourceType::Sample, &sample_id)
        })
    }

    // Hosts

    pub fn host_create(&self, host: Host) -> Host {
        self.lock().hosts.insert(host.id, host.clone());
        host
    }

    pub fn host_fetch(&self, host_id: Uuid) -> LookupResult<Host> {
        self.lock()
            .hosts
            .get(&host_id)
            .cloned()
            .ok_or_else(|| Error::not_found_by_id(ResourceType::Host, &host_id))
    }

    pub fn host_for_domain(&self, domain: &str) -> Option<Host> {
        self.lock().hosts.values().find(|h| h.domain == domain).cloned()
    }

    pub fn host_membership_add(&self, membership: HostMembership) {
        self.lock().memberships.push(membership);
    }

    /// The host of the user's most recent membership, used when the request
    /// domain resolves no host
    pub fn default_host_for_user(&self, user_id: Uuid) -> Option<Host> {
        let inner = self.lock();
        inner
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .max_by_key(|m| m.time_created)
            .and_then(|m| inner.hosts.get(&m.host_id))
            .cloned()
    }

    /// Active managers of the given host
    pub fn host_managers(&self, host_id: Uuid) -> Vec<User> {
        let inner = self.lock();
        inner
            .memberships
            .iter()
            .filter(|m| m.host_id == host_id && m.role == HostRole::Manager)
            .filter_map(|m| inner.users.get(&m.user_id))
            .filter(|user| user.deleted_on.is_none() && user.is_active)
            .cloned()
            .collect()
    }

    // Analyses

    pub fn analysis_insert(&self, analysis: Analysis) -> Analysis {
        self.lock().analyses.insert(analysis.id, analysis.clone());
        analysis
    }

    pub fn analysis_fetch(&self, analysis_id: Uuid) -> LookupResult<Analysis> {
        self.lock().analyses.get(&analysis_id).cloned().ok_or_else(|| {
            Error::not_found_by_id(ResourceType::Analysis, &analysis_id)
        })
    }

    /// The most recent active analysis for the genome owned by `owner_id`
    pub fn analysis_by_genome(
        &self,
        genome_id: Uuid,
        owner_id: Uuid,
    ) -> Option<Analysis> {
        self.lock()
            .analyses
            .values()
            .filter(|a| {
                a.genome_id == Some(genome_id)
                    && a.owner_id == Some(owner_id)
                    && a.deleted_on.is_none()
            })
            .max_by_key(|a| a.time_created)
            .cloned()
    }

    /// Runs `mutate` against the analysis under the datastore lock, so the
    /// read-decide-write sequence sees one consistent snapshot
    pub fn analysis_update_with<T>(
        &self,
        analysis_id: Uuid,
        mutate: impl FnOnce(&mut Analysis) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut inner = self.lock();
        let analysis = inner.analyses.get_mut(&analysis_id).ok_or_else(|| {
            Error::not_found_by_id(ResourceType::Analysis, &analysis_id)
        })?;
        mutate(analysis)
    }

    // Analysis logs

    pub fn log_create(&self, log: AnalysisLog) {
        self.lock().logs.insert(log.analysis_id, log);
    }

    pub fn log_fetch(&self, analysis_id: Uuid) -> Option<AnalysisLog> {
        self.lock().logs.get(&analysis_id).cloned()
    }

    /// Deep-merges `fragment` into the analysis log and returns the merged
    /// document
    pub fn log_merge(
        &self,
        analysis_id: Uuid,
        fragment: &Value,
    ) -> Result<Value, Error> {
        let mut inner = self.lock();
        let log = inner.logs.get_mut(&analysis_id).ok_or_else(|| {
            Error::invalid_request(&format!(
                "no log found for analysis {}",
                analysis_id
            ))
        })?;
        deep_merge(&mut log.log, fragment);
        log.time_modified = Utc::now();
        Ok(log.log.clone())
    }

    pub fn log_reset(&self, analysis_id: Uuid) {
        let mut inner = self.lock();
        if let Some(log) = inner.logs.get_mut(&analysis_id) {
            *log = AnalysisLog::initial(analysis_id, Utc::now());
        }
    }

    pub fn log_delete(&self, analysis_id: Uuid) {
        self.lock().logs.remove(&analysis_id);
    }

    // Instances

    /// Opens a compute-attempt record, called when a start or restart
    /// dispatch is accepted by the queue
    pub fn instance_open(
        &self,
        analysis_id: Uuid,
        instance_type: &str,
    ) -> Instance {
        let instance = Instance {
            id: Uuid::new_v4(),
            analysis_id,
            instance_type: instance_type.to_string(),
            requested_on: Utc::now(),
            ready_on: None,
            terminated_on: None,
        };
        self.lock().instances.insert(instance.id, instance.clone());
        instance
    }

    pub fn instance_mark_ready(&self, analysis_id: Uuid) {
        let mut inner = self.lock();
        for instance in inner.instances.values_mut() {
            if instance.analysis_id == analysis_id && instance.is_open() {
                instance.ready_on = Some(Utc::now());
            }
        }
    }

    /// Closes any open compute-attempt records for the analysis
    pub fn instance_close(&self, analysis_id: Uuid) {
        let mut inner = self.lock();
        for instance in inner.instances.values_mut() {
            if instance.analysis_id == analysis_id && instance.is_open() {
                instance.terminated_on = Some(Utc::now());
            }
        }
    }

    pub fn instance_open_for(&self, analysis_id: Uuid) -> Option<Instance> {
        self.lock()
            .instances
            .values()
            .find(|i| i.analysis_id == analysis_id && i.is_open())
            .cloned()
    }

    pub fn instances_for(&self, analysis_id: Uuid) -> Vec<Instance> {
        self.lock()
            .instances
            .values()
            .filter(|i| i.analysis_id == analysis_id)
            .cloned()
            .collect()
    }

    // Resource-graph queries

    /// The owner of the resource; `None` both for absent resources and for
    /// ownerless ones
    pub fn owner_of(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Option<Uuid> {
        self.lock().resource_owner(resource_type, resource_id).flatten()
    }

    /// The user's active (not soft-deleted) owned projects
    pub fn active_projects_of(&self, user_id: Uuid) -> Vec<Project> {
        self.lock()
            .projects
            .values()
            .filter(|p| p.owner_id == Some(user_id) && p.deleted_on.is_none())
            .cloned()
            .collect()
    }

    /// The active projects containing the given sample or analysis
    pub fn projects_containing(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Vec<Project> {
        let inner = self.lock();
        let project_ids = match resource_type {
            ResourceType::Sample => inner
                .samples
                .get(&resource_id)
                .map(|s| s.project_ids.clone()),
            ResourceType::Analysis => inner
                .analyses
                .get(&resource_id)
                .map(|a| a.project_ids.clone()),
            _ => None,
        };
        project_ids
            .unwrap_or_default()
            .iter()
            .filter_map(|project_id| inner.projects.get(project_id))
            .filter(|p| p.deleted_on.is_none())
            .cloned()
            .collect()
    }

    /// The active samples and analyses in the project, optionally
    /// restricted to one owner
    pub fn samples_and_analyses_of(
        &self,
        project_id: Uuid,
        owner_only: Option<Uuid>,
    ) -> (Vec<Sample>, Vec<Analysis>) {
        let inner = self.lock();
        let owner_matches = |owner_id: Option<Uuid>| match owner_only {
            Some(owner) => owner_id == Some(owner),
            None => true,
        };
        let samples = inner
            .samples
            .values()
            .filter(|s| {
                s.deleted_on.is_none()
                    && s.project_ids.contains(&project_id)
                    && owner_matches(s.owner_id)
            })
            .cloned()
            .collect();
        let analyses = inner
            .analyses
            .values()
            .filter(|a| {
                a.deleted_on.is_none()
                    && a.project_ids.contains(&project_id)
                    && owner_matches(a.owner_id)
            })
            .cloned()
            .collect();
        (samples, analyses)
    }

    // Authorization snapshots

    /// Loads everything the authorization rules may consult for one
    /// decision, against one consistent view of the store
    pub fn access_snapshot(
        &self,
        actor: &ActorProfile,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> LookupResult<AccessSnapshot> {
        let inner = self.lock();
        let resource = match resource_type {
            ResourceType::Project => {
                inner.projects.get(&resource_id).map(|p| p.resource_summary())
            }
            ResourceType::Sample => {
                inner.samples.get(&resource_id).map(|s| s.resource_summary())
            }
            ResourceType::Analysis => {
                inner.analyses.get(&resource_id).map(|a| a.resource_summary())
            }
            _ => None,
        }
        .ok_or_else(|| {
            LookupType::ById(resource_id).into_not_found(resource_type)
        })?;

        let actor_keys = inner.grantee_keys(actor.id);
        let direct_level =
            inner.grant_level(&actor_keys, resource_type, resource_id);

        let containing_projects = match resource_type {
            ResourceType::Sample | ResourceType::Analysis => {
                let project_ids = match resource_type {
                    ResourceType::Sample => inner
                        .samples
                        .get(&resource_id)
                        .map(|s| s.project_ids.clone())
                        .unwrap_or_default(),
                    _ => inner
                        .analyses
                        .get(&resource_id)
                        .map(|a| a.project_ids.clone())
                        .unwrap_or_default(),
                };
                project_ids
                    .iter()
                    .filter_map(|project_id| inner.projects.get(project_id))
                    .filter(|p| p.deleted_on.is_none())
                    .map(|p| ProjectStanding {
                        project_id: p.id,
                        owned: p.owner_id == Some(actor.id),
                        level: inner.grant_level(
                            &actor_keys,
                            ResourceType::Project,
                            p.id,
                        ),
                        public: p.visibility.is_public(),
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        let reaches_contained = resource_type == ResourceType::Project
            && inner.reaches_contents(&actor_keys, actor.id, resource_id);

        Ok(AccessSnapshot {
            actor: *actor,
            resource,
            direct_level,
            containing_projects,
            reaches_contained,
        })
    }
}

impl Default for DataStore {
    fn default() -> Self {
        DataStore::new()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::DataStore;
    use crate::db::model::Analysis;
    use crate::db::model::Project;
    use crate::db::model::Sample;
    use crate::db::model::User;
    use chrono::Utc;
    use petri_common::api::AnalysisState;
    use petri_common::api::ResourceType;
    use petri_common::api::Visibility;
    use serde_json::json;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    pub(crate) fn make_user(store: &DataStore) -> User {
        store.user_create(User {
            id: Uuid::new_v4(),
            email: format!("{}@example.org", Uuid::new_v4()),
            is_superuser: false,
            is_active: true,
            notify_on_analysis_status: true,
            active_project: None,
            time_created: Utc::now(),
            deleted_on: None,
        })
    }

    pub(crate) fn make_project(store: &DataStore, owner: &User) -> Project {
        store.project_create(Project {
            id: Uuid::new_v4(),
            name: "proteome".to_string(),
            owner_id: Some(owner.id),
            visibility: Visibility::Private,
            shared_with: Vec::new(),
            time_created: Utc::now(),
            deleted_on: None,
        })
    }

    pub(crate) fn make_sample(
        store: &DataStore,
        owner: &User,
        project_ids: &[Uuid],
    ) -> Sample {
        store.sample_create(Sample {
            id: Uuid::new_v4(),
            name: "hela-rep1".to_string(),
            owner_id: Some(owner.id),
            visibility: Visibility::Private,
            project_ids: project_ids.iter().copied().collect(),
            shared_with: Vec::new(),
            time_created: Utc::now(),
            deleted_on: None,
        })
    }

    pub(crate) fn make_analysis(
        store: &DataStore,
        owner: &User,
        project_ids: &[Uuid],
    ) -> Analysis {
        store.analysis_insert(Analysis {
            id: Uuid::new_v4(),
            name: "rnaseq on hela-rep1".to_string(),
            owner_id: Some(owner.id),
            status: AnalysisState::WaitingInQueue,
            host_id: Uuid::new_v4(),
            workflow_name: "rnaseq".to_string(),
            project_ids: project_ids.iter().copied().collect(),
            sample_ids: BTreeSet::new(),
            control_ids: BTreeSet::new(),
            meta: json!({ "source": "web" }),
            params: json!({}),
            genome_id: None,
            files: Vec::new(),
            shared_with: Vec::new(),
            scheduled_on: None,
            started_on: None,
            completed_on: None,
            time_created: Utc::now(),
            deleted_on: None,
        })
    }

    #[test]
    fn test_graph_queries_absent_inputs_are_empty() {
        let store = DataStore::new();
        let nowhere = Uuid::new_v4();
        assert!(store.owner_of(ResourceType::Sample, nowhere).is_none());
        assert!(store.active_projects_of(nowhere).is_empty());
        assert!(store
            .projects_containing(ResourceType::Sample, nowhere)
            .is_empty());
        let (samples, analyses) = store.samples_and_analyses_of(nowhere, None);
        assert!(samples.is_empty());
        assert!(analyses.is_empty());
    }

    #[test]
    fn test_graph_queries_filter_deleted() {
        let store = DataStore::new();
        let owner = make_user(&store);
        let project = make_project(&store, &owner);
        let sample = make_sample(&store, &owner, &[project.id]);
        let analysis = make_analysis(&store, &owner, &[project.id]);

        assert_eq!(
            store.owner_of(ResourceType::Analysis, analysis.id),
            Some(owner.id)
        );
        assert_eq!(store.active_projects_of(owner.id).len(), 1);
        assert_eq!(
            store
                .projects_containing(ResourceType::Sample, sample.id)
                .iter()
                .map(|p| p.id)
                .collect::<Vec<_>>(),
            vec![project.id]
        );
        let (samples, analyses) =
            store.samples_and_analyses_of(project.id, None);
        assert_eq!(samples.len(), 1);
        assert_eq!(analyses.len(), 1);

        // Soft-delete the sample; it disappears from the graph but remains
        // fetchable by id.
        {
            let mut inner = store.lock();
            inner.samples.get_mut(&sample.id).unwrap().deleted_on =
                Some(Utc::now());
        }
        let (samples, _) = store.samples_and_analyses_of(project.id, None);
        assert!(samples.is_empty());
        assert!(store.sample_fetch(sample.id).is_ok());
    }

    #[test]
    fn test_samples_and_analyses_owner_filter() {
        let store = DataStore::new();
        let owner = make_user(&store);
        let other = make_user(&store);
        let project = make_project(&store, &owner);
        make_sample(&store, &owner, &[project.id]);
        make_sample(&store, &other, &[project.id]);

        let (samples, _) =
            store.samples_and_analyses_of(project.id, Some(other.id));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].owner_id, Some(other.id));
    }

    #[test]
    fn test_snapshot_contains_project_standing() {
        let store = DataStore::new();
        let owner = make_user(&store);
        let viewer = make_user(&store);
        let project = make_project(&store, &owner);
        let sample = make_sample(&store, &owner, &[project.id]);

        let snapshot = store
            .access_snapshot(
                &viewer.profile(),
                ResourceType::Sample,
                sample.id,
            )
            .unwrap();
        assert_eq!(snapshot.resource.owner_id, Some(owner.id));
        assert!(snapshot.direct_level.is_none());
        assert_eq!(snapshot.containing_projects.len(), 1);
        let standing = &snapshot.containing_projects[0];
        assert_eq!(standing.project_id, project.id);
        assert!(!standing.owned);
        assert!(standing.level.is_none());
        assert!(!standing.public);
    }

    #[test]
    fn test_analysis_by_genome_prefers_most_recent() {
        let store = DataStore::new();
        let owner = make_user(&store);
        let project = make_project(&store, &owner);
        let genome = Uuid::new_v4();

        let mut first = make_analysis(&store, &owner, &[project.id]);
        first.genome_id = Some(genome);
        first.time_created = Utc::now() - chrono::Duration::hours(2);
        store.analysis_insert(first);

        let mut second = make_analysis(&store, &owner, &[project.id]);
        second.genome_id = Some(genome);
        let second = store.analysis_insert(second);

        let found = store.analysis_by_genome(genome, owner.id).unwrap();
        assert_eq!(found.id, second.id);
        assert!(store.analysis_by_genome(Uuid::new_v4(), owner.id).is_none());
    }
}

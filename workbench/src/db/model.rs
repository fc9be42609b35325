// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Records held by the datastore
//!
//! Every record carries a `deleted_on` soft-delete marker.  Deleted records
//! stay addressable by id for audit but are excluded from every
//! resource-graph query and fail active-state checks.

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use petri_auth::authz::ActorProfile;
use petri_auth::authz::ResourceSummary;
use petri_common::api::AnalysisState;
use petri_common::api::PermissionLevel;
use petri_common::api::ResourceType;
use petri_common::api::Visibility;
use serde_json::json;
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::config::HostConfig;

/// A registered principal
#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub is_superuser: bool,
    pub is_active: bool,
    /// Opt-in for completion/failure emails about the user's analyses.
    pub notify_on_analysis_status: bool,
    /// Fallback project for create operations that name no project.
    pub active_project: Option<Uuid>,
    pub time_created: DateTime<Utc>,
    pub deleted_on: Option<DateTime<Utc>>,
}

impl User {
    pub fn profile(&self) -> ActorProfile {
        ActorProfile {
            id: self.id,
            is_superuser: self.is_superuser,
            is_active: self.is_active,
        }
    }
}

/// One entry in a resource's `shared_with` mirror
///
/// The mirror duplicates the grant store for fast listing; the two are
/// always updated together.  `time_modified` only moves when the entry's
/// level actually changes.
#[derive(Clone, Debug, PartialEq)]
pub struct SharedWithEntry {
    /// a user id rendered as a string, or an email for not-yet-registered
    /// grantees
    pub grantee: String,
    pub level: PermissionLevel,
    pub time_modified: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Option<Uuid>,
    pub visibility: Visibility,
    pub shared_with: Vec<SharedWithEntry>,
    pub time_created: DateTime<Utc>,
    pub deleted_on: Option<DateTime<Utc>>,
}

impl Project {
    pub fn resource_summary(&self) -> ResourceSummary {
        ResourceSummary {
            resource_type: ResourceType::Project,
            id: self.id,
            owner_id: self.owner_id,
            visibility: self.visibility,
            deleted: self.deleted_on.is_some(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Sample {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Option<Uuid>,
    pub visibility: Visibility,
    pub project_ids: BTreeSet<Uuid>,
    pub shared_with: Vec<SharedWithEntry>,
    pub time_created: DateTime<Utc>,
    pub deleted_on: Option<DateTime<Utc>>,
}

impl Sample {
    pub fn resource_summary(&self) -> ResourceSummary {
        ResourceSummary {
            resource_type: ResourceType::Sample,
            id: self.id,
            owner_id: self.owner_id,
            visibility: self.visibility,
            deleted: self.deleted_on.is_some(),
        }
    }
}

/// An output file attached to an analysis, with its cached signed URL
#[derive(Clone, Debug)]
pub struct AnalysisFile {
    pub path: String,
    pub uri: String,
    pub url: Option<String>,
    pub url_expires_at: Option<DateTime<Utc>>,
}

impl AnalysisFile {
    /// Whether the cached signed URL needs refreshing
    pub fn url_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.url, self.url_expires_at) {
            (Some(_), Some(expires_at)) => expires_at <= now,
            _ => true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Analysis {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Option<Uuid>,
    pub status: AnalysisState,
    pub host_id: Uuid,
    pub workflow_name: String,
    pub project_ids: BTreeSet<Uuid>,
    pub sample_ids: BTreeSet<Uuid>,
    /// Control samples are a distinct relation from input samples.
    pub control_ids: BTreeSet<Uuid>,
    /// Free-form metadata; the `source` key tracks where the submission
    /// came from.
    pub meta: Value,
    pub params: Value,
    pub genome_id: Option<Uuid>,
    pub files: Vec<AnalysisFile>,
    pub shared_with: Vec<SharedWithEntry>,
    pub scheduled_on: Option<DateTime<Utc>>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub time_created: DateTime<Utc>,
    pub deleted_on: Option<DateTime<Utc>>,
}

impl Analysis {
    pub fn resource_summary(&self) -> ResourceSummary {
        ResourceSummary {
            resource_type: ResourceType::Analysis,
            id: self.id,
            owner_id: self.owner_id,
            visibility: Visibility::Private,
            deleted: self.deleted_on.is_some(),
        }
    }

    /// The source recorded in `meta`, if any
    pub fn meta_source(&self) -> Option<&str> {
        self.meta.get("source").and_then(Value::as_str)
    }
}

/// The structured log attached 1:1 to an analysis
///
/// `log` holds a `bio` map of per-stage entries and an `infra` list of
/// operational notes.  Fragments are deep-merged in as the run progresses.
#[derive(Clone, Debug)]
pub struct AnalysisLog {
    pub analysis_id: Uuid,
    pub log: Value,
    pub time_modified: DateTime<Utc>,
}

impl AnalysisLog {
    pub fn initial(analysis_id: Uuid, now: DateTime<Utc>) -> AnalysisLog {
        AnalysisLog {
            analysis_id,
            log: json!({ "bio": {}, "infra": [] }),
            time_modified: now,
        }
    }
}

/// One compute attempt for an analysis
#[derive(Clone, Debug)]
pub struct Instance {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub instance_type: String,
    pub requested_on: DateTime<Utc>,
    pub ready_on: Option<DateTime<Utc>>,
    pub terminated_on: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn is_open(&self) -> bool {
        self.terminated_on.is_none()
    }

    pub fn time_to_boot(&self) -> Option<Duration> {
        self.ready_on.map(|ready| ready - self.requested_on)
    }

    pub fn time_to_run(&self) -> Option<Duration> {
        match (self.ready_on, self.terminated_on) {
            (Some(ready), Some(terminated)) => Some(terminated - ready),
            _ => None,
        }
    }
}

/// A tenant of the control plane
#[derive(Clone, Debug)]
pub struct Host {
    pub id: Uuid,
    pub domain: String,
    pub contact_email: String,
    pub config: HostConfig,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostRole {
    Manager,
    Member,
}

#[derive(Clone, Debug)]
pub struct HostMembership {
    pub host_id: Uuid,
    pub user_id: Uuid,
    pub role: HostRole,
    pub time_created: DateTime<Utc>,
}

/// Merge `fragment` into `dest`: objects merge recursively, lists append,
/// anything else replaces
pub fn deep_merge(dest: &mut Value, fragment: &Value) {
    match (dest, fragment) {
        (Value::Object(dest_map), Value::Object(fragment_map)) => {
            for (key, fragment_value) in fragment_map {
                match dest_map.get_mut(key) {
                    Some(dest_value) => deep_merge(dest_value, fragment_value),
                    None => {
                        dest_map.insert(key.clone(), fragment_value.clone());
                    }
                }
            }
        }
        (Value::Array(dest_list), Value::Array(fragment_list)) => {
            dest_list.extend(fragment_list.iter().cloned());
        }
        (dest_other, fragment_other) => {
            *dest_other = fragment_other.clone();
        }
    }
}

#[cfg(test)]
mod test {
    use super::deep_merge;
    use super::AnalysisFile;
    use super::Instance;
    use chrono::Duration;
    use chrono::TimeZone;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_deep_merge() {
        let mut log = json!({
            "bio": { "align": { "status": "running" } },
            "infra": ["booted"],
        });
        deep_merge(
            &mut log,
            &json!({
                "bio": {
                    "align": { "status": "done", "reads": 12 },
                    "count": { "status": "running" },
                },
                "infra": ["align finished"],
            }),
        );
        assert_eq!(
            log,
            json!({
                "bio": {
                    "align": { "status": "done", "reads": 12 },
                    "count": { "status": "running" },
                },
                "infra": ["booted", "align finished"],
            })
        );
    }

    #[test]
    fn test_deep_merge_scalar_replaces() {
        let mut value = json!({ "status": "running" });
        deep_merge(&mut value, &json!({ "status": 3 }));
        assert_eq!(value, json!({ "status": 3 }));
    }

    #[test]
    fn test_instance_durations() {
        let requested = Utc.with_ymd_and_hms(2023, 5, 1, 10, 0, 0).unwrap();
        let mut instance = Instance {
            id: Uuid::new_v4(),
            analysis_id: Uuid::new_v4(),
            instance_type: "standard".to_string(),
            requested_on: requested,
            ready_on: None,
            terminated_on: None,
        };
        assert!(instance.is_open());
        assert_eq!(instance.time_to_boot(), None);
        assert_eq!(instance.time_to_run(), None);

        instance.ready_on = Some(requested + Duration::seconds(90));
        instance.terminated_on = Some(requested + Duration::seconds(690));
        assert!(!instance.is_open());
        assert_eq!(instance.time_to_boot(), Some(Duration::seconds(90)));
        assert_eq!(instance.time_to_run(), Some(Duration::seconds(600)));
    }

    #[test]
    fn test_file_url_expiry() {
        let now = Utc::now();
        let mut file = AnalysisFile {
            path: "out/result.bw".to_string(),
            uri: "s3://bucket/out/result.bw".to_string(),
            url: None,
            url_expires_at: None,
        };
        assert!(file.url_expired(now));

        file.url = Some("https://signed.example/out/result.bw".to_string());
        file.url_expires_at = Some(now + Duration::seconds(60));
        assert!(!file.url_expired(now));

        file.url_expires_at = Some(now - Duration::seconds(1));
        assert!(file.url_expired(now));
    }
}

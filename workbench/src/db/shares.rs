// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Share registry: explicit grants between principals and resources
//!
//! Grants are keyed by `(grantee, resource type, resource id)`, where the
//! grantee is a user id rendered as a string or an email address for
//! grantees who have not registered yet.  The grant store and the
//! per-resource `shared_with` mirror are always updated together, under the
//! same lock acquisition.  Owners never hold grants on their own resources.

use chrono::DateTime;
use chrono::Utc;
use petri_common::api::Error;
use petri_common::api::LookupType;
use petri_common::api::PermissionLevel;
use petri_common::api::ResourceType;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::datastore::DataStore;
use super::datastore::GrantKey;
use super::datastore::Inner;
use super::model::SharedWithEntry;

impl DataStore {
    /// Grants `level` on the resource to `grantee_key`
    ///
    /// Re-assigning an existing grant is idempotent and refreshes the
    /// mirror timestamp.  Granting to the resource's owner is rejected.
    pub fn share_assign(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
        grantee_key: &str,
        level: PermissionLevel,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        inner
            .resource_owner(resource_type, resource_id)
            .ok_or_else(|| {
                LookupType::ById(resource_id).into_not_found(resource_type)
            })?;
        if is_owner_key(&inner, resource_type, resource_id, grantee_key) {
            return Err(Error::invalid_request(&format!(
                "cannot grant a share to the owner of the {}",
                resource_type
            )));
        }
        assign_locked(
            &mut inner,
            resource_type,
            resource_id,
            grantee_key,
            level,
            Utc::now(),
        );
        Ok(())
    }

    /// Removes the grant; a no-op if no grant exists
    pub fn share_revoke(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
        grantee_key: &str,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        inner
            .resource_owner(resource_type, resource_id)
            .ok_or_else(|| {
                LookupType::ById(resource_id).into_not_found(resource_type)
            })?;
        revoke_locked(&mut inner, resource_type, resource_id, grantee_key);
        Ok(())
    }

    /// The highest level granted under any of `keys`, or `None` when no
    /// grant exists
    pub fn permission_level_for(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
        keys: &[String],
    ) -> Option<PermissionLevel> {
        self.lock().grant_level(keys, resource_type, resource_id)
    }

    /// Applies a requested permission map as a diff against the current
    /// grants
    ///
    /// Keys are user ids (as strings) or email addresses; emails belonging
    /// to registered users are resolved to their id.  `None` revokes.  The
    /// owner is skipped.  Only entries whose level actually changes are
    /// written, so untouched mirror entries keep a stable `time_modified`.
    pub fn apply_bulk_diff(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
        requested: &BTreeMap<String, Option<PermissionLevel>>,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        inner
            .resource_owner(resource_type, resource_id)
            .ok_or_else(|| {
                LookupType::ById(resource_id).into_not_found(resource_type)
            })?;
        let now = Utc::now();
        for (raw_key, requested_level) in requested {
            let grantee = canonical_grantee(&inner, raw_key);
            if is_owner_key(&inner, resource_type, resource_id, &grantee) {
                continue;
            }
            let current = inner
                .grants
                .get(&GrantKey {
                    grantee: grantee.clone(),
                    resource_type,
                    resource_id,
                })
                .copied();
            match requested_level {
                None => {
                    revoke_locked(
                        &mut inner,
                        resource_type,
                        resource_id,
                        &grantee,
                    );
                }
                Some(level) if current == Some(*level) => {}
                Some(level) => {
                    assign_locked(
                        &mut inner,
                        resource_type,
                        resource_id,
                        &grantee,
                        *level,
                        now,
                    );
                }
            }
        }
        Ok(())
    }

    /// Grants `level` to each email address, resolving registered users to
    /// their id key
    ///
    /// Rejects empty email lists and self-shares.  With `share_related`, an
    /// analysis grant fans out to the analysis's samples (skipping samples
    /// the grantee owns).
    pub fn share_with_emails(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
        level: PermissionLevel,
        emails: &[String],
        actor_id: Uuid,
        share_related: bool,
    ) -> Result<(), Error> {
        if emails.is_empty() {
            return Err(Error::invalid_request(
                "at least one email address is required",
            ));
        }
        let mut inner = self.lock();
        inner
            .resource_owner(resource_type, resource_id)
            .ok_or_else(|| {
                LookupType::ById(resource_id).into_not_found(resource_type)
            })?;
        let actor_email = inner
            .users
            .get(&actor_id)
            .map(|user| user.email.clone())
            .unwrap_or_default();
        let now = Utc::now();

        let mut targets = vec![(resource_type, resource_id)];
        if share_related && resource_type == ResourceType::Analysis {
            if let Some(analysis) = inner.analyses.get(&resource_id) {
                targets.extend(
                    analysis
                        .sample_ids
                        .iter()
                        .map(|sample_id| (ResourceType::Sample, *sample_id)),
                );
            }
        }

        for email in emails {
            if *email == actor_email {
                return Err(Error::invalid_request(
                    "cannot share a resource with yourself",
                ));
            }
            let grantee = canonical_grantee(&inner, email);
            for (target_type, target_id) in &targets {
                // Primary-target owner grants are client errors; fan-out
                // targets the grantee happens to own are skipped.
                if is_owner_key(&inner, *target_type, *target_id, &grantee) {
                    if (*target_type, *target_id)
                        == (resource_type, resource_id)
                    {
                        return Err(Error::invalid_request(&format!(
                            "cannot grant a share to the owner of the {}",
                            target_type
                        )));
                    }
                    continue;
                }
                assign_locked(
                    &mut inner,
                    *target_type,
                    *target_id,
                    &grantee,
                    level,
                    now,
                );
            }
        }
        Ok(())
    }
}

/// Resolves a requested grantee key: uuid strings pass through, emails of
/// registered users resolve to the user's id key, unknown emails stay as
/// email keys
fn canonical_grantee(inner: &Inner, raw_key: &str) -> String {
    if raw_key.parse::<Uuid>().is_ok() {
        return raw_key.to_string();
    }
    inner
        .users
        .values()
        .find(|user| user.email == raw_key && user.deleted_on.is_none())
        .map(|user| user.id.to_string())
        .unwrap_or_else(|| raw_key.to_string())
}

fn is_owner_key(
    inner: &Inner,
    resource_type: ResourceType,
    resource_id: Uuid,
    grantee_key: &str,
) -> bool {
    let Some(Some(owner_id)) =
        inner.resource_owner(resource_type, resource_id)
    else {
        return false;
    };
    if grantee_key == owner_id.to_string() {
        return true;
    }
    inner
        .users
        .get(&owner_id)
        .map(|owner| owner.email == grantee_key)
        .unwrap_or(false)
}

fn assign_locked(
    inner: &mut Inner,
    resource_type: ResourceType,
    resource_id: Uuid,
    grantee_key: &str,
    level: PermissionLevel,
    now: DateTime<Utc>,
) {
    inner.grants.insert(
        GrantKey {
            grantee: grantee_key.to_string(),
            resource_type,
            resource_id,
        },
        level,
    );
    if let Some(mirror) = inner.shared_with_mut(resource_type, resource_id) {
        match mirror.iter_mut().find(|entry| entry.grantee == grantee_key) {
            Some(entry) => {
                entry.level = level;
                entry.time_modified = now;
            }
            None => mirror.push(SharedWithEntry {
                grantee: grantee_key.to_string(),
                level,
                time_modified: now,
            }),
        }
    }
}

fn revoke_locked(
    inner: &mut Inner,
    resource_type: ResourceType,
    resource_id: Uuid,
    grantee_key: &str,
) {
    inner.grants.remove(&GrantKey {
        grantee: grantee_key.to_string(),
        resource_type,
        resource_id,
    });
    if let Some(mirror) = inner.shared_with_mut(resource_type, resource_id) {
        mirror.retain(|entry| entry.grantee != grantee_key);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sample operations

use chrono::Utc;
use petri_auth::authz;
use petri_auth::authz::Action;
use petri_common::api::CreateResult;
use petri_common::api::Error;
use petri_common::api::LookupResult;
use petri_common::api::ResourceType;
use petri_common::api::Visibility;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::context::OpContext;
use crate::db::model::Sample;

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct SampleCreate {
    pub name: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub project_ids: Vec<Uuid>,
}

impl super::Workbench {
    /// Creates a sample in the named projects; requires edit access on
    /// every one of them
    pub fn sample_create(
        &self,
        opctx: &OpContext,
        params: &SampleCreate,
    ) -> CreateResult<Sample> {
        let profile = self.actor_profile(opctx)?;
        let mut project_edit = BTreeMap::new();
        for project_id in &params.project_ids {
            self.datastore.project_fetch(*project_id)?;
            project_edit.insert(
                *project_id,
                self.allows(
                    &profile,
                    Action::Modify,
                    ResourceType::Project,
                    *project_id,
                ),
            );
        }
        if !authz::can_add_sample(&project_edit) {
            return Err(Error::Forbidden);
        }
        Ok(self.datastore.sample_create(Sample {
            id: Uuid::new_v4(),
            name: params.name.clone(),
            owner_id: Some(profile.id),
            visibility: params.visibility,
            project_ids: params.project_ids.iter().copied().collect(),
            shared_with: Vec::new(),
            time_created: Utc::now(),
            deleted_on: None,
        }))
    }

    pub fn sample_fetch(
        &self,
        opctx: &OpContext,
        sample_id: Uuid,
    ) -> LookupResult<Sample> {
        self.authorize(opctx, Action::Read, ResourceType::Sample, sample_id)?;
        self.datastore.sample_fetch(sample_id)
    }
}

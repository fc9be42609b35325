// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Project operations

use chrono::Utc;
use petri_auth::authz::Action;
use petri_common::api::CreateResult;
use petri_common::api::Error;
use petri_common::api::LookupResult;
use petri_common::api::ResourceType;
use petri_common::api::Visibility;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::context::OpContext;
use crate::db::model::Project;

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ProjectCreate {
    pub name: String,
    #[serde(default)]
    pub visibility: Visibility,
}

impl super::Workbench {
    pub fn project_create(
        &self,
        opctx: &OpContext,
        params: &ProjectCreate,
    ) -> CreateResult<Project> {
        let actor = opctx.authn.actor_required()?;
        let owner_id = actor.user_id().ok_or(Error::Forbidden)?;
        Ok(self.datastore.project_create(Project {
            id: Uuid::new_v4(),
            name: params.name.clone(),
            owner_id: Some(owner_id),
            visibility: params.visibility,
            shared_with: Vec::new(),
            time_created: Utc::now(),
            deleted_on: None,
        }))
    }

    pub fn project_fetch(
        &self,
        opctx: &OpContext,
        project_id: Uuid,
    ) -> LookupResult<Project> {
        self.authorize(opctx, Action::Read, ResourceType::Project, project_id)?;
        self.datastore.project_fetch(project_id)
    }
}

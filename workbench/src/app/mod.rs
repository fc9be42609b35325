// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operation entry points
//!
//! [`Workbench`] holds the shared subsystems and exposes one method per
//! operation.  Every method takes an [`OpContext`] and performs its own
//! authorization before touching the datastore.

pub mod analysis;
pub mod project;
pub mod sample;

pub use analysis::AnalysisCreate;
pub use analysis::AnalysisUpdate;
pub use analysis::ReanalyzeRequest;
pub use analysis::SharePayload;
pub use project::ProjectCreate;
pub use sample::SampleCreate;

use petri_auth::authn::Actor;
use petri_auth::authz::AccessSnapshot;
use petri_auth::authz::Action;
use petri_auth::authz::ActorProfile;
use petri_auth::authz::Authz;
use petri_common::api::Error;
use petri_common::api::LookupResult;
use petri_common::api::PermissionLevel;
use petri_common::api::ResourceType;
use slog::Logger;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::context::OpContext;
use crate::db::DataStore;
use crate::external::StorageSigner;
use crate::external::WorkflowEngine;
use crate::notify::Notifier;
use crate::queue::Dispatcher;
use crate::queue::QueueClient;

/// The control-plane application
pub struct Workbench {
    pub(crate) log: Logger,
    pub(crate) config: Config,
    pub(crate) authz: Arc<Authz>,
    pub(crate) datastore: Arc<DataStore>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) workflow: Arc<dyn WorkflowEngine>,
    pub(crate) signer: Arc<dyn StorageSigner>,
    pub(crate) notifier: Arc<dyn Notifier>,
}

impl Workbench {
    pub fn new(
        log: &Logger,
        config: Config,
        datastore: Arc<DataStore>,
        queue: Arc<dyn QueueClient>,
        workflow: Arc<dyn WorkflowEngine>,
        signer: Arc<dyn StorageSigner>,
        notifier: Arc<dyn Notifier>,
    ) -> Workbench {
        Workbench {
            log: log.new(slog::o!("component" => "workbench")),
            config,
            authz: Arc::new(Authz::new(log)),
            dispatcher: Dispatcher::new(log, queue),
            datastore,
            workflow,
            signer,
            notifier,
        }
    }

    pub fn datastore(&self) -> &Arc<DataStore> {
        &self.datastore
    }

    /// Loads the authorization profile of the context's actor
    ///
    /// Internal service actors (e.g., the workflow decider) are not subject
    /// to per-resource grants.
    pub(crate) fn actor_profile(
        &self,
        opctx: &OpContext,
    ) -> Result<ActorProfile, Error> {
        match opctx.authn.actor_required()? {
            Actor::User { user_id } => self.datastore.actor_profile(*user_id),
            Actor::Service { .. } => Ok(ActorProfile {
                id: Uuid::nil(),
                is_superuser: true,
                is_active: true,
            }),
        }
    }

    /// Authorizes `action` on the resource for the context's actor,
    /// returning the snapshot the decision was made against
    pub(crate) fn authorize(
        &self,
        opctx: &OpContext,
        action: Action,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> LookupResult<AccessSnapshot> {
        let profile = self.actor_profile(opctx)?;
        let snapshot = self.datastore.access_snapshot(
            &profile,
            resource_type,
            resource_id,
        )?;
        self.authz.authorize(&snapshot, action)?;
        Ok(snapshot)
    }

    /// Whether the actor may perform `action`, with denials (and absent
    /// resources) folded to `false`
    pub(crate) fn allows(
        &self,
        profile: &ActorProfile,
        action: Action,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> bool {
        match self.datastore.access_snapshot(
            profile,
            resource_type,
            resource_id,
        ) {
            Ok(snapshot) => self.authz.is_allowed(&snapshot, action),
            Err(_) => false,
        }
    }

    /// Grants `level` on the resource to each email address
    pub fn resource_share(
        &self,
        opctx: &OpContext,
        resource_type: ResourceType,
        resource_id: Uuid,
        level: PermissionLevel,
        emails: &[String],
        share_related: bool,
    ) -> Result<(), Error> {
        let profile = self.actor_profile(opctx)?;
        self.authorize(opctx, Action::Share, resource_type, resource_id)?;
        self.datastore.share_with_emails(
            resource_type,
            resource_id,
            level,
            emails,
            profile.id,
            share_related,
        )
    }

    /// Revokes the grantee's grant on the resource; a no-op when no grant
    /// exists
    pub fn resource_unshare(
        &self,
        opctx: &OpContext,
        resource_type: ResourceType,
        resource_id: Uuid,
        grantee_key: &str,
    ) -> Result<(), Error> {
        self.authorize(opctx, Action::Share, resource_type, resource_id)?;
        self.datastore.share_revoke(resource_type, resource_id, grantee_key)
    }
}

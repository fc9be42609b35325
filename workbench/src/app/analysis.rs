// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Analysis operations: submit, retrieve, update, destroy, bulk submit,
//! log append, re-analyze, and terminate

use chrono::Duration;
use chrono::Utc;
use petri_auth::authz;
use petri_auth::authz::Action;
use petri_auth::authz::CreateTarget;
use petri_auth::authz::ProjectSetChange;
use petri_common::api::AnalysisState;
use petri_common::api::CreateResult;
use petri_common::api::DeleteResult;
use petri_common::api::Error;
use petri_common::api::LookupResult;
use petri_common::api::PermissionLevel;
use petri_common::api::ResourceType;
use petri_common::api::UpdateResult;
use petri_common::api::Visibility;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use slog::warn;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::config::ExecutionMode;
use crate::context::OpContext;
use crate::db::model::deep_merge;
use crate::db::model::Analysis;
use crate::db::model::AnalysisLog;
use crate::db::model::Project;
use crate::external::workflow_run_key;
use crate::lifecycle;
use crate::lifecycle::NotificationKind;
use crate::notify::plan_notification;
use crate::queue::QueueMessage;

/// TTL for signed file URLs refreshed on retrieve.
const FILE_URL_TTL_SECONDS: u64 = 28800;
/// Restart dispatch delay for submissions not from the primary web app.
const REANALYZE_DELAY_SECONDS: u64 = 300;
const DEFAULT_SOURCE: &str = "web";
const PRIMARY_WEBAPP_SOURCE: &str = "webapp";
const DEFAULT_INSTANCE_TYPE: &str = "standard";
const DEFAULT_PROJECT_NAME: &str = "Project 1";

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct AnalysisCreate {
    pub name: Option<String>,
    pub workflow_name: String,
    #[serde(default)]
    pub project_ids: Vec<Uuid>,
    #[serde(default)]
    pub sample_ids: Vec<Uuid>,
    #[serde(default)]
    pub control_ids: Vec<Uuid>,
    #[serde(default)]
    pub params: Value,
    /// Client-supplied metadata, merged into the record's `meta` document.
    #[serde(default)]
    pub meta: Option<Value>,
    pub genome_id: Option<Uuid>,
    /// Where the submission came from; recorded under `meta.source`.
    pub source: Option<String>,
    /// Request domain, used to resolve the tenant host.
    pub domain: Option<String>,
    pub instance_type: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct SharePayload {
    pub level: PermissionLevel,
    pub emails: Vec<String>,
    #[serde(default)]
    pub share_related: bool,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
pub struct AnalysisUpdate {
    pub name: Option<String>,
    pub status: Option<AnalysisState>,
    /// Deep-merged into the existing metadata.
    pub meta: Option<Value>,
    /// The full requested project set; omitting it leaves membership
    /// unchanged.
    pub project_ids: Option<BTreeSet<Uuid>>,
    pub old_project_id: Option<Uuid>,
    pub new_project_id: Option<Uuid>,
    /// Direct share to a list of email addresses.
    pub permission_data: Option<SharePayload>,
    /// Bulk share diff, keyed by user id or email.
    pub update_permissions: Option<BTreeMap<String, Option<PermissionLevel>>>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ReanalyzeRequest {
    pub analysis_id: Option<Uuid>,
    /// Selects the caller's most recent analysis for this genome.
    pub genome_id: Option<Uuid>,
    pub instance_type: Option<String>,
    pub source: Option<String>,
}

impl super::Workbench {
    /// Submits a new analysis: validates the payload against the actor's
    /// standing, lands the record in `waiting-in-queue`, and dispatches the
    /// start intent
    pub async fn analysis_create(
        &self,
        opctx: &OpContext,
        params: &AnalysisCreate,
    ) -> CreateResult<Analysis> {
        let profile = self.actor_profile(opctx)?;
        let user = self.datastore.user_fetch(profile.id)?;
        let source =
            params.source.clone().unwrap_or_else(|| DEFAULT_SOURCE.to_string());

        let domain =
            params.domain.as_deref().unwrap_or(&self.config.default_domain);
        let host = self
            .datastore
            .host_for_domain(domain)
            .or_else(|| self.datastore.default_host_for_user(profile.id))
            .ok_or_else(|| {
                Error::invalid_request(&format!(
                    "no host available for domain \"{}\"",
                    domain
                ))
            })?;
        if source == "cli"
            && host.config.cli_denied_workflows.contains(&params.workflow_name)
        {
            return Err(Error::Forbidden);
        }

        // Build the create target: the actor's standing on every named
        // project and sample.  Control samples are checked like input
        // samples.
        let mut target = CreateTarget::default();
        for project_id in &params.project_ids {
            self.datastore.project_fetch(*project_id)?;
            target.project_edit.insert(
                *project_id,
                self.allows(
                    &profile,
                    Action::Modify,
                    ResourceType::Project,
                    *project_id,
                ),
            );
        }
        let named_samples: BTreeSet<Uuid> = params
            .sample_ids
            .iter()
            .chain(params.control_ids.iter())
            .copied()
            .collect();
        for sample_id in &named_samples {
            let sample = self.datastore.sample_fetch(*sample_id)?;
            if sample.deleted_on.is_some() {
                return Err(Error::not_found_by_id(
                    ResourceType::Sample,
                    sample_id,
                ));
            }
            target.sample_edit.insert(
                *sample_id,
                self.allows(
                    &profile,
                    Action::Modify,
                    ResourceType::Sample,
                    *sample_id,
                ),
            );
            target.sample_projects.insert(
                *sample_id,
                self.datastore
                    .projects_containing(ResourceType::Sample, *sample_id)
                    .iter()
                    .map(|p| p.id)
                    .collect(),
            );
        }
        if !profile.is_superuser && !authz::can_analyze(&target) {
            return Err(Error::Forbidden);
        }

        // When no project is named, fall back to the owner's active
        // project, creating it on demand.
        let mut project_ids: BTreeSet<Uuid> =
            params.project_ids.iter().copied().collect();
        if project_ids.is_empty() {
            project_ids.insert(self.active_project_for(&user)?.id);
        }

        let name = match &params.name {
            Some(name) => name.clone(),
            None => {
                let first_sample = params
                    .sample_ids
                    .first()
                    .and_then(|id| self.datastore.sample_fetch(*id).ok());
                match first_sample {
                    Some(sample) => {
                        format!("{} on {}", params.workflow_name, sample.name)
                    }
                    None => params.workflow_name.clone(),
                }
            }
        };

        let mut meta = json!({ "source": source });
        if let Some(client_meta) = &params.meta {
            deep_merge(&mut meta, client_meta);
        }

        let now = Utc::now();
        let analysis = self.datastore.analysis_insert(Analysis {
            id: Uuid::new_v4(),
            name,
            owner_id: Some(profile.id),
            status: AnalysisState::WaitingInQueue,
            host_id: host.id,
            workflow_name: params.workflow_name.clone(),
            project_ids,
            sample_ids: params.sample_ids.iter().copied().collect(),
            control_ids: params.control_ids.iter().copied().collect(),
            meta,
            params: params.params.clone(),
            genome_id: params.genome_id,
            files: Vec::new(),
            shared_with: Vec::new(),
            scheduled_on: Some(now),
            started_on: None,
            completed_on: None,
            time_created: now,
            deleted_on: None,
        });
        self.datastore.log_create(AnalysisLog::initial(analysis.id, now));

        let message = QueueMessage::start(analysis.id, &host.domain);
        match self.dispatcher.send(&message, 0).await {
            Ok(()) => {
                self.datastore.instance_open(
                    analysis.id,
                    params
                        .instance_type
                        .as_deref()
                        .unwrap_or(DEFAULT_INSTANCE_TYPE),
                );
            }
            Err(error) => match self.config.mode {
                // The queue is usually absent in development; the analysis
                // stays queued and can be dispatched by hand.
                ExecutionMode::Development => {
                    warn!(opctx.log, "start dispatch failed";
                        "analysis_id" => analysis.id.to_string(),
                        "error" => %error,
                    );
                }
                ExecutionMode::Test | ExecutionMode::Production => {
                    return Err(error);
                }
            },
        }
        Ok(analysis)
    }

    /// Submits a batch of analyses; a failure in one slot never aborts the
    /// others
    pub async fn analysis_bulk_start(
        &self,
        opctx: &OpContext,
        requests: &[AnalysisCreate],
    ) -> Vec<CreateResult<Analysis>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.analysis_create(opctx, request).await);
        }
        results
    }

    /// Fetches an analysis, opportunistically refreshing expired signed
    /// file URLs
    pub fn analysis_retrieve(
        &self,
        opctx: &OpContext,
        analysis_id: Uuid,
    ) -> LookupResult<Analysis> {
        self.authorize(
            opctx,
            Action::Read,
            ResourceType::Analysis,
            analysis_id,
        )?;
        // Service callers (the workflow decider) have no use for browser
        // URLs; skip the signing pass.
        let is_service = opctx
            .authn
            .actor()
            .map(|actor| actor.is_service())
            .unwrap_or(false);
        if is_service {
            return self.datastore.analysis_fetch(analysis_id);
        }
        let signer = self.signer.clone();
        let log = opctx.log.clone();
        self.datastore.analysis_update_with(analysis_id, |analysis| {
            let now = Utc::now();
            for file in &mut analysis.files {
                if !file.url_expired(now) {
                    continue;
                }
                match signer
                    .get_self_signed(&file.path, FILE_URL_TTL_SECONDS)
                {
                    Ok(url) => {
                        file.url = Some(url);
                        file.url_expires_at = Some(
                            now + Duration::seconds(
                                FILE_URL_TTL_SECONDS as i64,
                            ),
                        );
                    }
                    // A single stale link must not fail the fetch.
                    Err(error) => {
                        warn!(log, "failed to refresh signed URL";
                            "path" => file.path.clone(),
                            "error" => %error,
                        );
                    }
                }
            }
            Ok(analysis.clone())
        })
    }

    /// Updates an analysis: plain fields, status reports from the fleet,
    /// project moves and copies, and share changes
    pub async fn analysis_update(
        &self,
        opctx: &OpContext,
        analysis_id: Uuid,
        update: &AnalysisUpdate,
    ) -> UpdateResult<Analysis> {
        let profile = self.actor_profile(opctx)?;
        let snapshot = self.datastore.access_snapshot(
            &profile,
            ResourceType::Analysis,
            analysis_id,
        )?;
        let current = self.datastore.analysis_fetch(analysis_id)?;
        if current.deleted_on.is_some() {
            // Actors who could otherwise write get the specific message;
            // everyone else must not learn the record exists.
            if self.authz.is_allowed(&snapshot, Action::Modify) {
                return Err(Error::invalid_request(&format!(
                    "analysis {} is deleted",
                    analysis_id
                )));
            }
            return Err(snapshot.resource.not_found());
        }

        let change = ProjectSetChange {
            current: current.project_ids.clone(),
            requested: update
                .project_ids
                .clone()
                .unwrap_or_else(|| current.project_ids.clone()),
            remove_directive: update.old_project_id,
            add_directive: update.new_project_id,
        };
        if change.is_move_or_copy() {
            // Moving or copying requires admin standing on the resource and
            // on every project the resource would newly join.
            self.authz.authorize(&snapshot, Action::Share)?;
            for project_id in change.added() {
                let project_snapshot = self.datastore.access_snapshot(
                    &profile,
                    ResourceType::Project,
                    project_id,
                )?;
                self.authz.authorize(&project_snapshot, Action::Share)?;
            }
        } else {
            self.authz.authorize(&snapshot, Action::Modify)?;
        }

        if let Some(share) = &update.permission_data {
            self.authz.authorize(&snapshot, Action::Share)?;
            self.datastore.share_with_emails(
                ResourceType::Analysis,
                analysis_id,
                share.level,
                &share.emails,
                profile.id,
                share.share_related,
            )?;
        }
        if let Some(diff) = &update.update_permissions {
            self.authz.authorize(&snapshot, Action::Share)?;
            self.datastore.apply_bulk_diff(
                ResourceType::Analysis,
                analysis_id,
                diff,
            )?;
        }

        let mut notification = None;
        let updated =
            self.datastore.analysis_update_with(analysis_id, |analysis| {
                if let Some(name) = &update.name {
                    analysis.name = name.clone();
                }
                if let Some(meta) = &update.meta {
                    deep_merge(&mut analysis.meta, meta);
                }
                if update.project_ids.is_some() || change.is_move_or_copy() {
                    let mut new_set = change.requested.clone();
                    if let Some(added) = change.add_directive {
                        new_set.insert(added);
                    }
                    if let Some(removed) = change.remove_directive {
                        new_set.remove(&removed);
                    }
                    analysis.project_ids = new_set;
                }
                if let Some(new_status) = update.status {
                    lifecycle::verify_transition(analysis.status, new_status)?;
                    notification = lifecycle::status_change_notification(
                        analysis.status,
                        new_status,
                    );
                    let now = Utc::now();
                    if new_status.is_active() && analysis.started_on.is_none()
                    {
                        analysis.started_on = Some(now);
                    }
                    if new_status.is_terminal()
                        && analysis.completed_on.is_none()
                    {
                        analysis.completed_on = Some(now);
                    }
                    analysis.status = new_status;
                }
                Ok(analysis.clone())
            })?;

        if let Some(kind) = notification {
            self.datastore.instance_close(analysis_id);
            self.notify_status_edge(opctx, &updated, kind).await;
        }
        Ok(updated)
    }

    /// Soft-deletes an analysis, drops its log, and asks the fleet to tear
    /// down its instance
    pub async fn analysis_destroy(
        &self,
        opctx: &OpContext,
        analysis_id: Uuid,
    ) -> DeleteResult {
        self.authorize(
            opctx,
            Action::Delete,
            ResourceType::Analysis,
            analysis_id,
        )?;
        self.datastore.analysis_update_with(analysis_id, |analysis| {
            analysis.deleted_on = Some(Utc::now());
            Ok(())
        })?;
        self.datastore.log_delete(analysis_id);
        self.dispatcher
            .send(&QueueMessage::terminate_instance(analysis_id, "delete"), 0)
            .await?;
        self.datastore.instance_close(analysis_id);
        Ok(())
    }

    /// Deep-merges a log fragment into the analysis log and returns the
    /// merged document
    pub fn analysis_append_log(
        &self,
        opctx: &OpContext,
        analysis_id: Uuid,
        fragment: &Value,
    ) -> UpdateResult<Value> {
        let profile = self.actor_profile(opctx)?;
        let snapshot = self
            .datastore
            .access_snapshot(&profile, ResourceType::Analysis, analysis_id)
            .map_err(|_| {
                Error::invalid_request(&format!(
                    "no analysis found with id {}",
                    analysis_id
                ))
            })?;
        self.authz.authorize(&snapshot, Action::Modify)?;
        self.datastore.log_merge(analysis_id, fragment)
    }

    /// Re-runs an analysis selected by id or by genome: resets its status
    /// and outputs and dispatches the restart intent
    pub async fn analysis_reanalyze(
        &self,
        opctx: &OpContext,
        request: &ReanalyzeRequest,
    ) -> UpdateResult<Analysis> {
        let profile = self.actor_profile(opctx)?;
        let analysis = match (request.analysis_id, request.genome_id) {
            (Some(analysis_id), _) => self
                .datastore
                .analysis_fetch(analysis_id)
                .map_err(|_| {
                    Error::invalid_request(&format!(
                        "no analysis found with id {}",
                        analysis_id
                    ))
                })?,
            (None, Some(genome_id)) => self
                .datastore
                .analysis_by_genome(genome_id, profile.id)
                .ok_or_else(|| {
                    Error::invalid_request(&format!(
                        "no analysis found for genome {}",
                        genome_id
                    ))
                })?,
            (None, None) => {
                return Err(Error::invalid_request(
                    "analysis_id or genome_id is required",
                ));
            }
        };
        if analysis.deleted_on.is_some() {
            return Err(Error::invalid_request(&format!(
                "analysis {} is deleted",
                analysis.id
            )));
        }
        let snapshot = self.datastore.access_snapshot(
            &profile,
            ResourceType::Analysis,
            analysis.id,
        )?;
        self.authz.authorize(&snapshot, Action::Modify)?;

        let source = request
            .source
            .clone()
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let updated =
            self.datastore.analysis_update_with(analysis.id, |analysis| {
                analysis.status = AnalysisState::WaitingInQueue;
                analysis.scheduled_on = Some(Utc::now());
                analysis.started_on = None;
                analysis.completed_on = None;
                deep_merge(&mut analysis.meta, &json!({ "source": source }));
                analysis.files.clear();
                Ok(analysis.clone())
            })?;
        self.datastore.log_reset(analysis.id);

        let delay = if source == PRIMARY_WEBAPP_SOURCE {
            0
        } else {
            REANALYZE_DELAY_SECONDS
        };
        self.dispatcher
            .send(
                &QueueMessage::restart(
                    analysis.id,
                    request.instance_type.clone(),
                    !profile.is_superuser,
                ),
                delay,
            )
            .await?;
        self.datastore.instance_open(
            analysis.id,
            request.instance_type.as_deref().unwrap_or(DEFAULT_INSTANCE_TYPE),
        );
        Ok(updated)
    }

    /// Terminates a started or running analysis
    ///
    /// Both the workflow run and the compute instance must be stopped
    /// before the status flips to `abort`; if either external call fails
    /// the status is left unchanged and the failure surfaces to the caller.
    pub async fn analysis_terminate(
        &self,
        opctx: &OpContext,
        analysis_id: Uuid,
        source: &str,
    ) -> UpdateResult<Analysis> {
        let profile = self.actor_profile(opctx)?;
        let analysis =
            self.datastore.analysis_fetch(analysis_id).map_err(|_| {
                Error::invalid_request(&format!(
                    "no analysis found with id {}",
                    analysis_id
                ))
            })?;
        let snapshot = self.datastore.access_snapshot(
            &profile,
            ResourceType::Analysis,
            analysis_id,
        )?;
        self.authz.authorize(&snapshot, Action::Modify)?;
        lifecycle::verify_terminatable(analysis.status)?;

        let host = self.datastore.host_fetch(analysis.host_id)?;
        self.workflow
            .terminate(&workflow_run_key(&host.domain, analysis_id))
            .await?;
        self.dispatcher
            .send(
                &QueueMessage::terminate_instance(analysis_id, "terminate"),
                0,
            )
            .await?;

        let mut notification = None;
        let updated =
            self.datastore.analysis_update_with(analysis_id, |analysis| {
                lifecycle::verify_terminatable(analysis.status)?;
                notification = lifecycle::status_change_notification(
                    analysis.status,
                    AnalysisState::Abort,
                );
                analysis.status = AnalysisState::Abort;
                analysis.completed_on = Some(Utc::now());
                Ok(analysis.clone())
            })?;
        if let Err(error) = self.datastore.log_merge(
            analysis_id,
            &json!({
                "infra": [{
                    "display_in_report_view": false,
                    "level": "info",
                    "msg": format!(
                        "Analysis terminated after receiving request from {}",
                        source
                    ),
                }],
            }),
        ) {
            warn!(opctx.log, "failed to record termination in analysis log";
                "analysis_id" => analysis_id.to_string(),
                "error" => %error,
            );
        }
        self.datastore.instance_close(analysis_id);
        if let Some(kind) = notification {
            self.notify_status_edge(opctx, &updated, kind).await;
        }
        Ok(updated)
    }

    /// Resolves the owner's active project, creating the default project on
    /// demand
    fn active_project_for(
        &self,
        user: &crate::db::model::User,
    ) -> Result<Project, Error> {
        let active = user
            .active_project
            .and_then(|project_id| {
                self.datastore.project_fetch(project_id).ok()
            })
            .filter(|project| project.deleted_on.is_none());
        if let Some(project) = active {
            return Ok(project);
        }
        let project = self.datastore.project_create(Project {
            id: Uuid::new_v4(),
            name: DEFAULT_PROJECT_NAME.to_string(),
            owner_id: Some(user.id),
            visibility: Visibility::Private,
            shared_with: Vec::new(),
            time_created: Utc::now(),
            deleted_on: None,
        });
        self.datastore.user_set_active_project(user.id, project.id);
        Ok(project)
    }

    /// Fans out the notification called for by a committed terminal-status
    /// edge; delivery failures are logged, never surfaced
    async fn notify_status_edge(
        &self,
        opctx: &OpContext,
        analysis: &Analysis,
        kind: NotificationKind,
    ) {
        let host = match self.datastore.host_fetch(analysis.host_id) {
            Ok(host) => host,
            Err(error) => {
                warn!(self.log, "no host for analysis notification";
                    "analysis_id" => analysis.id.to_string(),
                    "error" => %error,
                );
                return;
            }
        };
        let target = match kind {
            NotificationKind::Completed => host.config.on_complete,
            NotificationKind::Failed { .. } => host.config.on_fail,
        };
        let owner = analysis
            .owner_id
            .and_then(|owner_id| self.datastore.user_fetch(owner_id).ok());
        let managers = self.datastore.host_managers(host.id);
        let Some(notification) = plan_notification(
            target,
            &kind,
            analysis,
            owner.as_ref(),
            &managers,
            &host.contact_email,
        ) else {
            return;
        };
        if let Err(error) = self.notifier.send(&notification).await {
            warn!(opctx.log, "notification delivery failed";
                "analysis_id" => analysis.id.to_string(),
                "error" => %error,
            );
        }
    }
}

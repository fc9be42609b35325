// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared harness for integration tests: a [`Workbench`] wired to
//! simulated collaborators and an in-memory datastore

use chrono::Utc;
use petri_workbench::app::AnalysisCreate;
use petri_workbench::config::Config;
use petri_workbench::config::ExecutionMode;
use petri_workbench::config::HostConfig;
use petri_workbench::db::model::Host;
use petri_workbench::db::model::User;
use petri_workbench::db::DataStore;
use petri_workbench::external::SimSigner;
use petri_workbench::external::SimWorkflowEngine;
use petri_workbench::notify::SimNotifier;
use petri_workbench::queue::SimQueue;
use petri_workbench::OpContext;
use petri_workbench::Workbench;
use std::sync::Arc;
use uuid::Uuid;

pub const TEST_DOMAIN: &str = "app.petri.test";
pub const HOST_CONTACT: &str = "ops@petri.test";

pub struct TestContext {
    pub workbench: Workbench,
    pub datastore: Arc<DataStore>,
    pub queue: Arc<SimQueue>,
    pub workflow: Arc<SimWorkflowEngine>,
    pub signer: Arc<SimSigner>,
    pub notifier: Arc<SimNotifier>,
    pub host: Host,
    pub log: slog::Logger,
}

pub fn logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

pub fn test_context() -> TestContext {
    test_context_with_mode(ExecutionMode::Test)
}

pub fn test_context_with_mode(mode: ExecutionMode) -> TestContext {
    let log = logger();
    let datastore = Arc::new(DataStore::new());
    let queue = Arc::new(SimQueue::new());
    let workflow = Arc::new(SimWorkflowEngine::new());
    let signer = Arc::new(SimSigner::new());
    let notifier = Arc::new(SimNotifier::new());
    let host = datastore.host_create(Host {
        id: Uuid::new_v4(),
        domain: TEST_DOMAIN.to_string(),
        contact_email: HOST_CONTACT.to_string(),
        config: HostConfig::default(),
    });
    let workbench = Workbench::new(
        &log,
        Config { mode, default_domain: TEST_DOMAIN.to_string() },
        datastore.clone(),
        queue.clone(),
        workflow.clone(),
        signer.clone(),
        notifier.clone(),
    );
    TestContext {
        workbench,
        datastore,
        queue,
        workflow,
        signer,
        notifier,
        host,
        log,
    }
}

impl TestContext {
    /// Replaces the test host's config in place
    pub fn set_host_config(&self, config: HostConfig) {
        self.datastore.host_create(Host {
            id: self.host.id,
            domain: self.host.domain.clone(),
            contact_email: self.host.contact_email.clone(),
            config,
        });
    }
}

pub fn create_user(ctx: &TestContext) -> User {
    ctx.datastore.user_create(User {
        id: Uuid::new_v4(),
        email: format!("{}@petri.test", Uuid::new_v4()),
        is_superuser: false,
        is_active: true,
        notify_on_analysis_status: true,
        active_project: None,
        time_created: Utc::now(),
        deleted_on: None,
    })
}

pub fn create_superuser(ctx: &TestContext) -> User {
    let mut user = create_user(ctx);
    user.is_superuser = true;
    ctx.datastore.user_create(user)
}

pub fn opctx_for(ctx: &TestContext, user: &User) -> OpContext {
    OpContext::for_user(&ctx.log, user.id)
}

pub fn service_opctx(ctx: &TestContext) -> OpContext {
    OpContext::for_service(&ctx.log, "decider")
}

/// A minimal analysis-create request for `workflow` over the given samples
pub fn analysis_params(workflow: &str, sample_ids: &[Uuid]) -> AnalysisCreate {
    AnalysisCreate {
        name: None,
        workflow_name: workflow.to_string(),
        project_ids: Vec::new(),
        sample_ids: sample_ids.to_vec(),
        control_ids: Vec::new(),
        params: serde_json::json!({}),
        meta: None,
        genome_id: None,
        source: None,
        domain: None,
        instance_type: None,
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Seams to external services: the workflow engine and the object-storage
//! URL signer
//!
//! Both are collaborators the control plane calls but does not implement.
//! The simulated versions here back the test suite.

use async_trait::async_trait;
use petri_common::api::Error;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use uuid::Uuid;

/// The key identifying an analysis's workflow run to the workflow engine
///
/// Dots in the domain are folded to underscores so the key stays valid for
/// the engine's naming rules.
pub fn workflow_run_key(domain: &str, analysis_id: Uuid) -> String {
    format!("{}-analysis-{}", domain.replace('.', "_"), analysis_id)
}

/// The external workflow-execution engine
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Requests termination of the given workflow run.  Failure means the
    /// run may still be executing; callers must not act as though it
    /// stopped.
    async fn terminate(&self, run_key: &str) -> Result<(), Error>;
}

/// Signs object-storage paths into time-limited URLs
pub trait StorageSigner: Send + Sync {
    fn get_self_signed(
        &self,
        path: &str,
        ttl_seconds: u64,
    ) -> Result<String, Error>;
}

/// Simulated workflow engine recording terminated run keys
pub struct SimWorkflowEngine {
    terminated: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl SimWorkflowEngine {
    pub fn new() -> SimWorkflowEngine {
        SimWorkflowEngine {
            terminated: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }
}

impl Default for SimWorkflowEngine {
    fn default() -> Self {
        SimWorkflowEngine::new()
    }
}

#[async_trait]
impl WorkflowEngine for SimWorkflowEngine {
    async fn terminate(&self, run_key: &str) -> Result<(), Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::unavail("workflow engine unreachable"));
        }
        self.terminated.lock().unwrap().push(run_key.to_string());
        Ok(())
    }
}

/// Simulated signer producing deterministic URLs, with per-path failure
/// injection
pub struct SimSigner {
    fail_paths: Mutex<BTreeSet<String>>,
    signed: Mutex<Vec<String>>,
}

impl SimSigner {
    pub fn new() -> SimSigner {
        SimSigner {
            fail_paths: Mutex::new(BTreeSet::new()),
            signed: Mutex::new(Vec::new()),
        }
    }

    /// Makes signing fail for the given path
    pub fn fail_path(&self, path: &str) {
        self.fail_paths.lock().unwrap().insert(path.to_string());
    }

    /// The paths signed so far, in order
    pub fn signed(&self) -> Vec<String> {
        self.signed.lock().unwrap().clone()
    }
}

impl Default for SimSigner {
    fn default() -> Self {
        SimSigner::new()
    }
}

impl StorageSigner for SimSigner {
    fn get_self_signed(
        &self,
        path: &str,
        ttl_seconds: u64,
    ) -> Result<String, Error> {
        if self.fail_paths.lock().unwrap().contains(path) {
            return Err(Error::unavail("signing failed"));
        }
        self.signed.lock().unwrap().push(path.to_string());
        Ok(format!("https://signed.example/{}?ttl={}", path, ttl_seconds))
    }
}

#[cfg(test)]
mod test {
    use super::workflow_run_key;
    use uuid::Uuid;

    #[test]
    fn test_workflow_run_key_folds_domain_dots() {
        let analysis_id = Uuid::new_v4();
        assert_eq!(
            workflow_run_key("app.example.org", analysis_id),
            format!("app_example_org-analysis-{}", analysis_id)
        );
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Queue dispatch: the seam between accepted transitions and the compute
//! fleet
//!
//! Delivery is at least once; the dispatcher sends at most one intent per
//! accepted transition and leaves de-duplication to the workers.  "Sent"
//! means "accepted by the queue", nothing more.

use async_trait::async_trait;
use petri_common::api::Error;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::Logger;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use uuid::Uuid;

/// The intents a dispatch can carry
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum QueueAction {
    StartAnalysis,
    RestartAnalysis,
    TerminateInstance,
}

/// One message on the analysis queue
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct QueueMessage {
    pub action: QueueAction,
    pub analysis_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_completion_email: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl QueueMessage {
    pub fn start(analysis_id: Uuid, host: &str) -> QueueMessage {
        QueueMessage {
            action: QueueAction::StartAnalysis,
            analysis_id,
            host: Some(host.to_string()),
            force: None,
            instance_type: None,
            send_completion_email: None,
            mode: None,
            name: None,
        }
    }

    pub fn restart(
        analysis_id: Uuid,
        instance_type: Option<String>,
        send_completion_email: bool,
    ) -> QueueMessage {
        QueueMessage {
            action: QueueAction::RestartAnalysis,
            analysis_id,
            host: None,
            force: Some(true),
            instance_type,
            send_completion_email: Some(send_completion_email),
            mode: None,
            name: None,
        }
    }

    pub fn terminate_instance(analysis_id: Uuid, mode: &str) -> QueueMessage {
        QueueMessage {
            action: QueueAction::TerminateInstance,
            analysis_id,
            host: None,
            force: None,
            instance_type: None,
            send_completion_email: None,
            mode: Some(mode.to_string()),
            name: Some(format!("{}-{}", mode, analysis_id)),
        }
    }
}

/// Client for the external message queue
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Submits a message for delivery after `delay_seconds`.  Returns once
    /// the queue has accepted the message.
    async fn send(
        &self,
        message: &QueueMessage,
        delay_seconds: u64,
    ) -> Result<(), Error>;
}

/// Thin adapter between accepted transitions and the queue client
pub struct Dispatcher {
    log: Logger,
    client: Arc<dyn QueueClient>,
}

impl Dispatcher {
    pub fn new(log: &Logger, client: Arc<dyn QueueClient>) -> Dispatcher {
        Dispatcher {
            log: log.new(slog::o!("component" => "dispatcher")),
            client,
        }
    }

    pub async fn send(
        &self,
        message: &QueueMessage,
        delay_seconds: u64,
    ) -> Result<(), Error> {
        debug!(self.log, "dispatching queue message";
            "action" => ?message.action,
            "analysis_id" => message.analysis_id.to_string(),
            "delay_seconds" => delay_seconds,
        );
        self.client.send(message, delay_seconds).await
    }
}

/// An in-process queue client that records what was sent
///
/// Used by the test suite in place of the real queue.
pub struct SimQueue {
    sent: Mutex<Vec<(QueueMessage, u64)>>,
    fail: AtomicBool,
}

impl SimQueue {
    pub fn new() -> SimQueue {
        SimQueue { sent: Mutex::new(Vec::new()), fail: AtomicBool::new(false) }
    }

    /// Makes subsequent sends fail (or succeed again)
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(QueueMessage, u64)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for SimQueue {
    fn default() -> Self {
        SimQueue::new()
    }
}

#[async_trait]
impl QueueClient for SimQueue {
    async fn send(
        &self,
        message: &QueueMessage,
        delay_seconds: u64,
    ) -> Result<(), Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::unavail("queue send failed"));
        }
        self.sent.lock().unwrap().push((message.clone(), delay_seconds));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::QueueMessage;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_message_serialization_omits_unset_fields() {
        let analysis_id = Uuid::new_v4();
        let message = QueueMessage::start(analysis_id, "app.example.org");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "action": "start-analysis",
                "analysis_id": analysis_id,
                "host": "app.example.org",
            })
        );

        let message = QueueMessage::restart(
            analysis_id,
            Some("highmem".to_string()),
            false,
        );
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "action": "restart-analysis",
                "analysis_id": analysis_id,
                "force": true,
                "instance_type": "highmem",
                "send_completion_email": false,
            })
        );

        let message = QueueMessage::terminate_instance(analysis_id, "delete");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "action": "terminate-instance",
                "analysis_id": analysis_id,
                "mode": "delete",
                "name": format!("delete-{}", analysis_id),
            })
        );
    }
}

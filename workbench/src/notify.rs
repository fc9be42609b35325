// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Completion and failure notifications
//!
//! [`plan_notification`] turns a host's notification policy plus the
//! status-change edge into at most one concrete [`Notification`];
//! rendering and delivery live behind the [`Notifier`] trait.  Delivery
//! failures never fail the triggering operation.

use async_trait::async_trait;
use petri_common::api::Error;
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::NotifyTarget;
use crate::db::model::Analysis;
use crate::db::model::User;
use crate::lifecycle::NotificationKind;

/// One email to send about an analysis reaching a terminal status
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub to: String,
    pub cc: Vec<String>,
    pub analysis_id: Uuid,
    pub analysis_name: String,
    /// "completed", "failed", or "aborted"
    pub run_status: String,
    /// Host-contact notifications omit result links, since the contact may
    /// not hold access to the analysis itself.
    pub include_links: bool,
}

/// Delivers notifications; rendering is the implementation's concern
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), Error>;
}

/// Resolves the host's policy into a concrete notification, or `None` when
/// policy or recipient opt-outs suppress it
pub fn plan_notification(
    target: NotifyTarget,
    kind: &NotificationKind,
    analysis: &Analysis,
    owner: Option<&User>,
    host_managers: &[User],
    host_contact: &str,
) -> Option<Notification> {
    let base = |to: String, cc: Vec<String>, include_links: bool| {
        Notification {
            to,
            cc,
            analysis_id: analysis.id,
            analysis_name: analysis.name.clone(),
            run_status: kind.run_status().to_string(),
            include_links,
        }
    };
    let opted_in_owner = owner.filter(|user| user.notify_on_analysis_status);
    match target {
        NotifyTarget::None => None,
        NotifyTarget::Owner => {
            opted_in_owner.map(|user| base(user.email.clone(), Vec::new(), true))
        }
        NotifyTarget::Admin => {
            let mut recipients: Vec<String> = host_managers
                .iter()
                .filter(|user| user.notify_on_analysis_status)
                .filter(|user| Some(user.id) != owner.map(|o| o.id))
                .map(|user| user.email.clone())
                .collect();
            match opted_in_owner {
                Some(user) => {
                    Some(base(user.email.clone(), recipients, true))
                }
                None if !recipients.is_empty() => {
                    let to = recipients.remove(0);
                    Some(base(to, recipients, true))
                }
                None => None,
            }
        }
        NotifyTarget::HostContact => {
            Some(base(host_contact.to_string(), Vec::new(), false))
        }
    }
}

/// Recording notifier for the test suite
pub struct SimNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl SimNotifier {
    pub fn new() -> SimNotifier {
        SimNotifier { sent: Mutex::new(Vec::new()) }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for SimNotifier {
    fn default() -> Self {
        SimNotifier::new()
    }
}

#[async_trait]
impl Notifier for SimNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), Error> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::plan_notification;
    use crate::config::NotifyTarget;
    use crate::db::datastore::test::make_analysis;
    use crate::db::datastore::test::make_user;
    use crate::db::DataStore;
    use crate::lifecycle::NotificationKind;

    #[test]
    fn test_policy_none_suppresses() {
        let store = DataStore::new();
        let owner = make_user(&store);
        let analysis = make_analysis(&store, &owner, &[]);
        assert_eq!(
            plan_notification(
                NotifyTarget::None,
                &NotificationKind::Completed,
                &analysis,
                Some(&owner),
                &[],
                "ops@example.org",
            ),
            None
        );
    }

    #[test]
    fn test_owner_gated_on_opt_in() {
        let store = DataStore::new();
        let mut owner = make_user(&store);
        let analysis = make_analysis(&store, &owner, &[]);

        let notification = plan_notification(
            NotifyTarget::Owner,
            &NotificationKind::Failed { run_status: "aborted" },
            &analysis,
            Some(&owner),
            &[],
            "ops@example.org",
        )
        .unwrap();
        assert_eq!(notification.to, owner.email);
        assert_eq!(notification.run_status, "aborted");
        assert!(notification.include_links);

        owner.notify_on_analysis_status = false;
        assert_eq!(
            plan_notification(
                NotifyTarget::Owner,
                &NotificationKind::Completed,
                &analysis,
                Some(&owner),
                &[],
                "ops@example.org",
            ),
            None
        );
    }

    #[test]
    fn test_admin_ccs_opted_in_managers() {
        let store = DataStore::new();
        let owner = make_user(&store);
        let manager = make_user(&store);
        let mut opted_out = make_user(&store);
        opted_out.notify_on_analysis_status = false;
        let analysis = make_analysis(&store, &owner, &[]);

        let notification = plan_notification(
            NotifyTarget::Admin,
            &NotificationKind::Completed,
            &analysis,
            Some(&owner),
            &[manager.clone(), opted_out],
            "ops@example.org",
        )
        .unwrap();
        assert_eq!(notification.to, owner.email);
        assert_eq!(notification.cc, vec![manager.email]);
    }

    #[test]
    fn test_host_contact_gets_link_free_variant() {
        let store = DataStore::new();
        let owner = make_user(&store);
        let analysis = make_analysis(&store, &owner, &[]);

        let notification = plan_notification(
            NotifyTarget::HostContact,
            &NotificationKind::Failed { run_status: "failed" },
            &analysis,
            Some(&owner),
            &[],
            "ops@example.org",
        )
        .unwrap();
        assert_eq!(notification.to, "ops@example.org");
        assert!(!notification.include_links);
    }
}

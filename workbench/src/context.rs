// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared state available to all operations

use petri_auth::authn;
use slog::Logger;
use uuid::Uuid;

/// Provides context for an operation
///
/// Every operation entry point takes an `OpContext` carrying a logger
/// annotated with the actor's identity and the authentication context used
/// for authorization checks.  Contexts are cheap to construct, one per
/// inbound action.
pub struct OpContext {
    pub log: Logger,
    pub authn: authn::Context,
}

impl OpContext {
    /// Returns a context for an operation performed by the given registered
    /// user
    pub fn for_user(log: &Logger, user_id: Uuid) -> OpContext {
        OpContext {
            log: log.new(slog::o!("actor_id" => user_id.to_string())),
            authn: authn::Context::for_user(user_id),
        }
    }

    /// Returns a context for an operation performed by an internal service
    /// component (e.g., the workflow decider posting log fragments)
    pub fn for_service(log: &Logger, service: &'static str) -> OpContext {
        OpContext {
            log: log.new(slog::o!("actor_service" => service)),
            authn: authn::Context::for_service(service),
        }
    }

    /// Returns a context for unauthenticated background work
    pub fn for_background(log: &Logger) -> OpContext {
        OpContext {
            log: log.clone(),
            authn: authn::Context::internal_unauthenticated(),
        }
    }
}

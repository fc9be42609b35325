// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authentication facilities
//!
//! This module includes generic, HTTP-agnostic facilities for representing
//! who or what is authenticated.  Every operation in the control plane
//! carries a [`Context`] describing the actor on whose behalf the operation
//! runs.  Operations may also run on behalf of internal services (for
//! example the workflow decider posting log fragments), which are
//! represented by [`Actor::Service`] and are not subject to per-resource
//! share grants.

use petri_common::api::Error;
use uuid::Uuid;

/// Describes how the actor performing the current operation is authenticated
///
/// This is HTTP-agnostic.  Subsystems could create contexts for purposes
/// unrelated to HTTP (e.g., background jobs).
#[derive(Clone, Debug)]
pub struct Context {
    /// Describes whether the user is authenticated and provides more
    /// information that's specific to whether they're authenticated or not
    kind: Kind,
}

impl Context {
    /// Returns the authenticated actor, if any
    pub fn actor(&self) -> Option<&Actor> {
        self.actor_required().ok()
    }

    /// Returns the authenticated actor if present or an Unauthenticated
    /// error otherwise
    pub fn actor_required(&self) -> Result<&Actor, Error> {
        match &self.kind {
            Kind::Authenticated(Details { actor }) => Ok(actor),
            Kind::Unauthenticated => Err(Error::Unauthenticated {
                internal_message: "actor required".to_string(),
            }),
        }
    }

    /// Returns an unauthenticated context for use internally
    pub fn internal_unauthenticated() -> Context {
        Context { kind: Kind::Unauthenticated }
    }

    /// Returns an authenticated context for the given registered user
    pub fn for_user(user_id: Uuid) -> Context {
        Context {
            kind: Kind::Authenticated(Details {
                actor: Actor::User { user_id },
            }),
        }
    }

    /// Returns an authenticated context for an internal service (e.g., the
    /// workflow decider)
    pub fn for_service(service: &'static str) -> Context {
        Context {
            kind: Kind::Authenticated(Details {
                actor: Actor::Service { service },
            }),
        }
    }
}

/// Describes whether the user is authenticated
#[derive(Clone, Debug)]
enum Kind {
    /// Client successfully authenticated
    Authenticated(Details),
    /// Client did not attempt to authenticate
    Unauthenticated,
}

/// Describes who is authenticated
#[derive(Clone, Debug)]
struct Details {
    /// the actor performing the request
    actor: Actor,
}

/// Who is performing an operation
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Actor {
    /// A registered user
    User { user_id: Uuid },
    /// An internal service component
    Service { service: &'static str },
}

impl Actor {
    /// Returns the user id if this actor is a registered user
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::User { user_id } => Some(*user_id),
            Actor::Service { .. } => None,
        }
    }

    /// Returns true for internal service actors
    pub fn is_service(&self) -> bool {
        matches!(self, Actor::Service { .. })
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authentication and authorization for the petri control plane
//!
//! See the [`authz`] module documentation for how authorization decisions
//! are made.

pub mod authn;
pub mod authz;

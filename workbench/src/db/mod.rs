// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Datastore: records, resource-graph queries, and the share registry

pub mod datastore;
pub mod model;
pub mod shares;

pub use datastore::DataStore;

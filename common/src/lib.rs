// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types and interfaces shared by the petri control plane components
//!
//! This crate is the bottom of the dependency graph: everything here is
//! agnostic to how requests arrive (HTTP or otherwise) and to how data is
//! persisted.

pub mod api;

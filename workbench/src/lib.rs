// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The petri control plane
//!
//! This crate ties the pieces together: the in-memory datastore and share
//! registry ([`db`]), the analysis lifecycle state machine ([`lifecycle`]),
//! the queue dispatcher ([`queue`]), the notification fan-out ([`notify`]),
//! the external-service seams ([`external`]), and the operation entry points
//! on [`Workbench`].

pub mod app;
pub mod config;
pub mod context;
pub mod db;
pub mod external;
pub mod lifecycle;
pub mod notify;
pub mod queue;

pub use app::Workbench;
pub use context::OpContext;

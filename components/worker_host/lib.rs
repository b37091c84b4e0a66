/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! The worker scheduler: the process-wide coordinator that decides, for
//! every worker creation or lookup request, whether an existing worker
//! can be reused, whether a new one may be admitted given resource
//! limits, and which child process should host it. It is the only
//! component with cross-cutting visibility into all live worker
//! processes.

mod policy;
mod process;
mod scheduler;

pub use crate::policy::{PlacementPolicy, SchedulerConfig};
pub use crate::scheduler::{SharedWorkerLookup, WorkerScheduler};

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Placement policy and resource-limit configuration. The policy is
//! chosen once at startup and injected into the scheduler, rather than
//! consulted from global flags at each call site.

use url::{Host, Url};

/// Decides which process hosts a newly admitted worker.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PlacementPolicy {
    /// Create a new process per worker until there is one process per
    /// logical core, then route to the least-loaded live process.
    /// Never queues.
    FillUpCores,
    /// Reuse a process already hosting a worker from the same
    /// registrable domain; below the process ceiling create a new one,
    /// at the ceiling fall back to the least-loaded process. Never
    /// queues.
    ShareByDomain,
    /// Every worker gets its own process, subject to admission control;
    /// inadmissible requests are queued and retried when a process
    /// terminates.
    #[default]
    ProcessPerWorker,
}

/// Limits and policy for a scheduler, fixed at construction.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub policy: PlacementPolicy,
    /// Global cap on simultaneously running workers under
    /// `ProcessPerWorker`.
    pub max_workers: usize,
    /// Cap on workers attributed to one (page, view) pair under
    /// `ProcessPerWorker`.
    pub max_workers_per_page: usize,
    /// Process ceiling under `ShareByDomain`.
    pub max_processes_when_sharing: usize,
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig {
            policy: PlacementPolicy::default(),
            max_workers: 64,
            max_workers_per_page: 16,
            max_processes_when_sharing: 10,
        }
    }
}

/// Registries under which sites commonly register one level down, so
/// that e.g. `a.example.co.uk` and `b.example.co.uk` group together.
const SECOND_LEVEL_REGISTRIES: &[&str] = &["ac", "co", "com", "edu", "gov", "net", "org"];

/// The eTLD+1-style domain used to group workers by site. This is an
/// approximation over the host labels rather than a full public suffix
/// list lookup: known second-level registries under two-letter TLDs keep
/// one extra label. IP addresses and hostless URLs yield `None`, so they
/// never group with each other.
pub(crate) fn registrable_domain(url: &Url) -> Option<String> {
    let host = match url.host() {
        Some(Host::Domain(domain)) => domain,
        _ => return None,
    };
    let labels: Vec<&str> = host
        .trim_end_matches('.')
        .split('.')
        .filter(|label| !label.is_empty())
        .collect();
    let count = labels.len();
    if count < 2 {
        return None;
    }
    let take = if count >= 3 &&
        labels[count - 1].len() == 2 &&
        SECOND_LEVEL_REGISTRIES.contains(&labels[count - 2])
    {
        3
    } else {
        2
    };
    Some(labels[count - take..].join("."))
}

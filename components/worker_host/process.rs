/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The scheduler's table of live worker processes. Entries are referred
//! to by `WorkerProcessId` handle everywhere else in the crate, so that
//! teardown order never depends on pointer bookkeeping.

use worker_traits::{ConnectionId, WorkerProcessHost, WorkerProcessId};

pub(crate) struct ProcessEntry {
    id: WorkerProcessId,
    /// The connection handle the embedder assigned to this process;
    /// nested workers created from within it appear under this sender.
    connection: ConnectionId,
    host: Box<dyn WorkerProcessHost>,
}

impl ProcessEntry {
    pub(crate) fn connection(&self) -> ConnectionId {
        self.connection
    }
}

#[derive(Default)]
pub(crate) struct ProcessTable {
    next_process_id: u32,
    entries: Vec<ProcessEntry>,
}

impl ProcessTable {
    pub(crate) fn new() -> ProcessTable {
        ProcessTable::default()
    }

    pub(crate) fn add(
        &mut self,
        connection: ConnectionId,
        host: Box<dyn WorkerProcessHost>,
    ) -> WorkerProcessId {
        let id = WorkerProcessId(self.next_process_id);
        self.next_process_id += 1;
        self.entries.push(ProcessEntry {
            id,
            connection,
            host,
        });
        id
    }

    pub(crate) fn remove(&mut self, id: WorkerProcessId) -> Option<ProcessEntry> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn get_mut(
        &mut self,
        id: WorkerProcessId,
    ) -> Option<&mut (dyn WorkerProcessHost + '_)> {
        // A `match` rather than `Option::map` so the unsized coercion
        // shortening the trait-object lifetime has a site to apply at.
        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => Some(&mut *entry.host),
            None => None,
        }
    }

    /// Enumerates processes in creation order; placement tie-breaks rely
    /// on this being stable.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (WorkerProcessId, &dyn WorkerProcessHost)> {
        self.entries.iter().map(|entry| (entry.id, &*entry.host))
    }

    pub(crate) fn iter_mut<'a>(
        &'a mut self,
    ) -> impl Iterator<Item = (WorkerProcessId, &'a mut (dyn WorkerProcessHost + 'a))> {
        self.entries
            .iter_mut()
            .map(|entry| -> (WorkerProcessId, &'a mut (dyn WorkerProcessHost + 'a)) {
                (entry.id, &mut *entry.host)
            })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

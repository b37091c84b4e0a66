/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The `WorkerScheduler` mediates every worker creation, lookup, detach,
//! and teardown event. It runs single-threaded and run-to-completion:
//! each entry point executes fully in response to one inbound event,
//! with no locking and no internal suspension. Dispatching work to a
//! process host is fire-and-forget; completion is reported back through
//! the lifecycle entry points.

use crossbeam_channel::Sender;
use log::{debug, warn};
use rustc_hash::FxHashMap;
use url::Url;
use worker_traits::{
    ClientWorkerId, ConnectionId, DocumentId, PageId, RequestContext, ResourceCacheHostId,
    ResourceCacheId, ViewId, WorkerClientMsg, WorkerId, WorkerInstance, WorkerProcessFactory,
    WorkerProcessId, WorkerScriptMsg,
};

use crate::policy::{registrable_domain, PlacementPolicy, SchedulerConfig};
use crate::process::ProcessTable;

/// The outcome of a shared-worker lookup.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SharedWorkerLookup {
    /// Whether a running instance was found. A miss is not an error:
    /// the lookup leaves a pending placeholder behind so that the
    /// caller attaches once the worker is created.
    pub found: bool,
    /// The requested URL did not equal the URL of the instance (or
    /// placeholder) registered under this name. The caller was not
    /// attached.
    pub url_mismatch: bool,
}

pub struct WorkerScheduler {
    config: SchedulerConfig,
    factory: Box<dyn WorkerProcessFactory>,
    processes: ProcessTable,
    /// Instances that failed admission control, awaiting headroom.
    queued_workers: Vec<WorkerInstance>,
    /// Placeholders for shared workers that have been looked up but not
    /// yet created, keyed by (url, name, private) identity.
    pending_shared_workers: Vec<WorkerInstance>,
    /// Senders back to each client connection, for acknowledgments.
    connections: FxHashMap<ConnectionId, Sender<WorkerClientMsg>>,
    next_worker_id: u32,
}

impl WorkerScheduler {
    pub fn new(config: SchedulerConfig, factory: Box<dyn WorkerProcessFactory>) -> WorkerScheduler {
        WorkerScheduler {
            config,
            factory,
            processes: ProcessTable::new(),
            queued_workers: Vec::new(),
            pending_shared_workers: Vec::new(),
            connections: FxHashMap::default(),
            next_worker_id: 0,
        }
    }

    /// Register the sender over which a client connection receives
    /// worker acknowledgments. Dropped again on `connection_shutdown`.
    pub fn register_connection(
        &mut self,
        connection: ConnectionId,
        sender: Sender<WorkerClientMsg>,
    ) {
        self.connections.insert(connection, sender);
    }

    /// Allocate a worker handle, unique for the lifetime of the
    /// scheduler.
    pub fn next_worker_id(&mut self) -> WorkerId {
        let id = WorkerId(self.next_worker_id);
        self.next_worker_id += 1;
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_dedicated_worker(
        &mut self,
        url: Url,
        private: bool,
        document: DocumentId,
        page: PageId,
        view: ViewId,
        connection: ConnectionId,
        client: ClientWorkerId,
        parent_process: Option<WorkerProcessId>,
        parent_cache_host: Option<ResourceCacheHostId>,
        request_context: RequestContext,
    ) -> bool {
        self.create_worker(
            url,
            false,
            private,
            String::new(),
            document,
            page,
            view,
            connection,
            client,
            parent_process,
            parent_cache_host,
            None,
            request_context,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_shared_worker(
        &mut self,
        url: Url,
        private: bool,
        name: String,
        document: DocumentId,
        page: PageId,
        view: ViewId,
        connection: ConnectionId,
        client: ClientWorkerId,
        main_resource_cache: Option<ResourceCacheId>,
        request_context: RequestContext,
    ) -> bool {
        self.create_worker(
            url,
            true,
            private,
            name,
            document,
            page,
            view,
            connection,
            client,
            None,
            None,
            main_resource_cache,
            request_context,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn create_worker(
        &mut self,
        url: Url,
        shared: bool,
        private: bool,
        name: String,
        document: DocumentId,
        page: PageId,
        view: ViewId,
        connection: ConnectionId,
        client: ClientWorkerId,
        parent_process: Option<WorkerProcessId>,
        parent_cache_host: Option<ResourceCacheHostId>,
        main_resource_cache: Option<ResourceCacheId>,
        request_context: RequestContext,
    ) -> bool {
        let worker_id = self.next_worker_id();
        let mut instance = WorkerInstance::new(
            url,
            shared,
            private,
            name,
            worker_id,
            parent_process,
            parent_cache_host,
            main_resource_cache,
            request_context,
        );
        instance.add_sender(connection, client);
        instance
            .document_set_mut()
            .add(connection, document, page, view);
        self.create_worker_from_instance(instance)
    }

    /// Runs placement and admission for an instance that already carries
    /// its documents and senders, then dispatches it to a process.
    /// Admission refusal is a deferral, not a failure: the instance is
    /// queued and the caller still sees success.
    fn create_worker_from_instance(&mut self, mut instance: WorkerInstance) -> bool {
        let mut reuse = None;
        match self.config.policy {
            PlacementPolicy::FillUpCores => reuse = self.process_to_fill_up_cores(),
            PlacementPolicy::ShareByDomain => reuse = self.process_for_domain(instance.url()),
            PlacementPolicy::ProcessPerWorker => {
                if !self.can_create_worker_process(&instance) {
                    debug!("queueing worker for {}", instance.url());
                    self.queued_workers.push(instance);
                    return true;
                }
            },
        }

        // Two pages may have raced to start the same shared worker.
        if instance.is_shared() {
            let sender_info = match instance.sole_sender() {
                Some(info) => info,
                None => {
                    warn!("shared worker create request carried no sender");
                    return false;
                },
            };

            if let Some((process, index)) = self.find_shared_worker(
                instance.url(),
                instance.name(),
                instance.is_private(),
            ) {
                // Already running: attach nothing new here. If the
                // requesting connection is not on the instance's sender
                // list, the worker it originally started has already
                // exited and this is a stale reference; refuse rather
                // than attach to the wrong incarnation.
                let stale = self
                    .running_instance(process, index)
                    .is_none_or(|existing| !existing.has_sender(sender_info.0, sender_info.1));
                if stale {
                    return false;
                }
                self.send_to_client(sender_info.0, WorkerClientMsg::WorkerCreated(sender_info.1));
                return true;
            }

            // Absorb the pending placeholder accumulated by lookups that
            // raced ahead of this creation.
            if let Some(index) = self.find_pending_index(
                instance.url(),
                instance.name(),
                instance.is_private(),
            ) {
                let pending = self.pending_shared_workers.remove(index);
                debug_assert!(!pending.document_set().is_empty());
                instance.merge_from(&pending);
            }

            // Dequeue any queued duplicates of this worker; each page
            // that independently attempted to queue it contributed
            // exactly one sender.
            let mut index = 0;
            while index < self.queued_workers.len() {
                if self.queued_workers[index].matches(
                    instance.url(),
                    instance.name(),
                    instance.is_private(),
                ) {
                    let queued = self.queued_workers.remove(index);
                    debug_assert_eq!(queued.num_senders(), 1);
                    instance.merge_from(&queued);
                } else {
                    index += 1;
                }
            }
        }

        let process = match reuse {
            Some(process) => process,
            None => {
                let context = match instance.request_context() {
                    Some(context) => context,
                    None => {
                        warn!("worker instance carried no request context");
                        return false;
                    },
                };
                match self.factory.create_process(context) {
                    Ok(new_process) => self.processes.add(new_process.connection, new_process.host),
                    Err(error) => {
                        warn!("worker process creation failed ({error})");
                        return false;
                    },
                }
            },
        };

        // Dispatch, then walk every accumulated sender and let it know
        // the worker exists (there can be several when queued or pending
        // duplicates were coalesced above).
        let senders = instance.senders().to_vec();
        match self.processes.get_mut(process) {
            Some(host) => host.create_worker(instance),
            None => {
                warn!("placement selected a dead worker process");
                return false;
            },
        }
        for (connection, client) in senders {
            self.send_to_client(connection, WorkerClientMsg::WorkerCreated(client));
        }
        true
    }

    /// Attach a document to a shared worker that may not be running yet.
    /// A miss creates a pending placeholder immediately, so that a later
    /// lookup under the same name with a different URL can be rejected
    /// before the real worker exists.
    #[allow(clippy::too_many_arguments)]
    pub fn lookup_shared_worker(
        &mut self,
        url: &Url,
        name: &str,
        private: bool,
        document: DocumentId,
        page: PageId,
        view: ViewId,
        connection: ConnectionId,
        client: ClientWorkerId,
    ) -> SharedWorkerLookup {
        if let Some((process, index)) = self.find_shared_worker(url, name, private) {
            let Some(host) = self.processes.get_mut(process) else {
                return SharedWorkerLookup::default();
            };
            let Some(instance) = host.instances_mut().get_mut(index) else {
                return SharedWorkerLookup::default();
            };
            if instance.url() != url {
                return SharedWorkerLookup {
                    found: false,
                    url_mismatch: true,
                };
            }
            instance.add_sender(connection, client);
            instance
                .document_set_mut()
                .add(connection, document, page, view);
            return SharedWorkerLookup {
                found: true,
                url_mismatch: false,
            };
        }

        let index = match self.find_pending_index(url, name, private) {
            Some(index) => index,
            None => {
                self.pending_shared_workers
                    .push(WorkerInstance::pending(url.clone(), name.to_owned(), private));
                self.pending_shared_workers.len() - 1
            },
        };
        let pending = &mut self.pending_shared_workers[index];
        if pending.url() != url {
            return SharedWorkerLookup {
                found: false,
                url_mismatch: true,
            };
        }
        pending.add_sender(connection, client);
        pending
            .document_set_mut()
            .add(connection, document, page, view);
        SharedWorkerLookup {
            found: false,
            url_mismatch: false,
        }
    }

    /// A single document navigated away or was unloaded without its
    /// whole connection dying. Every structure that could reference the
    /// document hears about it: live processes, the queue, and the
    /// pending table.
    pub fn document_detached(&mut self, connection: ConnectionId, document: DocumentId) {
        for (_, host) in self.processes.iter_mut() {
            host.document_detached(connection, document);
        }

        self.queued_workers.retain_mut(|instance| {
            instance.document_set_mut().remove(connection, document);
            !instance.document_set().is_empty()
        });

        self.pending_shared_workers.retain_mut(|instance| {
            instance.document_set_mut().remove(connection, document);
            !instance.document_set().is_empty()
        });
    }

    /// Withdraw a dedicated-worker create request that has not been
    /// acknowledged yet. If it is still queued nothing was ever started
    /// and the entry is dropped outright; if it was already dispatched,
    /// a destroyed notification is synthesized and routed to the hosting
    /// process as if the worker had reported its own exit.
    pub fn cancel_create_dedicated_worker(
        &mut self,
        connection: ConnectionId,
        client: ClientWorkerId,
    ) {
        if let Some(index) = self
            .queued_workers
            .iter()
            .position(|instance| instance.has_sender(connection, client))
        {
            debug_assert!(!self.queued_workers[index].is_shared());
            self.queued_workers.remove(index);
            return;
        }

        let dispatched = self.processes.iter().any(|(_, host)| {
            host.instances()
                .iter()
                .any(|instance| instance.has_sender(connection, client))
        });
        if dispatched {
            self.forward_message(WorkerScriptMsg::ContextDestroyed, client, connection);
            return;
        }

        debug_assert!(false, "couldn't find worker to cancel");
        warn!("cancel request for unknown worker from {connection:?}");
    }

    /// Route a message to whichever process hosts the instance the
    /// sender refers to.
    pub fn forward_message(
        &mut self,
        message: WorkerScriptMsg,
        route: ClientWorkerId,
        connection: ConnectionId,
    ) {
        for (_, host) in self.processes.iter_mut() {
            if host.filter_message(&message, route, connection) {
                return;
            }
        }
        debug!("no worker process claimed a message from {connection:?}");
    }

    /// The channel to a client process went away (its page or tab is
    /// gone). Every live process drops the connection's references, and
    /// queued and pending entries are stripped of its senders and
    /// documents, dying if nothing else holds them.
    pub fn connection_shutdown(&mut self, connection: ConnectionId) {
        self.connections.remove(&connection);

        for (_, host) in self.processes.iter_mut() {
            host.connection_shutdown(connection);
        }

        self.queued_workers.retain_mut(|instance| {
            instance.remove_senders(connection);
            instance.document_set_mut().remove_all(connection);
            instance.num_senders() > 0 && !instance.document_set().is_empty()
        });

        self.pending_shared_workers.retain_mut(|instance| {
            instance.document_set_mut().remove_all(connection);
            !instance.document_set().is_empty()
        });
    }

    /// A worker process exited or crashed. Its bookkeeping is cleaned up
    /// as for a dead connection, and the freed headroom is offered to
    /// the queue.
    pub fn process_shutdown(&mut self, process: WorkerProcessId) {
        let Some(entry) = self.processes.remove(process) else {
            warn!("shutdown reported for unknown worker process {process:?}");
            return;
        };
        // The process also acted as the client connection for any nested
        // workers it created.
        self.connection_shutdown(entry.connection());
        self.retry_queued_workers();
    }

    /// The worker context for the given instance invoked close(); stop
    /// matching it in shared-worker lookups while it drains.
    pub fn worker_context_closed(&mut self, process: WorkerProcessId, worker: WorkerId) {
        let Some(host) = self.processes.get_mut(process) else {
            warn!("close reported for unknown worker process {process:?}");
            return;
        };
        for instance in host.instances_mut() {
            if instance.worker_id() == Some(worker) {
                instance.set_closed(true);
                return;
            }
        }
    }

    /// Re-attempt admission for queued instances. Creating a shared
    /// worker can itself coalesce and remove other queue entries, so
    /// each round re-scans the queue from the start by index instead of
    /// advancing an iterator across the mutation.
    fn retry_queued_workers(&mut self) {
        loop {
            let admissible = (0..self.queued_workers.len())
                .find(|&index| self.can_create_worker_process(&self.queued_workers[index]));
            let Some(index) = admissible else {
                return;
            };
            let instance = self.queued_workers.remove(index);
            if !self.create_worker_from_instance(instance) {
                warn!("re-admitted worker failed to start");
            }
        }
    }

    /// Whether a new worker process may be created for this instance.
    /// Any one parent document with headroom unlocks admission: a worker
    /// referenced by several pages should not be blocked just because
    /// one referrer is at its personal quota.
    fn can_create_worker_process(&self, instance: &WorkerInstance) -> bool {
        for parent in instance.document_set().documents() {
            let (allowed, hit_global_limit) =
                self.page_can_create_worker_process(parent.page(), parent.view());
            if allowed {
                return true;
            }
            // At the global cap no parent can succeed; stop probing.
            if hit_global_limit {
                return false;
            }
        }
        false
    }

    /// Returns whether the given (page, view) may create another worker,
    /// and whether the scan aborted because the global cap was reached.
    fn page_can_create_worker_process(&self, page: PageId, view: ViewId) -> (bool, bool) {
        let mut total_workers = 0;
        let mut workers_per_page = 0;
        for (_, host) in self.processes.iter() {
            for instance in host.instances() {
                total_workers += 1;
                if total_workers >= self.config.max_workers {
                    return (false, true);
                }
                if instance.page_is_parent(page, view) {
                    workers_per_page += 1;
                    if workers_per_page >= self.config.max_workers_per_page {
                        return (false, false);
                    }
                }
            }
        }
        (true, false)
    }

    /// `FillUpCores` placement: create new processes until there is one
    /// per logical core, then reuse the least-loaded.
    fn process_to_fill_up_cores(&self) -> Option<WorkerProcessId> {
        if self.processes.len() >= num_cpus::get() {
            self.least_loaded_process()
        } else {
            None
        }
    }

    /// `ShareByDomain` placement: reuse a process already hosting this
    /// worker's registrable domain; otherwise create a new process below
    /// the ceiling, or fall back to the least-loaded at it.
    fn process_for_domain(&self, url: &Url) -> Option<WorkerProcessId> {
        let domain = registrable_domain(url);
        if domain.is_some() {
            for (process, host) in self.processes.iter() {
                if host
                    .instances()
                    .iter()
                    .any(|instance| registrable_domain(instance.url()) == domain)
                {
                    return Some(process);
                }
            }
        }
        if self.processes.len() >= self.config.max_processes_when_sharing {
            self.least_loaded_process()
        } else {
            None
        }
    }

    /// The process hosting the fewest instances, first found winning
    /// ties.
    fn least_loaded_process(&self) -> Option<WorkerProcessId> {
        let mut smallest: Option<(WorkerProcessId, usize)> = None;
        for (process, host) in self.processes.iter() {
            let load = host.instances().len();
            if smallest.is_none_or(|(_, best)| load < best) {
                smallest = Some((process, load));
            }
        }
        smallest.map(|(process, _)| process)
    }

    fn find_shared_worker(
        &self,
        url: &Url,
        name: &str,
        private: bool,
    ) -> Option<(WorkerProcessId, usize)> {
        for (process, host) in self.processes.iter() {
            if let Some(index) = host
                .instances()
                .iter()
                .position(|instance| instance.matches(url, name, private))
            {
                return Some((process, index));
            }
        }
        None
    }

    fn running_instance(&self, process: WorkerProcessId, index: usize) -> Option<&WorkerInstance> {
        self.processes
            .iter()
            .find(|&(id, _)| id == process)
            .and_then(|(_, host)| host.instances().get(index))
    }

    fn find_pending_index(&self, url: &Url, name: &str, private: bool) -> Option<usize> {
        self.pending_shared_workers
            .iter()
            .position(|instance| instance.matches(url, name, private))
    }

    fn send_to_client(&self, connection: ConnectionId, msg: WorkerClientMsg) {
        match self.connections.get(&connection) {
            Some(sender) => {
                if let Err(error) = sender.send(msg) {
                    warn!("sending to worker client failed ({error})");
                }
            },
            // Worker processes act as connections for nested workers but
            // need not register a client sender.
            None => debug!("no sender registered for connection {connection:?}"),
        }
    }

    /// The running shared-worker instance for the given key, if any.
    pub fn shared_worker_instance(
        &self,
        url: &Url,
        name: &str,
        private: bool,
    ) -> Option<&WorkerInstance> {
        let (process, index) = self.find_shared_worker(url, name, private)?;
        self.running_instance(process, index)
    }

    pub fn num_processes(&self) -> usize {
        self.processes.len()
    }

    /// Total workers currently hosted across all live processes.
    pub fn num_workers(&self) -> usize {
        self.processes
            .iter()
            .map(|(_, host)| host.instances().len())
            .sum()
    }

    pub fn num_queued_workers(&self) -> usize {
        self.queued_workers.len()
    }

    pub fn num_pending_shared_workers(&self) -> usize {
        self.pending_shared_workers.len()
    }
}

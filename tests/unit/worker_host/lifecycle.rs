/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use worker_host::SchedulerConfig;
use worker_traits::{ClientWorkerId, ConnectionId, DocumentId, WorkerProcessId, WorkerScriptMsg};

use crate::common::{parse, Harness};

#[test]
fn queued_dedicated_dies_with_its_document() {
    let mut harness = Harness::new(SchedulerConfig {
        max_workers: 1,
        ..SchedulerConfig::default()
    });
    harness.client(1);

    assert!(harness.create_dedicated("http://example.com/a.js", 1, 1, 1, 1, 1));
    assert!(harness.create_dedicated("http://example.com/b.js", 1, 2, 2, 2, 1));
    assert_eq!(harness.scheduler.num_queued_workers(), 1);

    // The parent document goes away before the queue drains; the entry
    // must never start.
    harness
        .scheduler
        .document_detached(ConnectionId(1), DocumentId(2));
    assert_eq!(harness.scheduler.num_queued_workers(), 0);

    harness.scheduler.process_shutdown(WorkerProcessId(0));
    assert_eq!(*harness.spawned.borrow(), 1);
}

#[test]
fn cancel_drops_queued_create() {
    let mut harness = Harness::new(SchedulerConfig {
        max_workers: 1,
        ..SchedulerConfig::default()
    });
    harness.client(1);

    assert!(harness.create_dedicated("http://example.com/a.js", 1, 1, 1, 1, 1));
    assert!(harness.create_dedicated("http://example.com/b.js", 1, 2, 2, 2, 1));
    harness
        .scheduler
        .cancel_create_dedicated_worker(ConnectionId(1), ClientWorkerId(2));
    assert_eq!(harness.scheduler.num_queued_workers(), 0);
    assert_eq!(*harness.spawned.borrow(), 1);
}

#[test]
fn cancel_of_dispatched_create_synthesizes_destruction() {
    let mut harness = Harness::new(SchedulerConfig::default());
    harness.client(1);

    assert!(harness.create_dedicated("http://example.com/a.js", 1, 1, 1, 1, 1));
    assert_eq!(harness.scheduler.num_workers(), 1);

    harness
        .scheduler
        .cancel_create_dedicated_worker(ConnectionId(1), ClientWorkerId(1));
    assert_eq!(harness.scheduler.num_workers(), 0);
}

#[test]
fn messages_route_to_the_claiming_process() {
    let mut harness = Harness::new(SchedulerConfig::default());
    harness.client(1);
    harness.client(2);

    assert!(harness.create_dedicated("http://example.com/a.js", 1, 1, 1, 1, 1));
    assert!(harness.create_dedicated("http://example.com/b.js", 2, 2, 2, 2, 1));
    assert_eq!(harness.scheduler.num_processes(), 2);

    // Opaque traffic for the second worker is claimed by its own host
    // and leaves both workers running.
    harness.scheduler.forward_message(
        WorkerScriptMsg::Message(vec![7]),
        ClientWorkerId(2),
        ConnectionId(2),
    );
    assert_eq!(
        *harness.messages.borrow(),
        vec![(1, ConnectionId(2), ClientWorkerId(2))]
    );
    assert_eq!(harness.scheduler.num_workers(), 2);

    // A sender no instance recognizes is dropped without effect.
    harness.scheduler.forward_message(
        WorkerScriptMsg::Message(vec![8]),
        ClientWorkerId(9),
        ConnectionId(1),
    );
    assert_eq!(harness.messages.borrow().len(), 1);
    assert_eq!(harness.scheduler.num_workers(), 2);
}

#[test]
fn connection_shutdown_cleans_every_table() {
    let mut harness = Harness::new(SchedulerConfig {
        max_workers: 2,
        ..SchedulerConfig::default()
    });
    harness.client(1);

    assert!(harness.create_dedicated("http://example.com/a.js", 1, 1, 1, 1, 1));
    assert!(harness.create_shared("http://example.com/s.js", "jobs", 1, 2, 2, 1));
    assert!(harness.create_dedicated("http://example.com/c.js", 1, 3, 3, 1, 1));
    assert!(!harness.lookup_shared("http://example.com/p.js", "other", 1, 4, 4, 1).found);
    assert_eq!(harness.scheduler.num_workers(), 2);
    assert_eq!(harness.scheduler.num_queued_workers(), 1);
    assert_eq!(harness.scheduler.num_pending_shared_workers(), 1);

    harness.scheduler.connection_shutdown(ConnectionId(1));
    assert_eq!(harness.scheduler.num_workers(), 0);
    assert_eq!(harness.scheduler.num_queued_workers(), 0);
    assert_eq!(harness.scheduler.num_pending_shared_workers(), 0);
}

#[test]
fn process_init_failure_fails_the_request() {
    let mut harness = Harness::new(SchedulerConfig::default());
    harness.client(1);

    *harness.fail_next.borrow_mut() = true;
    assert!(!harness.create_dedicated("http://example.com/a.js", 1, 1, 1, 1, 1));
    assert_eq!(harness.scheduler.num_processes(), 0);
    assert_eq!(harness.scheduler.num_workers(), 0);

    // A later attempt is unaffected.
    *harness.fail_next.borrow_mut() = false;
    assert!(harness.create_dedicated("http://example.com/a.js", 1, 2, 1, 1, 1));
    assert_eq!(harness.scheduler.num_workers(), 1);
}

#[test]
fn shared_worker_survives_until_last_document_detaches() {
    let mut harness = Harness::new(SchedulerConfig::default());
    harness.client(1);
    harness.client(2);

    let url = "http://example.com/s.js";
    assert!(harness.create_shared(url, "jobs", 1, 10, 10, 1));
    assert!(harness.lookup_shared(url, "jobs", 2, 20, 20, 2).found);

    harness
        .scheduler
        .document_detached(ConnectionId(1), DocumentId(10));
    let instance = harness
        .scheduler
        .shared_worker_instance(&parse(url), "jobs", false)
        .expect("shared worker dropped too early");
    assert_eq!(instance.document_set().documents().len(), 1);

    harness
        .scheduler
        .document_detached(ConnectionId(2), DocumentId(20));
    assert_eq!(harness.scheduler.num_workers(), 0);
}

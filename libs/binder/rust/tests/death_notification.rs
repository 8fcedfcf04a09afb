/*
 * Copyright (C) 2020 The Android Open Source Project
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Death notifications across processes sharing one in-memory driver.

use binder::interfaces::{BnDemo, IDemo};
use binder::service_manager::{check_service, run_service_manager};
use binder::{
    DeathRecipient, Driver, IBinder, Interface, LocalDriver, ProcessState, SpIBinder, StatusCode,
};

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const DEATH_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

struct Adder;

impl Interface for Adder {}

impl IDemo for Adder {
    fn alert(&self) -> binder::Result<()> {
        Ok(())
    }

    fn push(&self, _data: i32) -> binder::Result<()> {
        Ok(())
    }

    fn add(&self, v1: i32, v2: i32) -> binder::Result<i32> {
        Ok(v1 + v2)
    }
}

struct Processes {
    driver: Arc<dyn Driver>,
    service: ProcessState,
    client: ProcessState,
    _service_manager: ProcessState,
}

fn start(name: &str) -> Processes {
    let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new());
    let service_manager = ProcessState::open(driver.clone()).unwrap();
    run_service_manager(&service_manager).unwrap();
    service_manager.start_thread_pool().unwrap();

    let service = ProcessState::open(driver.clone()).unwrap();
    binder::add_service(&service, name, BnDemo::new_binder(Adder).as_binder()).unwrap();
    service.start_thread_pool().unwrap();

    let client = ProcessState::open(driver.clone()).unwrap();
    client.start_thread_pool().unwrap();
    Processes { driver, service, client, _service_manager: service_manager }
}

fn lookup(processes: &Processes, name: &str) -> SpIBinder {
    binder::get_service(&processes.client, name).unwrap()
}

/// A recipient that reports every notification on the returned channel.
fn recipient() -> (DeathRecipient, Receiver<()>) {
    let (sender, receiver) = mpsc::channel();
    let sender = Mutex::new(sender);
    let recipient = DeathRecipient::new(move || {
        let _ = sender.lock().unwrap().send(());
    });
    (recipient, receiver)
}

#[test]
fn notification_is_sent_once_when_the_owner_exits() {
    let processes = start("notified_once");
    let binder = lookup(&processes, "notified_once");
    let (recipient, died) = recipient();

    binder.link_to_death(&recipient).unwrap();
    assert!(binder.is_binder_alive());

    processes.service.exit().unwrap();
    assert_eq!(died.recv_timeout(DEATH_TIMEOUT), Ok(()));
    assert_eq!(died.recv_timeout(QUIET_PERIOD), Err(RecvTimeoutError::Timeout));
    assert!(!binder.is_binder_alive());
    assert_eq!(binder.ping_binder(), Err(StatusCode::DEAD_OBJECT));
}

#[test]
fn no_notification_while_the_owner_lives() {
    let processes = start("still_alive");
    let binder = lookup(&processes, "still_alive");
    let (recipient, died) = recipient();

    binder.link_to_death(&recipient).unwrap();
    let service: binder::Strong<dyn IDemo> = binder.clone().into_interface().unwrap();
    assert_eq!(service.add(2, 3), Ok(5));
    assert_eq!(died.recv_timeout(QUIET_PERIOD), Err(RecvTimeoutError::Timeout));

    binder.unlink_to_death(&recipient).unwrap();
}

#[test]
fn local_objects_cannot_be_linked() {
    let object = BnDemo::new_binder(Adder).as_binder();
    let (recipient, _died) = recipient();

    assert_eq!(object.link_to_death(&recipient), Err(StatusCode::INVALID_OPERATION));
    assert_eq!(object.unlink_to_death(&recipient), Err(StatusCode::INVALID_OPERATION));
}

#[test]
fn recipient_is_linked_only_once() {
    let processes = start("linked_once");
    let binder = lookup(&processes, "linked_once");
    let (recipient, died) = recipient();

    binder.link_to_death(&recipient).unwrap();
    assert_eq!(binder.link_to_death(&recipient), Err(StatusCode::ALREADY_EXISTS));
    assert_eq!(binder.link_to_death(&recipient.clone()), Err(StatusCode::ALREADY_EXISTS));

    processes.service.exit().unwrap();
    assert_eq!(died.recv_timeout(DEATH_TIMEOUT), Ok(()));
    assert_eq!(died.recv_timeout(QUIET_PERIOD), Err(RecvTimeoutError::Timeout));
}

#[test]
fn unlinked_recipient_is_not_notified() {
    let processes = start("unlinked");
    let binder = lookup(&processes, "unlinked");
    let (unlinked, unlinked_died) = recipient();
    let (linked, linked_died) = recipient();

    binder.link_to_death(&unlinked).unwrap();
    binder.link_to_death(&linked).unwrap();
    binder.unlink_to_death(&unlinked).unwrap();
    assert_eq!(binder.unlink_to_death(&unlinked), Err(StatusCode::NAME_NOT_FOUND));

    processes.service.exit().unwrap();
    assert_eq!(linked_died.recv_timeout(DEATH_TIMEOUT), Ok(()));
    assert_eq!(unlinked_died.recv_timeout(QUIET_PERIOD), Err(RecvTimeoutError::Timeout));
}

#[test]
fn link_after_notification_is_dead_object() {
    let processes = start("already_dead");
    let binder = lookup(&processes, "already_dead");
    let (first, died) = recipient();

    binder.link_to_death(&first).unwrap();
    processes.service.exit().unwrap();
    assert_eq!(died.recv_timeout(DEATH_TIMEOUT), Ok(()));

    let (second, _second_died) = recipient();
    assert_eq!(binder.link_to_death(&second), Err(StatusCode::DEAD_OBJECT));
}

#[test]
fn link_to_an_object_already_dead_notifies_at_once() {
    let processes = start("dead_before_link");
    let binder = lookup(&processes, "dead_before_link");
    processes.service.exit().unwrap();

    let (recipient, died) = recipient();
    binder.link_to_death(&recipient).unwrap();
    assert_eq!(died.recv_timeout(DEATH_TIMEOUT), Ok(()));
}

#[test]
fn stopped_service_is_reported_only_when_it_exits() {
    let processes = start("stopped");
    let early = lookup(&processes, "stopped");
    let (early_recipient, early_died) = recipient();
    early.link_to_death(&early_recipient).unwrap();

    processes.service.shutdown().unwrap();
    let late_client = ProcessState::open(processes.driver.clone()).unwrap();
    late_client.start_thread_pool().unwrap();
    let late = binder::get_service(&late_client, "stopped").unwrap();
    let (late_recipient, late_died) = recipient();
    late.link_to_death(&late_recipient).unwrap();

    assert_eq!(early_died.recv_timeout(QUIET_PERIOD), Err(RecvTimeoutError::Timeout));
    assert_eq!(late_died.recv_timeout(QUIET_PERIOD), Err(RecvTimeoutError::Timeout));
    assert_eq!(late.ping_binder(), Err(StatusCode::DEAD_OBJECT));

    processes.service.exit().unwrap();
    assert_eq!(early_died.recv_timeout(DEATH_TIMEOUT), Ok(()));
    assert_eq!(late_died.recv_timeout(DEATH_TIMEOUT), Ok(()));
}

#[test]
fn concurrent_link_and_unlink_keep_the_watch_armed() {
    let processes = start("churn");
    let binder = lookup(&processes, "churn");

    let churners: Vec<_> = (0..4)
        .map(|_| {
            let binder = binder.clone();
            thread::spawn(move || {
                let (recipient, died) = recipient();
                for _ in 0..200 {
                    binder.link_to_death(&recipient).unwrap();
                    binder.unlink_to_death(&recipient).unwrap();
                }
                binder.link_to_death(&recipient).unwrap();
                died
            })
        })
        .collect();
    let notifications: Vec<Receiver<()>> =
        churners.into_iter().map(|t| t.join().unwrap()).collect();

    processes.service.exit().unwrap();
    for died in notifications {
        assert_eq!(died.recv_timeout(DEATH_TIMEOUT), Ok(()));
    }
}

#[test]
fn replaced_registration_outlives_the_old_owner() {
    let processes = start("replaced");
    let old = lookup(&processes, "replaced");
    let (recipient, died) = recipient();
    old.link_to_death(&recipient).unwrap();
    let replacement = ProcessState::open(processes.driver.clone()).unwrap();
    binder::add_service(&replacement, "replaced", BnDemo::new_binder(Adder).as_binder()).unwrap();
    replacement.start_thread_pool().unwrap();

    processes.service.exit().unwrap();
    assert_eq!(died.recv_timeout(DEATH_TIMEOUT), Ok(()));
    // Give the directory the same chance to react to the death.
    thread::sleep(QUIET_PERIOD);
    let binder = check_service(&processes.client, "replaced").unwrap().unwrap();
    assert!(binder.is_binder_alive());
    assert_eq!(binder.ping_binder(), Ok(()));
}

#[test]
fn service_manager_forgets_dead_services() {
    let processes = start("forgotten");
    assert!(check_service(&processes.client, "forgotten").unwrap().is_some());

    processes.service.exit().unwrap();
    let deadline = Instant::now() + DEATH_TIMEOUT;
    while check_service(&processes.client, "forgotten").unwrap().is_some() {
        assert!(Instant::now() < deadline, "dead service is still registered");
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(binder::service_manager::list_services(&processes.client), Ok(vec![]));
}

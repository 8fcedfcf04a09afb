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

//! Client side of the service directory.
//!
//! Every process reaches the directory through its context object. One
//! process must host it with [`run_service_manager`] before the others can
//! register or look up services.

use crate::binder::{FromIBinder, Strong};
use crate::error::{Result, StatusCode};
use crate::interfaces::{BnServiceManager, IServiceManager, ServiceManager};
use crate::proxy::SpIBinder;
use crate::state::ProcessState;

use std::thread;
use std::time::Instant;

/// The service manager as seen from `process`.
pub fn default_service_manager(process: &ProcessState) -> Result<Strong<dyn IServiceManager>> {
    process.context_object().into_interface()
}

/// Host the service directory in `process` and make it the context manager.
///
/// The process must run a thread pool for the directory to answer.
pub fn run_service_manager(process: &ProcessState) -> Result<Strong<dyn IServiceManager>> {
    let service_manager = BnServiceManager::new_binder(ServiceManager::new());
    process.become_context_manager(&service_manager.as_binder())?;
    log::info!("process {} hosts the service manager", process.pid());
    Ok(service_manager)
}

/// Register a new service with the default service manager.
///
/// Registers the given binder object with the given identifier. If successful,
/// this service can then be retrieved using that identifier.
pub fn add_service(process: &ProcessState, identifier: &str, binder: SpIBinder) -> Result<()> {
    default_service_manager(process)?.add_service(identifier, &binder)
}

/// Look up a service without waiting.
pub fn check_service(process: &ProcessState, name: &str) -> Result<Option<SpIBinder>> {
    default_service_manager(process)?.check_service(name)
}

/// Retrieve an existing service, blocking for a few seconds if it doesn't
/// yet exist.
///
/// How long to wait is set by [`ProcessConfig`](crate::ProcessConfig). Returns
/// `None` if the service is still missing at the end of the wait, or if the
/// service manager cannot be reached.
pub fn get_service(process: &ProcessState, name: &str) -> Option<SpIBinder> {
    let config = process.config();
    let deadline = Instant::now() + config.service_wait;
    loop {
        match check_service(process, name) {
            Ok(Some(binder)) => return Some(binder),
            Ok(None) => (),
            Err(e) => log::debug!("looking up {:?}: {}", name, e),
        }
        let now = Instant::now();
        if now >= deadline {
            log::warn!("service {:?} didn't start. Returning NULL", name);
            return None;
        }
        log::info!("Waiting for service {:?}...", name);
        thread::sleep(config.service_poll_interval.min(deadline - now));
    }
}

/// Retrieve an existing service for a particular interface, blocking for a
/// few seconds if it doesn't yet exist.
///
/// Fails with `NAME_NOT_FOUND` if no service is registered under `name`, and
/// with `BAD_TYPE` if the service does not implement `T`.
pub fn get_interface<T: FromIBinder + ?Sized>(process: &ProcessState, name: &str) -> Result<Strong<T>> {
    let binder = get_service(process, name).ok_or(StatusCode::NAME_NOT_FOUND)?;
    FromIBinder::try_from(binder)
}

/// Names of every registered service.
pub fn list_services(process: &ProcessState) -> Result<Vec<String>> {
    default_service_manager(process)?.list_services()
}

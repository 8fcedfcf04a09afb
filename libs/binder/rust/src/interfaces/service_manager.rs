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

//! Manually implemented IServiceManager interface.

use crate::binder::{IBinder, Interface, TransactionCode, FIRST_CALL_TRANSACTION};
use crate::error::{Result, StatusCode};
use crate::native::Binder;
use crate::parcel::Parcel;
use crate::proxy::{DeathRecipient, SpIBinder};

use std::collections::BTreeMap;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// The directory of named services, served by the context manager.
pub trait IServiceManager: Interface {
    /// Look up a service. The directory itself never waits; see
    /// [`get_service`](crate::service_manager::get_service) for the
    /// client-side bounded wait.
    fn get_service(&self, name: &str) -> Result<Option<SpIBinder>>;

    /// Look up a service, `None` if nothing is registered under `name`.
    fn check_service(&self, name: &str) -> Result<Option<SpIBinder>>;

    /// Register `service` under `name`, replacing any previous registration.
    fn add_service(&self, name: &str, service: &SpIBinder) -> Result<()>;

    /// Names of all registered services, in sorted order.
    fn list_services(&self) -> Result<Vec<String>>;
}

declare_binder_interface! {
    IServiceManager["android.os.IServiceManager"] {
        native: BnServiceManager(on_transact),
        proxy: BpServiceManager,
    }
}

const GET_SERVICE: TransactionCode = FIRST_CALL_TRANSACTION;
const CHECK_SERVICE: TransactionCode = FIRST_CALL_TRANSACTION + 1;
const ADD_SERVICE: TransactionCode = FIRST_CALL_TRANSACTION + 2;
const LIST_SERVICES: TransactionCode = FIRST_CALL_TRANSACTION + 3;

fn on_transact(
    service: &dyn IServiceManager,
    code: TransactionCode,
    data: &Parcel,
    reply: &mut Parcel,
) -> Result<()> {
    match code {
        GET_SERVICE => {
            let name: String = data.read()?;
            reply.write(&service.get_service(&name)?)
        }
        CHECK_SERVICE => {
            let name: String = data.read()?;
            reply.write(&service.check_service(&name)?)
        }
        ADD_SERVICE => {
            let name: String = data.read()?;
            let binder: SpIBinder = data.read()?;
            service.add_service(&name, &binder)
        }
        LIST_SERVICES => reply.write(&service.list_services()?),
        _ => Err(StatusCode::UNKNOWN_TRANSACTION),
    }
}

impl IServiceManager for BpServiceManager {
    fn get_service(&self, name: &str) -> Result<Option<SpIBinder>> {
        let reply = self.call(GET_SERVICE, 0, |data| data.write(name))?;
        reply.read()
    }

    fn check_service(&self, name: &str) -> Result<Option<SpIBinder>> {
        let reply = self.call(CHECK_SERVICE, 0, |data| data.write(name))?;
        reply.read()
    }

    fn add_service(&self, name: &str, service: &SpIBinder) -> Result<()> {
        self.call(ADD_SERVICE, 0, |data| {
            data.write(name)?;
            data.write(service)
        })?;
        Ok(())
    }

    fn list_services(&self) -> Result<Vec<String>> {
        let reply = self.call(LIST_SERVICES, 0, |_| Ok(()))?;
        reply.read()
    }
}

impl IServiceManager for Binder<BnServiceManager> {
    fn get_service(&self, name: &str) -> Result<Option<SpIBinder>> {
        self.0.get_service(name)
    }

    fn check_service(&self, name: &str) -> Result<Option<SpIBinder>> {
        self.0.check_service(name)
    }

    fn add_service(&self, name: &str, service: &SpIBinder) -> Result<()> {
        self.0.add_service(name, service)
    }

    fn list_services(&self) -> Result<Vec<String>> {
        self.0.list_services()
    }
}

type Directory = Mutex<BTreeMap<String, Registration>>;

struct Registration {
    binder: SpIBinder,
    recipient: Option<DeathRecipient>,
}

/// In-memory service directory.
///
/// Remote services are watched for death; an entry goes away when the
/// process that registered it dies.
#[derive(Default)]
pub struct ServiceManager {
    services: Arc<Directory>,
}

impl ServiceManager {
    pub fn new() -> ServiceManager {
        Self::default()
    }

    fn services(&self) -> MutexGuard<'_, BTreeMap<String, Registration>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watch(&self, name: &str, service: &SpIBinder) -> Result<()> {
        let directory: Weak<Directory> = Arc::downgrade(&self.services);
        let key = name.to_owned();
        let recipient = DeathRecipient::new(move || {
            let directory = match directory.upgrade() {
                Some(directory) => directory,
                None => return,
            };
            let removed = {
                let mut services = directory.lock().unwrap_or_else(PoisonError::into_inner);
                let dead = services.get(&key).map_or(false, |entry| !entry.binder.is_binder_alive());
                if dead {
                    services.remove(&key)
                } else {
                    None
                }
            };
            if removed.is_some() {
                log::info!("service {:?} died, removed from the directory", key);
            }
        });

        if let Err(e) = service.link_to_death(&recipient) {
            let removed = {
                let mut services = self.services();
                if services.get(name).map_or(false, |entry| entry.binder == *service) {
                    services.remove(name)
                } else {
                    None
                }
            };
            drop(removed);
            return Err(e);
        }
        let linked = match self.services().get_mut(name) {
            Some(entry) if entry.binder == *service => {
                entry.recipient = Some(recipient.clone());
                true
            }
            _ => false,
        };
        if !linked {
            // Replaced in the meantime.
            unlink(name, service, &recipient);
        }
        Ok(())
    }
}

fn unlink(name: &str, binder: &SpIBinder, recipient: &DeathRecipient) {
    if let Err(e) = binder.unlink_to_death(recipient) {
        log::debug!("service {:?}: unlinking death recipient: {}", name, e);
    }
}

impl Interface for ServiceManager {}

impl IServiceManager for ServiceManager {
    fn get_service(&self, name: &str) -> Result<Option<SpIBinder>> {
        self.check_service(name)
    }

    fn check_service(&self, name: &str) -> Result<Option<SpIBinder>> {
        Ok(self.services().get(name).map(|entry| entry.binder.clone()))
    }

    fn add_service(&self, name: &str, service: &SpIBinder) -> Result<()> {
        if name.is_empty() {
            return Err(StatusCode::BAD_VALUE);
        }
        let registration = Registration {
            binder: service.clone(),
            recipient: None,
        };
        let old = self.services().insert(name.to_owned(), registration);
        if let Some(Registration { binder, recipient: Some(recipient) }) = old {
            unlink(name, &binder, &recipient);
        }
        log::info!("service {:?} registered", name);

        if service.is_remote() {
            self.watch(name, service)?;
        }
        Ok(())
    }

    fn list_services(&self) -> Result<Vec<String>> {
        Ok(self.services().keys().cloned().collect())
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        let services = mem::take(&mut *self.services());
        for (name, registration) in services {
            if let Some(recipient) = registration.recipient {
                unlink(&name, &registration.binder, &recipient);
            }
        }
    }
}

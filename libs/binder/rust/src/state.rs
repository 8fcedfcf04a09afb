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

use crate::binder::{TransactionCode, TransactionFlags};
use crate::dispatch::dispatch;
use crate::driver::{
    Driver, FlatBinderObject, Handle, LocalObject, Pid, ReplyToken, Transaction, Work,
    CONTEXT_MANAGER_HANDLE,
};
use crate::error::{Result, StatusCode};
use crate::native::LocalBinder;
use crate::parcel::{Parcel, ParcelObject};
use crate::proxy::{BpBinder, SpIBinder};
use crate::registry::ObjectRegistry;

use std::cell::Cell;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Tunables for one process's binder state.
#[derive(Clone, Debug)]
pub struct ProcessConfig {
    /// Worker threads spawned by
    /// [`start_thread_pool`](ProcessState::start_thread_pool).
    pub max_threads: usize,
    /// How long [`get_service`](crate::get_service) keeps looking for a
    /// service that is not registered yet.
    pub service_wait: Duration,
    /// Delay between two lookups during that wait.
    pub service_poll_interval: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        ProcessConfig {
            max_threads: 4,
            service_wait: Duration::from_secs(5),
            service_poll_interval: Duration::from_millis(100),
        }
    }
}

/// A process attached to a binder driver.
///
/// Owns the process's object registry and its pool of binder threads, and
/// is the send path every proxy of this process goes through. Clones refer
/// to the same process.
#[derive(Clone)]
pub struct ProcessState(Arc<ProcessInner>);

pub(crate) struct ProcessInner {
    pid: Pid,
    driver: Arc<dyn Driver>,
    pub(crate) registry: Arc<ObjectRegistry<BpBinder>>,
    config: Mutex<ProcessConfig>,
    pool: Mutex<ThreadPool>,
}

#[derive(Default)]
struct ThreadPool {
    started: bool,
    spawned: usize,
    threads: Vec<JoinHandle<()>>,
}

thread_local! {
    static CALLING_PID: Cell<Option<Pid>> = Cell::new(None);
}

impl ProcessState {
    /// Attach a new process to `driver` with the default configuration.
    pub fn open(driver: Arc<dyn Driver>) -> Result<ProcessState> {
        Self::open_with_config(driver, ProcessConfig::default())
    }

    pub fn open_with_config(driver: Arc<dyn Driver>, config: ProcessConfig) -> Result<ProcessState> {
        if config.max_threads == 0 {
            return Err(StatusCode::BAD_VALUE);
        }
        let pid = driver.open()?;
        log::debug!("process {} opened binder", pid);
        Ok(ProcessState(Arc::new(ProcessInner {
            pid,
            driver,
            registry: Arc::new(ObjectRegistry::new()),
            config: Mutex::new(config),
            pool: Mutex::new(ThreadPool::default()),
        })))
    }

    /// The driver-assigned id of this process.
    pub fn pid(&self) -> Pid {
        self.0.pid
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> ProcessConfig {
        self.0.config().clone()
    }

    /// Reference to the context manager, handle 0 in every process.
    pub fn context_object(&self) -> SpIBinder {
        let inner = &self.0;
        let (proxy, _) = inner.registry.lookup_or_create(CONTEXT_MANAGER_HANDLE, || {
            BpBinder::new(CONTEXT_MANAGER_HANDLE, inner.clone())
        });
        SpIBinder::adopt(proxy)
    }

    /// Register `binder`, a local object of this process, as the context
    /// manager.
    ///
    /// Fails with `INVALID_OPERATION` for a remote reference and with
    /// `ALREADY_EXISTS` while another live context manager is registered.
    pub fn become_context_manager(&self, binder: &SpIBinder) -> Result<()> {
        let local = binder.as_local().ok_or(StatusCode::INVALID_OPERATION)?;
        self.0.publish(local);
        self.0.driver.set_context_manager(self.0.pid, LocalObject(local.clone()))
    }

    /// Start the Binder IPC thread pool.
    ///
    /// Spawns `max_threads` threads that receive and dispatch inbound
    /// transactions until [`shutdown`](Self::shutdown). Calling it again is a
    /// no-op.
    pub fn start_thread_pool(&self) -> Result<()> {
        let inner = &self.0;
        let max_threads = inner.config().max_threads;
        let mut pool = inner.pool();
        if mem::replace(&mut pool.started, true) {
            return Ok(());
        }
        for _ in 0..max_threads {
            pool.spawned += 1;
            let name = format!("binder:{}_{}", inner.pid, pool.spawned);
            let looper = inner.clone();
            let thread = thread::Builder::new()
                .name(name)
                .spawn(move || looper.looper())
                .map_err(|e| {
                    log::error!("process {}: cannot spawn binder thread: {}", inner.pid, e);
                    StatusCode::NO_MEMORY
                })?;
            pool.threads.push(thread);
        }
        log::info!("process {}: started {} binder threads", inner.pid, max_threads);
        Ok(())
    }

    /// Set the maximum number of threads that can be started in the
    /// threadpool.
    ///
    /// Only allowed before [`start_thread_pool`](Self::start_thread_pool);
    /// afterwards it fails with `INVALID_OPERATION`.
    pub fn set_thread_pool_max_thread_count(&self, num_threads: usize) -> Result<()> {
        if num_threads == 0 {
            return Err(StatusCode::BAD_VALUE);
        }
        if self.0.pool().started {
            return Err(StatusCode::INVALID_OPERATION);
        }
        self.0.config().max_threads = num_threads;
        Ok(())
    }

    /// Block on the Binder IPC thread pool
    ///
    /// The calling thread serves transactions alongside the pool until
    /// [`shutdown`](Self::shutdown) or [`exit`](Self::exit).
    pub fn join_thread_pool(&self) {
        self.0.looper();
    }

    /// Stop serving: every binder thread of this process returns from its
    /// receive loop and is joined. Transactions still queued for this
    /// process fail with `DEAD_OBJECT`.
    pub fn shutdown(&self) -> Result<()> {
        self.0.driver.exit_looper(self.0.pid)?;
        self.0.join_threads();
        Ok(())
    }

    /// Terminate the process as far as binder is concerned.
    ///
    /// The driver drops everything the process owned, other processes see
    /// its objects die, and the thread pool is joined.
    pub fn exit(&self) -> Result<()> {
        log::info!("process {} exiting", self.0.pid);
        self.0.driver.close(self.0.pid)?;
        self.0.join_threads();
        Ok(())
    }

    /// Number of remote objects this process currently holds proxies for.
    pub fn proxy_count(&self) -> usize {
        self.0.registry.proxy_count()
    }
}

impl ProcessInner {
    fn config(&self) -> MutexGuard<'_, ProcessConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool(&self) -> MutexGuard<'_, ThreadPool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_threads(&self) {
        let threads = mem::take(&mut self.pool().threads);
        let current = thread::current().id();
        for thread in threads {
            if thread.thread().id() == current {
                continue;
            }
            if thread.join().is_err() {
                log::error!("process {}: binder thread panicked", self.pid);
            }
        }
    }

    /// Send `data` to the object behind `handle` and wait for its reply.
    ///
    /// Returns `Ok(None)` for a one-way transaction.
    pub(crate) fn transact(
        self: &Arc<Self>,
        handle: Handle,
        code: TransactionCode,
        flags: TransactionFlags,
        data: Parcel,
    ) -> Result<Option<Parcel>> {
        let (data, objects) = data.into_parts();
        let transaction = Transaction {
            code,
            flags,
            data,
            objects: self.flatten(&objects)?,
            sender: self.pid,
        };
        log::debug!("process {}: transaction {:#x} to handle {}", self.pid, code, handle);
        let reply = self.driver.transact(self.pid, handle, transaction);
        // The objects stay referenced until the driver has taken its own
        // references on them.
        drop(objects);
        reply?.map(|reply| self.unflatten(reply)).transpose()
    }

    pub(crate) fn release_handle(&self, handle: Handle) {
        if let Err(e) = self.driver.release_handle(self.pid, handle) {
            log::debug!("process {}: releasing handle {}: {}", self.pid, handle, e);
        }
    }

    pub(crate) fn request_death_notification(&self, handle: Handle) -> Result<()> {
        self.driver.request_death_notification(self.pid, handle)
    }

    pub(crate) fn clear_death_notification(&self, handle: Handle) -> Result<()> {
        self.driver.clear_death_notification(self.pid, handle)
    }

    fn publish(&self, local: &Arc<dyn LocalBinder>) {
        self.registry.publish_local(local);
        local.mark_published(Arc::downgrade(&self.registry));
    }

    /// Turn the references carried by a parcel into the driver's form.
    fn flatten(&self, objects: &[ParcelObject]) -> Result<Vec<(usize, FlatBinderObject)>> {
        objects
            .iter()
            .map(|object| {
                let flat = match object.binder.as_proxy() {
                    Some(proxy) => {
                        if !std::ptr::eq(Arc::as_ptr(proxy.process()), self) {
                            log::warn!(
                                "process {}: refusing to send a reference owned by another process",
                                self.pid
                            );
                            return Err(StatusCode::BAD_VALUE);
                        }
                        FlatBinderObject::Handle(proxy.handle())
                    }
                    None => {
                        let local = object.binder.as_local().ok_or(StatusCode::UNKNOWN_ERROR)?;
                        self.publish(local);
                        FlatBinderObject::Binder(LocalObject(local.clone()))
                    }
                };
                Ok((object.offset, flat))
            })
            .collect()
    }

    /// Rebuild a parcel from a transaction the driver delivered to us.
    ///
    /// Every handle in the transaction is adopted even if the parcel turns
    /// out to be invalid, so the driver's references are not leaked.
    fn unflatten(self: &Arc<Self>, transaction: Transaction) -> Result<Parcel> {
        let mut objects = Vec::with_capacity(transaction.objects.len());
        let mut status = Ok(());
        for (offset, flat) in transaction.objects {
            let binder = match flat {
                FlatBinderObject::Handle(handle) => self.adopt_handle(handle),
                FlatBinderObject::Binder(object) => match self.registry.local(object.cookie()) {
                    Some(local) => SpIBinder::from_local(local),
                    None => {
                        log::warn!(
                            "process {}: unknown local object {:#x}",
                            self.pid,
                            object.cookie()
                        );
                        status = Err(StatusCode::BAD_VALUE);
                        continue;
                    }
                },
            };
            objects.push(ParcelObject { offset, binder });
        }
        status?;
        Ok(Parcel::from_parts(transaction.data, objects))
    }

    /// Wrap a handle the driver just gave us a reference on. The registry
    /// keeps one driver reference per live proxy, so an extra one is
    /// returned at once.
    fn adopt_handle(self: &Arc<Self>, handle: Handle) -> SpIBinder {
        let (proxy, created) = self
            .registry
            .lookup_or_create(handle, || BpBinder::new(handle, self.clone()));
        if !created {
            self.release_handle(handle);
        }
        SpIBinder::adopt(proxy)
    }

    fn looper(self: &Arc<Self>) {
        log::debug!("process {}: binder thread entering looper", self.pid);
        loop {
            match self.driver.receive(self.pid) {
                Ok(Some(work)) => self.handle_work(work),
                Ok(None) => break,
                Err(e) => {
                    log::error!("process {}: receive failed: {}", self.pid, e);
                    break;
                }
            }
        }
        log::debug!("process {}: binder thread leaving looper", self.pid);
    }

    fn handle_work(self: &Arc<Self>, work: Work) {
        match work {
            Work::Transaction { target, transaction, reply } => {
                let (code, flags, sender) = (transaction.code, transaction.flags, transaction.sender);
                let data = match self.unflatten(transaction) {
                    Ok(data) => data,
                    Err(e) => {
                        if let Some(token) = reply {
                            self.send_reply(token, Err(e));
                        }
                        return;
                    }
                };
                let _calling = CallingPid::enter(sender);
                let state = dispatch(&*target.0, code, &data, flags, |result| {
                    if let Some(token) = reply {
                        self.send_reply(token, result);
                    }
                });
                log::debug!(
                    "process {}: transaction {:#x} from {} ended {:?}",
                    self.pid,
                    code,
                    sender,
                    state
                );
            }
            Work::DeadBinder { handle } => match self.registry.proxy(handle) {
                Some(proxy) => proxy.send_obituary(),
                None => log::debug!("process {}: death of released handle {}", self.pid, handle),
            },
        }
    }

    fn send_reply(&self, token: ReplyToken, result: Result<Parcel>) {
        let mut objects = Vec::new();
        let reply = result.and_then(|parcel| {
            let (data, parcel_objects) = parcel.into_parts();
            objects = parcel_objects;
            Ok(Transaction {
                data,
                objects: self.flatten(&objects)?,
                sender: self.pid,
                ..Default::default()
            })
        });
        if let Err(e) = self.driver.reply(self.pid, token, reply) {
            log::warn!("process {}: reply {} not delivered: {}", self.pid, token, e);
        }
    }
}

/// Static utility functions to manage Binder thread state.
pub struct ThreadState;

impl ThreadState {
    /// The process that sent the transaction this thread is serving, or
    /// `None` outside of a transaction.
    pub fn get_calling_pid() -> Option<Pid> {
        CALLING_PID.with(Cell::get)
    }
}

/// Sets the calling pid for the duration of one transaction. Nested
/// transactions on the same thread restore the outer value.
struct CallingPid(Option<Pid>);

impl CallingPid {
    fn enter(pid: Pid) -> CallingPid {
        CallingPid(CALLING_PID.with(|calling| calling.replace(Some(pid))))
    }
}

impl Drop for CallingPid {
    fn drop(&mut self) {
        CALLING_PID.with(|calling| calling.set(self.0));
    }
}

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

//! Rust API for interacting with a remote binder service.

use crate::binder::{
    FromIBinder, IBinder, Interface, Remotable, Strong, TransactionCode, TransactionFlags,
    INTERFACE_TRANSACTION, PING_TRANSACTION,
};
use crate::dispatch::dispatch;
use crate::driver::Handle;
use crate::error::{Result, StatusCode};
use crate::native::{Binder, BinderInner, LocalBinder};
use crate::parcel::Parcel;
use crate::registry::ObjectRegistry;
use crate::state::ProcessInner;

use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// A strong reference to a Binder object.
///
/// The object is either local, a service living in this process, or remote,
/// reached through a handle. Remote references are counted in the process's
/// object registry; cloning and dropping an `SpIBinder` adjusts that count.
pub struct SpIBinder(Inner);

enum Inner {
    Local(Arc<dyn LocalBinder>),
    Remote(Arc<BpBinder>),
}

/// Proxy side of a remote object: one per handle per process.
pub(crate) struct BpBinder {
    handle: Handle,
    process: Arc<ProcessInner>,
    alive: AtomicBool,
    obituaries: Mutex<Obituaries>,
}

#[derive(Default)]
struct Obituaries {
    recipients: Vec<DeathRecipient>,
    /// The driver has been asked to report the owner's death.
    armed: bool,
    sent: bool,
}

impl SpIBinder {
    pub(crate) fn from_local(object: Arc<dyn LocalBinder>) -> Self {
        SpIBinder(Inner::Local(object))
    }

    /// Wrap a proxy whose strong reference was already counted in the
    /// registry.
    pub(crate) fn adopt(proxy: Arc<BpBinder>) -> Self {
        SpIBinder(Inner::Remote(proxy))
    }

    pub(crate) fn as_local(&self) -> Option<&Arc<dyn LocalBinder>> {
        match &self.0 {
            Inner::Local(object) => Some(object),
            Inner::Remote(_) => None,
        }
    }

    pub(crate) fn as_proxy(&self) -> Option<&Arc<BpBinder>> {
        match &self.0 {
            Inner::Local(_) => None,
            Inner::Remote(proxy) => Some(proxy),
        }
    }

    /// Return true if this binder object is hosted in a different process
    /// than the current one.
    pub fn is_remote(&self) -> bool {
        self.as_proxy().is_some()
    }

    /// Try to convert this Binder object into a trait object for the given
    /// Binder interface.
    ///
    /// If this object does not implement the expected interface, the error
    /// `StatusCode::BAD_TYPE` is returned.
    pub fn into_interface<I: FromIBinder + Interface + ?Sized>(self) -> Result<Strong<I>> {
        FromIBinder::try_from(self)
    }

    /// Return the local service behind this reference, if it is a local
    /// object of type `T`.
    pub fn downcast_local<T: Remotable>(&self) -> Option<Binder<T>> {
        let object = self.as_local()?.clone();
        object.downcast_arc::<BinderInner<T>>().ok().map(Binder::from_inner)
    }

    /// Create a weak reference to this object.
    pub fn downgrade(&self) -> WpIBinder {
        match &self.0 {
            Inner::Local(object) => WpIBinder(WeakInner::Local(Arc::downgrade(object))),
            Inner::Remote(proxy) => {
                let registry = proxy.process.registry.clone();
                registry.acquire_weak(proxy.handle, Arc::as_ptr(proxy));
                WpIBinder(WeakInner::Remote {
                    handle: proxy.handle,
                    proxy: Arc::downgrade(proxy),
                    registry,
                })
            }
        }
    }
}

impl IBinder for SpIBinder {
    fn transact<F: FnOnce(&mut Parcel) -> Result<()>>(
        &self,
        code: TransactionCode,
        flags: TransactionFlags,
        input_callback: F,
    ) -> Result<Parcel> {
        let mut data = Parcel::new();
        input_callback(&mut data)?;
        match &self.0 {
            Inner::Local(object) => {
                let mut reply = None;
                dispatch(&**object, code, &data, flags, |result| reply = Some(result));
                reply.unwrap_or_else(|| Ok(Parcel::new()))
            }
            Inner::Remote(proxy) => proxy.transact(code, flags, data),
        }
    }

    fn get_interface_descriptor(&self) -> Result<String> {
        match &self.0 {
            Inner::Local(object) => Ok(object.descriptor().to_owned()),
            Inner::Remote(_) => {
                let reply = self.transact(INTERFACE_TRANSACTION, 0, |_| Ok(()))?;
                reply.read()
            }
        }
    }

    fn is_binder_alive(&self) -> bool {
        match &self.0 {
            Inner::Local(_) => true,
            Inner::Remote(proxy) => proxy.alive.load(Ordering::Acquire),
        }
    }

    fn ping_binder(&self) -> Result<()> {
        self.transact(PING_TRANSACTION, 0, |_| Ok(())).map(|_| ())
    }

    fn link_to_death(&self, recipient: &DeathRecipient) -> Result<()> {
        self.as_proxy().ok_or(StatusCode::INVALID_OPERATION)?.link_to_death(recipient)
    }

    fn unlink_to_death(&self, recipient: &DeathRecipient) -> Result<()> {
        self.as_proxy().ok_or(StatusCode::INVALID_OPERATION)?.unlink_to_death(recipient)
    }
}

impl Interface for SpIBinder {
    fn as_binder(&self) -> SpIBinder {
        self.clone()
    }
}

impl Clone for SpIBinder {
    fn clone(&self) -> Self {
        match &self.0 {
            Inner::Local(object) => SpIBinder(Inner::Local(object.clone())),
            Inner::Remote(proxy) => {
                proxy.process.registry.acquire_strong(proxy.handle, proxy);
                SpIBinder(Inner::Remote(proxy.clone()))
            }
        }
    }
}

impl Drop for SpIBinder {
    fn drop(&mut self) {
        if let Inner::Remote(proxy) = &self.0 {
            if proxy.process.registry.release_strong(proxy.handle, proxy) {
                proxy.process.release_handle(proxy.handle);
            }
        }
    }
}

impl PartialEq for SpIBinder {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Inner::Local(a), Inner::Local(b)) => a.cookie() == b.cookie(),
            (Inner::Remote(a), Inner::Remote(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for SpIBinder {}

impl fmt::Debug for SpIBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Inner::Local(object) => f
                .debug_struct("SpIBinder")
                .field("local", &object.descriptor())
                .field("cookie", &object.cookie())
                .finish(),
            Inner::Remote(proxy) => f
                .debug_struct("SpIBinder")
                .field("handle", &proxy.handle)
                .field("alive", &proxy.alive.load(Ordering::Relaxed))
                .finish(),
        }
    }
}

/// A weak reference to a Binder object.
pub struct WpIBinder(WeakInner);

enum WeakInner {
    Local(Weak<dyn LocalBinder>),
    Remote {
        handle: Handle,
        proxy: Weak<BpBinder>,
        registry: Arc<ObjectRegistry<BpBinder>>,
    },
}

impl WpIBinder {
    /// Promote this weak reference to a strong reference to the binder
    /// object.
    ///
    /// Fails once the last strong reference in this process is gone, even if
    /// the remote object itself is still alive.
    pub fn promote(&self) -> Option<SpIBinder> {
        match &self.0 {
            WeakInner::Local(object) => object.upgrade().map(SpIBinder::from_local),
            WeakInner::Remote { handle, proxy, registry } => {
                registry.promote(*handle, proxy).map(SpIBinder::adopt)
            }
        }
    }
}

impl Clone for WpIBinder {
    fn clone(&self) -> Self {
        match &self.0 {
            WeakInner::Local(object) => WpIBinder(WeakInner::Local(object.clone())),
            WeakInner::Remote { handle, proxy, registry } => {
                registry.acquire_weak(*handle, proxy.as_ptr());
                WpIBinder(WeakInner::Remote {
                    handle: *handle,
                    proxy: proxy.clone(),
                    registry: registry.clone(),
                })
            }
        }
    }
}

impl Drop for WpIBinder {
    fn drop(&mut self) {
        if let WeakInner::Remote { handle, proxy, registry } = &self.0 {
            registry.release_weak(*handle, proxy.as_ptr());
        }
    }
}

impl fmt::Debug for WpIBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WpIBinder")
    }
}

impl BpBinder {
    pub(crate) fn new(handle: Handle, process: Arc<ProcessInner>) -> Self {
        BpBinder {
            handle,
            process,
            alive: AtomicBool::new(true),
            obituaries: Mutex::new(Obituaries::default()),
        }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn process(&self) -> &Arc<ProcessInner> {
        &self.process
    }

    fn obituaries(&self) -> MutexGuard<'_, Obituaries> {
        self.obituaries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transact(&self, code: TransactionCode, flags: TransactionFlags, data: Parcel) -> Result<Parcel> {
        match ProcessInner::transact(&self.process, self.handle, code, flags, data) {
            Ok(reply) => Ok(reply.unwrap_or_default()),
            Err(StatusCode::DEAD_OBJECT) => {
                if self.alive.swap(false, Ordering::AcqRel) {
                    log::warn!("handle {} is dead", self.handle);
                }
                Err(StatusCode::DEAD_OBJECT)
            }
            Err(e) => Err(e),
        }
    }

    // The driver is asked to arm or clear its watch with the obituaries lock
    // held, so its watch always matches `armed`. The driver never calls back
    // into the proxy.
    fn link_to_death(&self, recipient: &DeathRecipient) -> Result<()> {
        let mut obituaries = self.obituaries();
        if obituaries.sent {
            return Err(StatusCode::DEAD_OBJECT);
        }
        if obituaries.recipients.iter().any(|r| r.ptr_eq(recipient)) {
            return Err(StatusCode::ALREADY_EXISTS);
        }
        if !obituaries.armed {
            self.process.request_death_notification(self.handle)?;
            obituaries.armed = true;
        }
        obituaries.recipients.push(recipient.clone());
        Ok(())
    }

    fn unlink_to_death(&self, recipient: &DeathRecipient) -> Result<()> {
        let mut obituaries = self.obituaries();
        let before = obituaries.recipients.len();
        obituaries.recipients.retain(|r| !r.ptr_eq(recipient));
        if obituaries.recipients.len() == before {
            return Err(StatusCode::NAME_NOT_FOUND);
        }
        if obituaries.recipients.is_empty() && mem::replace(&mut obituaries.armed, false) {
            self.process.clear_death_notification(self.handle)?;
        }
        Ok(())
    }

    /// Deliver the death notification to every linked recipient, once.
    pub(crate) fn send_obituary(&self) {
        let recipients = {
            let mut obituaries = self.obituaries();
            if obituaries.sent {
                return;
            }
            obituaries.sent = true;
            obituaries.armed = false;
            mem::take(&mut obituaries.recipients)
        };
        self.alive.store(false, Ordering::Release);
        log::info!(
            "handle {} died, notifying {} recipient(s)",
            self.handle,
            recipients.len()
        );
        for recipient in recipients {
            recipient.binder_died();
        }
    }
}

/// Callback run when a linked remote object dies.
///
/// Recipients are compared by identity: clones of one `DeathRecipient` are
/// the same recipient.
#[derive(Clone)]
pub struct DeathRecipient {
    callback: Arc<dyn Fn() + Send + Sync + 'static>,
}

impl DeathRecipient {
    /// Create a new death recipient that will call the given callback when
    /// its associated object dies.
    pub fn new<F>(callback: F) -> DeathRecipient
    where
        F: Fn() + Send + Sync + 'static,
    {
        DeathRecipient { callback: Arc::new(callback) }
    }

    fn ptr_eq(&self, other: &DeathRecipient) -> bool {
        Arc::as_ptr(&self.callback).cast::<()>() == Arc::as_ptr(&other.callback).cast::<()>()
    }

    fn binder_died(&self) {
        // Runs on a binder thread that serves other transactions too.
        if panic::catch_unwind(AssertUnwindSafe(|| (self.callback)())).is_err() {
            log::error!("death recipient panicked");
        }
    }
}

impl fmt::Debug for DeathRecipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeathRecipient")
    }
}

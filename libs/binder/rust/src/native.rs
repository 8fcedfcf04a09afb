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

//! Local binder objects: services implemented in this process.

use crate::binder::{Interface, Remotable, TransactionCode};
use crate::driver::Cookie;
use crate::error::Result;
use crate::parcel::{Parcel, Serialize};
use crate::proxy::{BpBinder, SpIBinder};
use crate::registry::ObjectRegistry;

use downcast_rs::{impl_downcast, DowncastSync};

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

static NEXT_COOKIE: AtomicU64 = AtomicU64::new(1);

/// Rust wrapper around a local object that can receive binder transactions.
///
/// A `Binder` owns its `rust_object` jointly with every [`SpIBinder`] that
/// refers to it, and with the driver while another process holds a handle to
/// it. The object is destroyed when the last of these goes away.
pub struct Binder<T: Remotable> {
    inner: Arc<BinderInner<T>>,
}

pub(crate) struct BinderInner<T: Remotable> {
    cookie: Cookie,
    published: Mutex<Vec<Weak<ObjectRegistry<BpBinder>>>>,
    rust_object: T,
}

/// Object-safe view of a [`Binder`] used by the transaction path.
pub(crate) trait LocalBinder: DowncastSync {
    fn descriptor(&self) -> &'static str;

    fn cookie(&self) -> Cookie;

    fn on_transact(&self, code: TransactionCode, data: &Parcel, reply: &mut Parcel) -> Result<()>;

    /// Remember that `registry` lists this object, so the entry can be
    /// dropped along with the object.
    fn mark_published(&self, registry: Weak<ObjectRegistry<BpBinder>>);
}
impl_downcast!(sync LocalBinder);

impl<T: Remotable> Binder<T> {
    /// Create a new Binder remotable object.
    ///
    /// This moves the `rust_object` into a reference-counted allocation and
    /// binder will manage its lifetime.
    pub fn new(rust_object: T) -> Binder<T> {
        Binder {
            inner: Arc::new(BinderInner {
                cookie: NEXT_COOKIE.fetch_add(1, Ordering::Relaxed),
                published: Mutex::new(Vec::new()),
                rust_object,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<BinderInner<T>>) -> Self {
        Binder { inner }
    }

    pub(crate) fn as_local(&self) -> Arc<dyn LocalBinder> {
        self.inner.clone()
    }
}

impl<T: Remotable> Clone for Binder<T> {
    fn clone(&self) -> Self {
        Binder { inner: self.inner.clone() }
    }
}

impl<T: Remotable> Deref for Binder<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner.rust_object
    }
}

impl<T: Remotable> Interface for Binder<T> {
    /// Converts the local remotable object into a generic `SpIBinder`
    /// reference.
    ///
    /// The resulting `SpIBinder` will hold its own strong reference to this
    /// remotable object, which will prevent the object from being dropped
    /// while the `SpIBinder` is alive.
    fn as_binder(&self) -> SpIBinder {
        SpIBinder::from_local(self.as_local())
    }
}

impl<T: Remotable> Serialize for Binder<T> {
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_binder(Some(&self.as_binder()))
    }
}

impl<T: Remotable> fmt::Debug for Binder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(T::get_descriptor())
    }
}

impl<T: Remotable> LocalBinder for BinderInner<T> {
    fn descriptor(&self) -> &'static str {
        T::get_descriptor()
    }

    fn cookie(&self) -> Cookie {
        self.cookie
    }

    fn on_transact(&self, code: TransactionCode, data: &Parcel, reply: &mut Parcel) -> Result<()> {
        self.rust_object.on_transact(code, data, reply)
    }

    fn mark_published(&self, registry: Weak<ObjectRegistry<BpBinder>>) {
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        if !published.iter().any(|r| r.ptr_eq(&registry)) {
            published.push(registry);
        }
    }
}

impl<T: Remotable> Drop for BinderInner<T> {
    fn drop(&mut self) {
        let published = self.published.get_mut().unwrap_or_else(PoisonError::into_inner);
        for registry in published.drain(..) {
            if let Some(registry) = registry.upgrade() {
                registry.remove_local(self.cookie);
            }
        }
    }
}

/// Tests often create a base BBinder instance; so allowing the unit
/// type to be remotable translates nicely to Binder::new(()).
impl Remotable for () {
    fn get_descriptor() -> &'static str {
        ""
    }

    fn on_transact(
        &self,
        _code: TransactionCode,
        _data: &Parcel,
        _reply: &mut Parcel,
    ) -> Result<()> {
        Ok(())
    }
}

impl Interface for () {}

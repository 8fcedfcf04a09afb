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

//! Process-wide table of binder objects.
//!
//! Every remote handle a process knows about maps to exactly one proxy
//! object, counted explicitly: the strong and weak counts here are the
//! number of `SpIBinder`s and `WpIBinder`s referring to the proxy. The entry
//! goes away with the last strong reference, and a later lookup of the same
//! handle builds a fresh proxy.
//!
//! Local objects are listed by cookie once they have been sent to another
//! process, so the driver can hand them back to us.

use crate::driver::{Cookie, Handle};
use crate::native::LocalBinder;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub(crate) struct ObjectRegistry<P> {
    inner: Mutex<RegistryInner<P>>,
}

struct RegistryInner<P> {
    proxies: HashMap<Handle, ProxyEntry<P>>,
    locals: HashMap<Cookie, Weak<dyn LocalBinder>>,
}

struct ProxyEntry<P> {
    proxy: Weak<P>,
    strong: usize,
    weak: usize,
}

impl<P> ProxyEntry<P> {
    fn holds(&self, proxy: *const P) -> bool {
        Weak::as_ptr(&self.proxy) == proxy
    }
}

impl<P> ObjectRegistry<P> {
    pub(crate) fn new() -> Self {
        ObjectRegistry {
            inner: Mutex::new(RegistryInner {
                proxies: HashMap::new(),
                locals: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the proxy for `handle` with one more strong reference, building
    /// it with `make` if the handle has no live proxy. The flag tells whether
    /// a new proxy was built.
    pub(crate) fn lookup_or_create<F>(&self, handle: Handle, make: F) -> (Arc<P>, bool)
    where
        F: FnOnce() -> P,
    {
        let mut inner = self.lock();
        if let Some(entry) = inner.proxies.get_mut(&handle) {
            if entry.strong > 0 {
                if let Some(proxy) = entry.proxy.upgrade() {
                    entry.strong += 1;
                    return (proxy, false);
                }
            }
        }
        let proxy = Arc::new(make());
        inner.proxies.insert(
            handle,
            ProxyEntry {
                proxy: Arc::downgrade(&proxy),
                strong: 1,
                weak: 0,
            },
        );
        log::debug!("new proxy for handle {}", handle);
        (proxy, true)
    }

    pub(crate) fn acquire_strong(&self, handle: Handle, proxy: &P) {
        if let Some(entry) = self.lock().proxies.get_mut(&handle) {
            if entry.holds(proxy) {
                entry.strong += 1;
            }
        }
    }

    /// Drop one strong reference. Returns true if it was the last one, in
    /// which case the entry is gone and the caller must release the driver's
    /// reference on the handle.
    pub(crate) fn release_strong(&self, handle: Handle, proxy: &P) -> bool {
        let mut inner = self.lock();
        let entry = match inner.proxies.get_mut(&handle) {
            Some(entry) if entry.holds(proxy) => entry,
            _ => return false,
        };
        entry.strong -= 1;
        if entry.strong > 0 {
            return false;
        }
        inner.proxies.remove(&handle);
        true
    }

    pub(crate) fn acquire_weak(&self, handle: Handle, proxy: *const P) {
        if let Some(entry) = self.lock().proxies.get_mut(&handle) {
            if entry.holds(proxy) {
                entry.weak += 1;
            }
        }
    }

    pub(crate) fn release_weak(&self, handle: Handle, proxy: *const P) {
        if let Some(entry) = self.lock().proxies.get_mut(&handle) {
            if entry.holds(proxy) {
                entry.weak = entry.weak.saturating_sub(1);
            }
        }
    }

    /// Turn a weak reference back into a strong one, if the proxy it names
    /// is still the live entry for `handle`.
    pub(crate) fn promote(&self, handle: Handle, proxy: &Weak<P>) -> Option<Arc<P>> {
        let mut inner = self.lock();
        let entry = inner.proxies.get_mut(&handle)?;
        if !entry.proxy.ptr_eq(proxy) || entry.strong == 0 {
            return None;
        }
        let proxy = entry.proxy.upgrade()?;
        entry.strong += 1;
        Some(proxy)
    }

    /// The live proxy for `handle`, without taking a reference.
    pub(crate) fn proxy(&self, handle: Handle) -> Option<Arc<P>> {
        self.lock().proxies.get(&handle).and_then(|e| e.proxy.upgrade())
    }

    #[cfg(test)]
    pub(crate) fn strong_count(&self, handle: Handle) -> usize {
        self.lock().proxies.get(&handle).map_or(0, |e| e.strong)
    }

    #[cfg(test)]
    pub(crate) fn weak_count(&self, handle: Handle) -> usize {
        self.lock().proxies.get(&handle).map_or(0, |e| e.weak)
    }

    pub(crate) fn proxy_count(&self) -> usize {
        self.lock().proxies.len()
    }

    pub(crate) fn publish_local(&self, object: &Arc<dyn LocalBinder>) {
        self.lock().locals.insert(object.cookie(), Arc::downgrade(object));
    }

    pub(crate) fn local(&self, cookie: Cookie) -> Option<Arc<dyn LocalBinder>> {
        self.lock().locals.get(&cookie).and_then(Weak::upgrade)
    }

    pub(crate) fn remove_local(&self, cookie: Cookie) {
        self.lock().locals.remove(&cookie);
    }

    #[cfg(test)]
    pub(crate) fn local_count(&self) -> usize {
        self.lock().locals.len()
    }
}

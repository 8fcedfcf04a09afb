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

//! Contract of the kernel-level transport that carries transactions between
//! processes.
//!
//! A driver multiplexes transactions between the processes that opened it.
//! Each process names remote objects by [`Handle`]s private to that process;
//! the driver translates object references embedded in a transaction from the
//! sender's namespace into the receiver's, and keeps a reference count per
//! handle. An object sent to a process that owns it arrives back as the
//! original local object.

use crate::binder::{TransactionCode, TransactionFlags};
use crate::error::Result;
use crate::native::LocalBinder;

use std::fmt;
use std::sync::Arc;

mod local;

pub use self::local::LocalDriver;

/// Identifies a process attached to a driver.
pub type Pid = libc::pid_t;

/// Process-local name of a remote object.
pub type Handle = u32;

/// Process-local identity of a local object, stable for its lifetime.
pub type Cookie = u64;

/// Identifies a synchronous transaction waiting for its reply.
pub type ReplyToken = u64;

/// Handle under which every process reaches the context manager.
pub const CONTEXT_MANAGER_HANDLE: Handle = 0;

/// A local binder object as the driver sees it.
///
/// The driver keeps the object alive while any other process holds a handle
/// to it.
#[derive(Clone)]
pub struct LocalObject(pub(crate) Arc<dyn LocalBinder>);

impl LocalObject {
    /// The owner-side identity of this object.
    pub fn cookie(&self) -> Cookie {
        self.0.cookie()
    }
}

impl fmt::Debug for LocalObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalObject")
            .field("cookie", &self.cookie())
            .field("descriptor", &self.0.descriptor())
            .finish()
    }
}

/// An object reference in flattened form.
#[derive(Debug)]
pub enum FlatBinderObject {
    /// An object owned by the process sending (or receiving) this reference.
    Binder(LocalObject),
    /// A reference to an object in another process.
    Handle(Handle),
}

/// A transaction buffer: payload bytes plus the object references embedded
/// in them, keyed by byte offset.
#[derive(Debug, Default)]
pub struct Transaction {
    pub code: TransactionCode,
    pub flags: TransactionFlags,
    pub data: Vec<u8>,
    pub objects: Vec<(usize, FlatBinderObject)>,
    /// Filled in by the driver on delivery.
    pub sender: Pid,
}

/// Work delivered to a process blocked in [`Driver::receive`].
#[derive(Debug)]
pub enum Work {
    /// An inbound transaction for one of the process's own objects. `reply`
    /// is present for synchronous transactions and must be answered with
    /// [`Driver::reply`].
    Transaction {
        target: LocalObject,
        transaction: Transaction,
        reply: Option<ReplyToken>,
    },
    /// The process owning the object behind `handle` has terminated.
    DeadBinder { handle: Handle },
}

/// The client-visible contract of the kernel transport.
///
/// All calls are thread-safe; any number of threads of one process may
/// be blocked in [`transact`](Driver::transact) and
/// [`receive`](Driver::receive) at the same time.
pub trait Driver: Send + Sync {
    /// Attach a new process to the driver.
    fn open(&self) -> Result<Pid>;

    /// Send a transaction from `pid` to the object behind `handle`.
    ///
    /// Blocks until the reply arrives, unless `FLAG_ONEWAY` is set, in which
    /// case the transaction is queued and `Ok(None)` returned immediately.
    /// Fails with `DEAD_OBJECT` if the owner of the object has terminated,
    /// and with `FAILED_TRANSACTION` if the sending process itself is no
    /// longer attached.
    fn transact(&self, pid: Pid, handle: Handle, transaction: Transaction)
        -> Result<Option<Transaction>>;

    /// Block until work is queued for `pid`. Returns `Ok(None)` once the
    /// process's loopers have been told to exit.
    fn receive(&self, pid: Pid) -> Result<Option<Work>>;

    /// Answer a synchronous transaction previously received by `pid`.
    fn reply(&self, pid: Pid, token: ReplyToken, reply: Result<Transaction>) -> Result<()>;

    /// Drop one reference `pid` holds on `handle`.
    fn release_handle(&self, pid: Pid, handle: Handle) -> Result<()>;

    /// Ask for a [`Work::DeadBinder`] when the owner of `handle` terminates.
    /// If it already has, the notification is queued right away.
    fn request_death_notification(&self, pid: Pid, handle: Handle) -> Result<()>;

    /// Withdraw a previous death notification request.
    fn clear_death_notification(&self, pid: Pid, handle: Handle) -> Result<()>;

    /// Make `object` the context manager, reachable by every process as
    /// [`CONTEXT_MANAGER_HANDLE`].
    fn set_context_manager(&self, pid: Pid, object: LocalObject) -> Result<()>;

    /// Unblock every thread of `pid` waiting in [`receive`](Driver::receive).
    fn exit_looper(&self, pid: Pid) -> Result<()>;

    /// Detach `pid` as if the process had terminated.
    fn close(&self, pid: Pid) -> Result<()>;
}

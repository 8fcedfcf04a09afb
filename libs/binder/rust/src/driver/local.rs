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

//! In-memory driver multiplexing transactions between processes simulated
//! inside one address space.

use super::{
    Cookie, Driver, FlatBinderObject, Handle, LocalObject, Pid, ReplyToken, Transaction, Work,
    CONTEXT_MANAGER_HANDLE,
};
use crate::binder::FLAG_ONEWAY;
use crate::error::{Result, StatusCode};

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

type NodeId = u64;

/// A driver with the semantics of the binder kernel module, kept entirely in
/// memory.
///
/// Processes opened on the same `LocalDriver` can exchange transactions and
/// object references with one another. [`close`](Driver::close) stands in for
/// process termination: it fails the process's outstanding transactions,
/// destroys its objects and delivers death notifications to every process
/// watching them.
pub struct LocalDriver {
    state: Mutex<DriverState>,
    changed: Condvar,
}

#[derive(Default)]
struct DriverState {
    next_pid: Pid,
    next_node: NodeId,
    next_token: ReplyToken,
    procs: HashMap<Pid, Proc>,
    nodes: HashMap<NodeId, Node>,
    context_manager: Option<NodeId>,
    replies: HashMap<ReplyToken, PendingReply>,
}

struct Proc {
    alive: bool,
    looper_exit: bool,
    todo: VecDeque<Work>,
    refs: HashMap<Handle, Ref>,
    handles: HashMap<NodeId, Handle>,
    next_handle: Handle,
    nodes: HashMap<Cookie, NodeId>,
}

impl Proc {
    fn new() -> Self {
        Self {
            alive: true,
            looper_exit: false,
            todo: VecDeque::new(),
            refs: HashMap::new(),
            handles: HashMap::new(),
            next_handle: CONTEXT_MANAGER_HANDLE + 1,
            nodes: HashMap::new(),
        }
    }

    fn serving(&self) -> bool {
        self.alive && !self.looper_exit
    }
}

struct Ref {
    node: NodeId,
    strong: usize,
    death: bool,
}

/// A local object known to the driver. `object` is gone once the owner died.
struct Node {
    owner: Pid,
    object: Option<LocalObject>,
    refs: usize,
    pinned: bool,
}

struct PendingReply {
    caller: Pid,
    target: Pid,
    result: Option<Result<Transaction>>,
}

/// Values released only after the state lock is dropped: destroying a local
/// object may run arbitrary code that calls back into the driver.
#[derive(Default)]
struct Graveyard(Vec<Box<dyn Send>>);

impl Graveyard {
    fn bury<T: Send + 'static>(&mut self, value: T) {
        self.0.push(Box::new(value));
    }
}

impl Default for LocalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DriverState::default()),
            changed: Condvar::new(),
        }
    }

    /// Number of processes attached and not yet closed.
    pub fn process_count(&self) -> usize {
        self.lock().procs.values().filter(|p| p.alive).count()
    }

    /// Number of live objects known to the driver.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.values().filter(|n| n.object.is_some()).count()
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, DriverState>) -> MutexGuard<'a, DriverState> {
        self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

impl DriverState {
    fn proc_mut(&mut self, pid: Pid) -> Result<&mut Proc> {
        self.procs.get_mut(&pid).ok_or(StatusCode::BAD_VALUE)
    }

    fn is_serving(&self, pid: Pid) -> bool {
        self.procs.get(&pid).map_or(false, Proc::serving)
    }

    fn is_attached(&self, pid: Pid) -> bool {
        self.procs.get(&pid).map_or(false, |p| p.alive)
    }

    /// Find the node `handle` refers to in `pid`. Handle 0 is mapped lazily
    /// to the current context manager.
    fn resolve(&mut self, pid: Pid, handle: Handle) -> Result<NodeId> {
        let context_manager = self.context_manager;
        let proc = self.proc_mut(pid)?;
        if let Some(r) = proc.refs.get(&handle) {
            return Ok(r.node);
        }
        if handle != CONTEXT_MANAGER_HANDLE {
            return Err(StatusCode::BAD_VALUE);
        }
        let node = context_manager.ok_or(StatusCode::DEAD_OBJECT)?;
        proc.refs.insert(handle, Ref { node, strong: 0, death: false });
        proc.handles.insert(node, handle);
        Ok(node)
    }

    fn node_for_local(&mut self, owner: Pid, object: LocalObject, graveyard: &mut Graveyard) -> NodeId {
        let cookie = object.cookie();
        if let Some(&id) = self.procs.get(&owner).and_then(|p| p.nodes.get(&cookie)) {
            graveyard.bury(object);
            return id;
        }
        self.next_node += 1;
        let id = self.next_node;
        self.nodes.insert(id, Node { owner, object: Some(object), refs: 0, pinned: false });
        if let Some(proc) = self.procs.get_mut(&owner) {
            proc.nodes.insert(cookie, id);
        }
        id
    }

    /// Translate object references from the namespace of `from` into that of
    /// `to`, taking one reference per delivered handle.
    fn translate(
        &mut self,
        from: Pid,
        to: Pid,
        objects: Vec<(usize, FlatBinderObject)>,
        graveyard: &mut Graveyard,
    ) -> Result<Vec<(usize, FlatBinderObject)>> {
        // Every handle must resolve before any reference is taken.
        for (_, object) in &objects {
            if let FlatBinderObject::Handle(handle) = object {
                let node = self.resolve(from, *handle)?;
                if !self.nodes.contains_key(&node) {
                    return Err(StatusCode::DEAD_OBJECT);
                }
            }
        }

        let mut translated = Vec::with_capacity(objects.len());
        let mut created = Vec::new();
        for (offset, object) in objects {
            let node_id = match object {
                FlatBinderObject::Binder(local) => {
                    let id = self.node_for_local(from, local, graveyard);
                    created.push(id);
                    id
                }
                FlatBinderObject::Handle(handle) => self.resolve(from, handle)?,
            };
            translated.push((offset, self.deliver(node_id, to)?));
        }
        for id in created {
            self.reap(id, graveyard);
        }
        Ok(translated)
    }

    fn deliver(&mut self, node_id: NodeId, to: Pid) -> Result<FlatBinderObject> {
        let node = self.nodes.get_mut(&node_id).ok_or(StatusCode::DEAD_OBJECT)?;
        if node.owner == to {
            if let Some(object) = &node.object {
                return Ok(FlatBinderObject::Binder(object.clone()));
            }
        }
        let is_context_manager = self.context_manager == Some(node_id);
        let proc = self.procs.get_mut(&to).ok_or(StatusCode::BAD_VALUE)?;
        if is_context_manager {
            proc.refs
                .entry(CONTEXT_MANAGER_HANDLE)
                .or_insert(Ref { node: node_id, strong: 0, death: false });
            proc.handles.insert(node_id, CONTEXT_MANAGER_HANDLE);
            return Ok(FlatBinderObject::Handle(CONTEXT_MANAGER_HANDLE));
        }
        let handle = match proc.handles.get(&node_id) {
            Some(&handle) => handle,
            None => {
                let handle = proc.next_handle;
                proc.next_handle += 1;
                proc.handles.insert(node_id, handle);
                proc.refs.insert(handle, Ref { node: node_id, strong: 0, death: false });
                handle
            }
        };
        if let Some(r) = proc.refs.get_mut(&handle) {
            r.strong += 1;
        }
        node.refs += 1;
        Ok(FlatBinderObject::Handle(handle))
    }

    /// Forget a node nobody refers to any more, dropping the driver's hold
    /// on its object.
    fn reap(&mut self, node_id: NodeId, graveyard: &mut Graveyard) {
        let unused = matches!(self.nodes.get(&node_id), Some(n) if n.refs == 0 && !n.pinned);
        if !unused {
            return;
        }
        if let Some(node) = self.nodes.remove(&node_id) {
            if let Some(object) = node.object {
                if let Some(owner) = self.procs.get_mut(&node.owner) {
                    owner.nodes.remove(&object.cookie());
                }
                graveyard.bury(object);
            }
        }
    }

    fn fail_reply(&mut self, token: ReplyToken, status: StatusCode) {
        if let Some(pending) = self.replies.get_mut(&token) {
            if pending.result.is_none() {
                pending.result = Some(Err(status));
            }
        }
    }

    /// Fail the synchronous transactions queued for `pid` and discard the
    /// rest of its queue.
    fn drain_todo(&mut self, pid: Pid, graveyard: &mut Graveyard) {
        let todo = match self.procs.get_mut(&pid) {
            Some(proc) => mem::take(&mut proc.todo),
            None => return,
        };
        for work in todo {
            if let Work::Transaction { reply: Some(token), .. } = &work {
                self.fail_reply(*token, StatusCode::DEAD_OBJECT);
            }
            graveyard.bury(work);
        }
    }
}

impl Driver for LocalDriver {
    fn open(&self) -> Result<Pid> {
        let mut state = self.lock();
        state.next_pid += 1;
        let pid = state.next_pid;
        state.procs.insert(pid, Proc::new());
        log::debug!("process {} attached", pid);
        Ok(pid)
    }

    fn transact(
        &self,
        pid: Pid,
        handle: Handle,
        transaction: Transaction,
    ) -> Result<Option<Transaction>> {
        let mut graveyard = Graveyard::default();
        let mut state = self.lock();

        if !state.procs.get(&pid).map_or(false, |p| p.alive) {
            graveyard.bury(transaction);
            return Err(StatusCode::FAILED_TRANSACTION);
        }
        let node_id = match state.resolve(pid, handle) {
            Ok(id) => id,
            Err(e) => {
                graveyard.bury(transaction);
                return Err(e);
            }
        };
        let (owner, target) = match state.nodes.get(&node_id) {
            Some(node) => (node.owner, node.object.clone()),
            None => (0, None),
        };
        let target = match target {
            Some(target) if state.is_serving(owner) => target,
            target => {
                graveyard.bury(target);
                graveyard.bury(transaction);
                return Err(StatusCode::DEAD_OBJECT);
            }
        };

        let Transaction { code, flags, data, objects, .. } = transaction;
        let objects = match state.translate(pid, owner, objects, &mut graveyard) {
            Ok(objects) => objects,
            Err(e) => {
                graveyard.bury(target);
                return Err(e);
            }
        };
        let transaction = Transaction { code, flags, data, objects, sender: pid };

        let reply = if flags & FLAG_ONEWAY != 0 {
            None
        } else {
            state.next_token += 1;
            let token = state.next_token;
            state.replies.insert(token, PendingReply { caller: pid, target: owner, result: None });
            Some(token)
        };
        if let Some(proc) = state.procs.get_mut(&owner) {
            proc.todo.push_back(Work::Transaction { target, transaction, reply });
        }
        self.changed.notify_all();

        let token = match reply {
            Some(token) => token,
            None => return Ok(None),
        };
        loop {
            match state.replies.get_mut(&token) {
                Some(pending) => {
                    if let Some(result) = pending.result.take() {
                        state.replies.remove(&token);
                        return result.map(Some);
                    }
                }
                None => return Err(StatusCode::FAILED_TRANSACTION),
            }
            state = self.wait(state);
        }
    }

    fn receive(&self, pid: Pid) -> Result<Option<Work>> {
        let mut state = self.lock();
        loop {
            let proc = state.proc_mut(pid)?;
            if !proc.serving() {
                return Ok(None);
            }
            if let Some(work) = proc.todo.pop_front() {
                return Ok(Some(work));
            }
            state = self.wait(state);
        }
    }

    fn reply(&self, pid: Pid, token: ReplyToken, reply: Result<Transaction>) -> Result<()> {
        let mut graveyard = Graveyard::default();
        let mut state = self.lock();

        let caller = match state.replies.get(&token) {
            Some(pending) if pending.target != pid => {
                graveyard.bury(reply);
                return Err(StatusCode::BAD_VALUE);
            }
            Some(pending) if pending.result.is_none() => pending.caller,
            _ => {
                // The caller is gone; nobody is left to read the reply.
                graveyard.bury(reply);
                return Err(StatusCode::DEAD_OBJECT);
            }
        };
        let reply = match reply {
            Ok(Transaction { code, flags, data, objects, .. }) => state
                .translate(pid, caller, objects, &mut graveyard)
                .map(|objects| Transaction { code, flags, data, objects, sender: pid }),
            Err(e) => Err(e),
        };
        if let Some(pending) = state.replies.get_mut(&token) {
            pending.result = Some(reply);
        }
        self.changed.notify_all();
        Ok(())
    }

    fn release_handle(&self, pid: Pid, handle: Handle) -> Result<()> {
        if handle == CONTEXT_MANAGER_HANDLE {
            return Ok(());
        }
        let mut graveyard = Graveyard::default();
        let mut state = self.lock();

        let proc = state.proc_mut(pid)?;
        let r = proc.refs.get_mut(&handle).ok_or(StatusCode::BAD_VALUE)?;
        r.strong = r.strong.saturating_sub(1);
        let node_id = r.node;
        if r.strong == 0 {
            proc.refs.remove(&handle);
            proc.handles.remove(&node_id);
        }
        if let Some(node) = state.nodes.get_mut(&node_id) {
            node.refs = node.refs.saturating_sub(1);
        }
        state.reap(node_id, &mut graveyard);
        Ok(())
    }

    fn request_death_notification(&self, pid: Pid, handle: Handle) -> Result<()> {
        let mut state = self.lock();
        let node_id = state.resolve(pid, handle)?;
        // Only termination counts here. A process that merely stopped its
        // loopers is still attached, and its watchers hear about it on close.
        let dead = match state.nodes.get(&node_id) {
            Some(node) => node.object.is_none() || !state.is_attached(node.owner),
            None => true,
        };
        let proc = state.proc_mut(pid)?;
        if dead {
            proc.todo.push_back(Work::DeadBinder { handle });
            self.changed.notify_all();
        } else if let Some(r) = proc.refs.get_mut(&handle) {
            r.death = true;
        }
        Ok(())
    }

    fn clear_death_notification(&self, pid: Pid, handle: Handle) -> Result<()> {
        let mut state = self.lock();
        let r = state.proc_mut(pid)?.refs.get_mut(&handle).ok_or(StatusCode::BAD_VALUE)?;
        r.death = false;
        Ok(())
    }

    fn set_context_manager(&self, pid: Pid, object: LocalObject) -> Result<()> {
        let mut graveyard = Graveyard::default();
        let mut state = self.lock();

        if !state.is_serving(pid) {
            graveyard.bury(object);
            return Err(StatusCode::DEAD_OBJECT);
        }
        if let Some(current) = state.context_manager.and_then(|id| state.nodes.get(&id)) {
            if current.object.is_some() {
                graveyard.bury(object);
                return Err(StatusCode::ALREADY_EXISTS);
            }
        }
        if let Some(old) = state.context_manager.take() {
            for proc in state.procs.values_mut() {
                proc.refs.remove(&CONTEXT_MANAGER_HANDLE);
                proc.handles.remove(&old);
            }
            state.reap(old, &mut graveyard);
        }
        let id = state.node_for_local(pid, object, &mut graveyard);
        if let Some(node) = state.nodes.get_mut(&id) {
            node.pinned = true;
        }
        state.context_manager = Some(id);
        log::info!("process {} is the context manager", pid);
        Ok(())
    }

    fn exit_looper(&self, pid: Pid) -> Result<()> {
        let mut graveyard = Graveyard::default();
        let mut state = self.lock();

        state.proc_mut(pid)?.looper_exit = true;
        state.drain_todo(pid, &mut graveyard);
        self.changed.notify_all();
        Ok(())
    }

    fn close(&self, pid: Pid) -> Result<()> {
        let mut graveyard = Graveyard::default();
        let mut state = self.lock();

        let proc = state.proc_mut(pid)?;
        if !proc.alive {
            return Ok(());
        }
        proc.alive = false;
        proc.looper_exit = true;
        let refs = mem::take(&mut proc.refs);
        let owned = mem::take(&mut proc.nodes);
        proc.handles.clear();

        state.drain_todo(pid, &mut graveyard);
        for pending in state.replies.values_mut() {
            if (pending.target == pid || pending.caller == pid) && pending.result.is_none() {
                pending.result = Some(Err(StatusCode::DEAD_OBJECT));
            }
        }

        for &node_id in owned.values() {
            if let Some(node) = state.nodes.get_mut(&node_id) {
                graveyard.bury(node.object.take());
                node.pinned = false;
            }
            for proc in state.procs.values_mut() {
                let handle = match proc.handles.get(&node_id) {
                    Some(&handle) => handle,
                    None => continue,
                };
                if let Some(r) = proc.refs.get_mut(&handle) {
                    if r.death {
                        r.death = false;
                        proc.todo.push_back(Work::DeadBinder { handle });
                    }
                }
            }
            state.reap(node_id, &mut graveyard);
        }

        for r in refs.into_values() {
            if let Some(node) = state.nodes.get_mut(&r.node) {
                node.refs = node.refs.saturating_sub(r.strong);
            }
            state.reap(r.node, &mut graveyard);
        }

        log::info!("process {} detached", pid);
        self.changed.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::FIRST_CALL_TRANSACTION;
    use crate::native::Binder;

    use std::sync::Arc;
    use std::thread;

    fn object() -> (Binder<()>, LocalObject) {
        let binder = Binder::new(());
        let local = LocalObject(binder.as_local());
        (binder, local)
    }

    fn call(code: u32, data: &[u8]) -> Transaction {
        Transaction { code, data: data.to_vec(), ..Default::default() }
    }

    #[test]
    fn reply_returns_to_the_caller() {
        let driver = Arc::new(LocalDriver::new());
        let client = driver.open().unwrap();
        let server = driver.open().unwrap();
        let (_service, local) = object();
        driver.set_context_manager(server, local.clone()).unwrap();

        let worker = {
            let driver = driver.clone();
            thread::spawn(move || match driver.receive(server).unwrap() {
                Some(Work::Transaction { target, transaction, reply: Some(token) }) => {
                    assert_eq!(target.cookie(), local.cookie());
                    assert_eq!(transaction.sender, client);
                    assert_eq!(transaction.data, vec![1, 2, 3, 4]);
                    driver.reply(server, token, Ok(call(0, &[5, 6, 7, 8]))).unwrap();
                }
                other => panic!("unexpected work {:?}", other),
            })
        };

        let reply = driver
            .transact(client, CONTEXT_MANAGER_HANDLE, call(FIRST_CALL_TRANSACTION, &[1, 2, 3, 4]))
            .unwrap()
            .unwrap();
        assert_eq!(reply.data, vec![5, 6, 7, 8]);
        worker.join().unwrap();
    }

    #[test]
    fn one_way_does_not_wait_for_the_receiver() {
        let driver = LocalDriver::new();
        let client = driver.open().unwrap();
        let server = driver.open().unwrap();
        let (_service, local) = object();
        driver.set_context_manager(server, local).unwrap();

        let mut transaction = call(FIRST_CALL_TRANSACTION, &[]);
        transaction.flags = FLAG_ONEWAY;
        assert!(driver.transact(client, CONTEXT_MANAGER_HANDLE, transaction).unwrap().is_none());
        assert!(matches!(
            driver.receive(server).unwrap(),
            Some(Work::Transaction { reply: None, .. })
        ));
    }

    #[test]
    fn objects_become_handles_and_come_back_as_themselves() {
        let driver = LocalDriver::new();
        let client = driver.open().unwrap();
        let server = driver.open().unwrap();
        let (_manager, manager_local) = object();
        driver.set_context_manager(server, manager_local).unwrap();
        let (_callback, callback_local) = object();

        let mut transaction = call(FIRST_CALL_TRANSACTION, &[0; 4]);
        transaction.flags = FLAG_ONEWAY;
        transaction.objects.push((0, FlatBinderObject::Binder(callback_local.clone())));
        driver.transact(client, CONTEXT_MANAGER_HANDLE, transaction).unwrap();

        let handle = match driver.receive(server).unwrap() {
            Some(Work::Transaction { transaction, .. }) => match &transaction.objects[..] {
                [(0, FlatBinderObject::Handle(handle))] => *handle,
                other => panic!("unexpected objects {:?}", other),
            },
            other => panic!("unexpected work {:?}", other),
        };
        assert_ne!(handle, CONTEXT_MANAGER_HANDLE);

        // Sending the handle back to its owner resolves to the object itself.
        let mut echo = call(FIRST_CALL_TRANSACTION, &[0; 4]);
        echo.flags = FLAG_ONEWAY;
        echo.objects.push((0, FlatBinderObject::Handle(handle)));
        driver.transact(server, handle, echo).unwrap();
        match driver.receive(client).unwrap() {
            Some(Work::Transaction { target, transaction, .. }) => {
                assert_eq!(target.cookie(), callback_local.cookie());
                match &transaction.objects[..] {
                    [(0, FlatBinderObject::Binder(object))] => {
                        assert_eq!(object.cookie(), callback_local.cookie())
                    }
                    other => panic!("unexpected objects {:?}", other),
                }
            }
            other => panic!("unexpected work {:?}", other),
        }
    }

    #[test]
    fn releasing_last_handle_drops_the_object() {
        let driver = LocalDriver::new();
        let client = driver.open().unwrap();
        let server = driver.open().unwrap();
        let (_manager, manager_local) = object();
        driver.set_context_manager(server, manager_local).unwrap();

        let callback = Binder::new(());
        let weak = Arc::downgrade(&callback.as_local());
        let mut transaction = call(FIRST_CALL_TRANSACTION, &[0; 4]);
        transaction.flags = FLAG_ONEWAY;
        transaction.objects.push((0, FlatBinderObject::Binder(LocalObject(callback.as_local()))));
        driver.transact(client, CONTEXT_MANAGER_HANDLE, transaction).unwrap();
        let handle = match driver.receive(server).unwrap() {
            Some(Work::Transaction { transaction, .. }) => match &transaction.objects[..] {
                [(_, FlatBinderObject::Handle(handle))] => *handle,
                _ => panic!("expected a handle"),
            },
            _ => panic!("expected a transaction"),
        };
        drop(callback);
        assert!(weak.upgrade().is_some());

        driver.release_handle(server, handle).unwrap();
        assert!(weak.upgrade().is_none());
        assert_eq!(driver.release_handle(server, handle), Err(StatusCode::BAD_VALUE));
    }

    #[test]
    fn closing_the_owner_fails_calls_and_notifies_watchers() {
        let driver = Arc::new(LocalDriver::new());
        let client = driver.open().unwrap();
        let server = driver.open().unwrap();
        let (_service, local) = object();
        driver.set_context_manager(server, local).unwrap();
        driver.request_death_notification(client, CONTEXT_MANAGER_HANDLE).unwrap();

        let caller = {
            let driver = driver.clone();
            thread::spawn(move || {
                driver.transact(client, CONTEXT_MANAGER_HANDLE, call(FIRST_CALL_TRANSACTION, &[]))
            })
        };
        // Wait until the call is queued, then kill the server without
        // answering it.
        assert!(matches!(driver.receive(server).unwrap(), Some(Work::Transaction { .. })));
        driver.close(server).unwrap();

        assert_eq!(caller.join().unwrap().unwrap_err(), StatusCode::DEAD_OBJECT);
        assert!(matches!(
            driver.receive(client).unwrap(),
            Some(Work::DeadBinder { handle: CONTEXT_MANAGER_HANDLE })
        ));
        assert_eq!(
            driver
                .transact(client, CONTEXT_MANAGER_HANDLE, call(FIRST_CALL_TRANSACTION, &[]))
                .unwrap_err(),
            StatusCode::DEAD_OBJECT
        );
        assert_eq!(driver.process_count(), 1);
        assert_eq!(driver.node_count(), 0);
    }

    #[test]
    fn stopped_owner_is_not_dead_until_it_closes() {
        let driver = LocalDriver::new();
        let client = driver.open().unwrap();
        let server = driver.open().unwrap();
        let (_service, local) = object();
        driver.set_context_manager(server, local).unwrap();
        driver.exit_looper(server).unwrap();

        driver.request_death_notification(client, CONTEXT_MANAGER_HANDLE).unwrap();
        assert!(driver.lock().procs[&client].todo.is_empty());
        assert_eq!(
            driver
                .transact(client, CONTEXT_MANAGER_HANDLE, call(FIRST_CALL_TRANSACTION, &[]))
                .unwrap_err(),
            StatusCode::DEAD_OBJECT
        );
        assert_eq!(driver.node_count(), 1);

        driver.close(server).unwrap();
        assert!(matches!(
            driver.receive(client).unwrap(),
            Some(Work::DeadBinder { handle: CONTEXT_MANAGER_HANDLE })
        ));
        assert!(driver.lock().procs[&client].todo.is_empty());
    }

    #[test]
    fn watching_a_dead_object_notifies_at_once() {
        let driver = LocalDriver::new();
        let client = driver.open().unwrap();
        let server = driver.open().unwrap();
        let (_service, local) = object();
        driver.set_context_manager(server, local).unwrap();
        driver.close(server).unwrap();

        driver.request_death_notification(client, CONTEXT_MANAGER_HANDLE).unwrap();
        assert!(matches!(driver.receive(client).unwrap(), Some(Work::DeadBinder { .. })));
    }

    #[test]
    fn exit_looper_unblocks_receivers() {
        let driver = Arc::new(LocalDriver::new());
        let pid = driver.open().unwrap();
        let looper = {
            let driver = driver.clone();
            thread::spawn(move || driver.receive(pid))
        };
        driver.exit_looper(pid).unwrap();
        assert!(looper.join().unwrap().unwrap().is_none());
    }

    #[test]
    fn only_one_live_context_manager() {
        let driver = LocalDriver::new();
        let first = driver.open().unwrap();
        let second = driver.open().unwrap();
        let (_a, a) = object();
        let (_b, b) = object();
        driver.set_context_manager(first, a).unwrap();
        assert_eq!(driver.set_context_manager(second, b.clone()), Err(StatusCode::ALREADY_EXISTS));
        driver.close(first).unwrap();
        driver.set_context_manager(second, b).unwrap();
    }
}

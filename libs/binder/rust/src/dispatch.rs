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

//! Server side of a transaction: decode, route to the service, reply.

use crate::binder::{
    TransactionCode, TransactionFlags, FIRST_CALL_TRANSACTION, FLAG_ONEWAY,
    INTERFACE_TRANSACTION, LAST_CALL_TRANSACTION, PING_TRANSACTION,
};
use crate::error::{Result, StatusCode};
use crate::native::LocalBinder;
use crate::parcel::Parcel;

use std::panic::{self, AssertUnwindSafe};

/// Where a transaction stands in the dispatcher.
///
/// A transaction moves `Received → DescriptorChecked → Routed → Executed →
/// ReplySent`, or ends in `Rejected` when its interface token or code is not
/// understood. One-way transactions stop at `Executed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Received,
    DescriptorChecked,
    Routed,
    Executed,
    ReplySent,
    Rejected,
}

struct Transaction<'a> {
    target: &'a dyn LocalBinder,
    code: TransactionCode,
    oneway: bool,
    state: TransactionState,
}

impl Transaction<'_> {
    fn advance(&mut self, next: TransactionState) {
        log::trace!(
            "{}: transaction {:#x} {:?} -> {:?}",
            self.target.descriptor(),
            self.code,
            self.state,
            next
        );
        self.state = next;
    }

    fn reject<F: FnOnce(Result<Parcel>)>(mut self, why: &str, send_reply: F) -> TransactionState {
        log::warn!(
            "{}: rejected transaction {:#x}: {}",
            self.target.descriptor(),
            self.code,
            why
        );
        self.advance(TransactionState::Rejected);
        if !self.oneway {
            send_reply(Err(StatusCode::UNKNOWN_TRANSACTION));
        }
        self.state
    }
}

/// Run one inbound transaction against `target`.
///
/// `send_reply` is called exactly once for a synchronous transaction, with
/// the reply parcel or the status to return to the caller, and never for a
/// one-way transaction. Faults inside the service are caught here and
/// returned as `UNKNOWN_ERROR`.
pub(crate) fn dispatch<F>(
    target: &dyn LocalBinder,
    code: TransactionCode,
    data: &Parcel,
    flags: TransactionFlags,
    send_reply: F,
) -> TransactionState
where
    F: FnOnce(Result<Parcel>),
{
    let mut transaction = Transaction {
        target,
        code,
        oneway: flags & FLAG_ONEWAY != 0,
        state: TransactionState::Received,
    };
    let mut reply = Parcel::new();

    let result = match code {
        PING_TRANSACTION => Ok(()),
        INTERFACE_TRANSACTION => reply.write(target.descriptor()),
        FIRST_CALL_TRANSACTION..=LAST_CALL_TRANSACTION => {
            if data.enforce_interface(target.descriptor()).is_err() {
                return transaction.reject("interface token mismatch", send_reply);
            }
            transaction.advance(TransactionState::DescriptorChecked);
            transaction.advance(TransactionState::Routed);
            invoke(target, code, data, &mut reply)
        }
        _ => return transaction.reject("reserved code", send_reply),
    };
    if result == Err(StatusCode::UNKNOWN_TRANSACTION) {
        return transaction.reject("unknown code", send_reply);
    }
    transaction.advance(TransactionState::Executed);

    if transaction.oneway {
        if let Err(e) = result {
            log::warn!("{}: one-way transaction {:#x} failed: {}", target.descriptor(), code, e);
        }
        return transaction.state;
    }
    send_reply(result.map(|()| reply));
    transaction.advance(TransactionState::ReplySent);
    transaction.state
}

fn invoke(target: &dyn LocalBinder, code: TransactionCode, data: &Parcel, reply: &mut Parcel) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| target.on_transact(code, data, reply))) {
        Ok(result) => result,
        Err(_) => {
            log::error!("{}: transaction {:#x} panicked", target.descriptor(), code);
            Err(StatusCode::UNKNOWN_ERROR)
        }
    }
}

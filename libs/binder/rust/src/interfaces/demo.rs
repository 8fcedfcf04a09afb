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

//! The demo service interface, shared by the service and its clients.

use crate::binder::{Interface, TransactionCode, FIRST_CALL_TRANSACTION, FLAG_ONEWAY};
use crate::error::{Result, StatusCode};
use crate::native::Binder;
use crate::parcel::Parcel;

/// Name the demo service is registered under.
pub const SERVICE_NAME: &str = "binder_Demo";

/// Payload of every [`alert`](IDemo::alert) call.
pub const ALERT_STRING: &str = "The alert string";

pub trait IDemo: Interface {
    /// Sends a fixed alert string to the service. One-way: returns without
    /// waiting for the service.
    fn alert(&self) -> Result<()>;

    /// Sends a user-provided value to the service
    fn push(&self, data: i32) -> Result<()>;

    /// Requests the service to perform an addition and return the result
    fn add(&self, v1: i32, v2: i32) -> Result<i32>;
}

declare_binder_interface! {
    IDemo["Demo"] {
        native: BnDemo(on_transact),
        proxy: BpDemo,
    }
}

const ALERT: TransactionCode = FIRST_CALL_TRANSACTION;
const PUSH: TransactionCode = FIRST_CALL_TRANSACTION + 1;
const ADD: TransactionCode = FIRST_CALL_TRANSACTION + 2;

fn on_transact(
    service: &dyn IDemo,
    code: TransactionCode,
    data: &Parcel,
    reply: &mut Parcel,
) -> Result<()> {
    log::debug!("BnDemo::on_transact({:#x})\n{}", code, data);
    match code {
        ALERT => {
            let message: String = data.read()?;
            log::debug!("BnDemo::on_transact got {:?}", message);
            service.alert()
        }
        PUSH => {
            let value: i32 = data.read()?;
            service.push(value)
        }
        ADD => {
            let v1: i32 = data.read()?;
            let v2: i32 = data.read()?;
            let sum = service.add(v1, v2)?;
            log::debug!("BnDemo::on_transact add({}, {}) = {}", v1, v2, sum);
            reply.write(&sum)
        }
        _ => Err(StatusCode::UNKNOWN_TRANSACTION),
    }
}

impl IDemo for BpDemo {
    fn alert(&self) -> Result<()> {
        self.call(ALERT, FLAG_ONEWAY, |data| data.write(ALERT_STRING))?;
        Ok(())
    }

    fn push(&self, value: i32) -> Result<()> {
        let reply = self.call(PUSH, 0, |data| {
            data.write(&value)?;
            log::debug!("BpDemo::push parcel to be sent:\n{}", data);
            Ok(())
        })?;
        log::debug!("BpDemo::push parcel reply:\n{}", reply);
        Ok(())
    }

    fn add(&self, v1: i32, v2: i32) -> Result<i32> {
        let reply = self.call(ADD, 0, |data| {
            data.write(&v1)?;
            data.write(&v2)
        })?;
        log::debug!("BpDemo::add transact reply:\n{}", reply);
        reply.read()
    }
}

impl IDemo for Binder<BnDemo> {
    fn alert(&self) -> Result<()> {
        self.0.alert()
    }

    fn push(&self, value: i32) -> Result<()> {
        self.0.push(value)
    }

    fn add(&self, v1: i32, v2: i32) -> Result<i32> {
        self.0.add(v1, v2)
    }
}

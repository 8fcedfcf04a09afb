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

//! Safe Rust binder IPC core.
//!
//! Processes attach to a [`Driver`](driver::Driver), which carries
//! transactions between them. A service is a [`Remotable`] wrapped in a
//! [`Binder`]; other processes reach it through an [`SpIBinder`] proxy and
//! talk to it with [`Parcel`]s, usually through a typed interface declared
//! with [`declare_binder_interface!`].
//!
//! # Example
//!
//! The following example illustrates how the AIDL backend would use this
//! crate.
//!
//! ```no_run
//! use binder::{declare_binder_interface, Binder, Interface, Parcel, Result};
//! use binder::{StatusCode, TransactionCode, FIRST_CALL_TRANSACTION};
//!
//! // Generated by AIDL compiler
//! pub trait ITest: Interface {
//!     fn test(&self) -> Result<String>;
//! }
//!
//! // Creates a new local (native) service object, BnTest, and a remote proxy
//! // object, BpTest, that are the typed interfaces for their respective ends
//! // of the binder transaction. Generated by AIDL compiler.
//! declare_binder_interface! {
//!     ITest["android.os.ITest"] {
//!         native: BnTest(on_transact),
//!         proxy: BpTest,
//!     }
//! }
//!
//! // Generated by AIDL compiler
//! fn on_transact(
//!     service: &dyn ITest,
//!     code: TransactionCode,
//!     _data: &Parcel,
//!     reply: &mut Parcel,
//! ) -> Result<()> {
//!     match code {
//!         FIRST_CALL_TRANSACTION => reply.write(&service.test()?),
//!         _ => Err(StatusCode::UNKNOWN_TRANSACTION),
//!     }
//! }
//!
//! // Generated by AIDL compiler
//! impl ITest for BpTest {
//!     fn test(&self) -> Result<String> {
//!         let reply = self.call(FIRST_CALL_TRANSACTION, 0, |_| Ok(()))?;
//!         reply.read()
//!     }
//! }
//!
//! // Generated by AIDL compiler
//! impl ITest for Binder<BnTest> {
//!     fn test(&self) -> Result<String> {
//!         self.0.test()
//!     }
//! }
//!
//! // User implementation of the ITest interface
//! struct TestService;
//!
//! impl Interface for TestService {}
//!
//! impl ITest for TestService {
//!     fn test(&self) -> Result<String> {
//!         Ok("testing service".to_string())
//!     }
//! }
//!
//! let service = BnTest::new_binder(TestService);
//! ```

#[macro_use]
mod binder;
mod dispatch;
mod error;
mod native;
mod proxy;
mod registry;
mod state;

pub mod driver;
pub mod interfaces;
pub mod parcel;
pub mod service_manager;

pub use crate::binder::{
    FromIBinder, IBinder, Interface, Proxy, Remotable, Strong, TransactionCode, TransactionFlags,
    FIRST_CALL_TRANSACTION, FLAG_ONEWAY, INTERFACE_TRANSACTION, LAST_CALL_TRANSACTION,
    PING_TRANSACTION,
};
pub use driver::{Driver, LocalDriver};
pub use error::{status_result, status_t, Result, StatusCode};
pub use native::Binder;
pub use parcel::Parcel;
pub use proxy::{DeathRecipient, SpIBinder, WpIBinder};
pub use service_manager::{add_service, get_interface, get_service};
pub use state::{ProcessConfig, ProcessState, ThreadState};

#[doc(hidden)]
pub use log;

/// The public API usable outside AIDL-generated interface crates.
pub mod prelude {
    pub use super::{
        add_service, get_interface, get_service, Binder, DeathRecipient, FromIBinder, IBinder,
        Interface, ProcessState, SpIBinder, Strong, WpIBinder,
    };
}

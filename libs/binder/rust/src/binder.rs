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

//! Trait definitions for binder objects

use crate::error::Result;
use crate::parcel::{Deserialize, Parcel, Serialize};
use crate::proxy::{DeathRecipient, SpIBinder};

use std::fmt;
use std::ops::Deref;

/// Binder action to perform.
///
/// This must be a number between [`FIRST_CALL_TRANSACTION`] and
/// [`LAST_CALL_TRANSACTION`] for the methods of an interface. Codes below
/// `FIRST_CALL_TRANSACTION` are reserved for transactions every object
/// answers.
pub type TransactionCode = u32;

/// Additional operation flags.
///
/// Can be either 0 for a normal RPC, or [`FLAG_ONEWAY`] for a one-way RPC.
pub type TransactionFlags = u32;

/// Liveness check answered by every live object.
pub const PING_TRANSACTION: TransactionCode = 0x01;
/// Asks an object for its interface descriptor.
pub const INTERFACE_TRANSACTION: TransactionCode = 0x02;
pub const FIRST_CALL_TRANSACTION: TransactionCode = 0x10;
pub const LAST_CALL_TRANSACTION: TransactionCode = 0x00ff_ffff;

/// Corresponds to TF_ONE_WAY -- an asynchronous call.
pub const FLAG_ONEWAY: TransactionFlags = 0x01;

/// Super-trait for Binder interfaces.
///
/// This trait allows conversion of a Binder interface trait object into an
/// IBinder object for IPC calls. All Binder remotable interface (i.e. AIDL
/// interfaces) must have this trait as a super-trait.
pub trait Interface: Send + Sync {
    /// Convert this binder object into a generic [`SpIBinder`] reference.
    fn as_binder(&self) -> SpIBinder {
        panic!("This object was not a Binder object and cannot be used as one.")
    }
}

/// A local service that can be remotable via Binder.
///
/// An object that implement this interface made be made into a Binder service
/// via `Binder::new(object)`.
///
/// This is a low-level interface that should normally be automatically
/// generated by [`declare_binder_interface!`].
pub trait Remotable: Send + Sync + 'static {
    /// The Binder interface descriptor string.
    ///
    /// This string is a unique identifier for a Binder interface, and should be
    /// the same between all implementations of that interface.
    fn get_descriptor() -> &'static str;

    /// Handle and reply to a request to invoke a transaction on this object.
    ///
    /// The interface token has already been checked and consumed from `data`
    /// when this is called. Returning `Err(UNKNOWN_TRANSACTION)` rejects the
    /// transaction.
    fn on_transact(&self, code: TransactionCode, data: &Parcel, reply: &mut Parcel) -> Result<()>;
}

/// Interface of binder local or remote objects.
///
/// This trait corresponds to the interface of the C++ `IBinder` class.
pub trait IBinder {
    const FIRST_CALL_TRANSACTION: TransactionCode = FIRST_CALL_TRANSACTION;
    const LAST_CALL_TRANSACTION: TransactionCode = LAST_CALL_TRANSACTION;
    const PING_TRANSACTION: TransactionCode = PING_TRANSACTION;
    const INTERFACE_TRANSACTION: TransactionCode = INTERFACE_TRANSACTION;

    /// Corresponds to TF_ONE_WAY -- an asynchronous call.
    const FLAG_ONEWAY: TransactionFlags = FLAG_ONEWAY;

    /// Perform a generic operation with the object.
    ///
    /// # Arguments
    /// * `code` - Transaction code for the operation
    /// * `flags` - Transaction flags, e.g. marking the transaction as
    ///   asynchronous ([`FLAG_ONEWAY`])
    /// * `input_callback` A callback for building the `Parcel`.
    ///
    /// One-way transactions return an empty reply without waiting for the
    /// object to handle them.
    fn transact<F: FnOnce(&mut Parcel) -> Result<()>>(
        &self,
        code: TransactionCode,
        flags: TransactionFlags,
        input_callback: F,
    ) -> Result<Parcel>;

    /// Return the canonical name of the interface provided by this IBinder
    /// object.
    fn get_interface_descriptor(&self) -> Result<String>;

    /// Is this object still alive?
    fn is_binder_alive(&self) -> bool;

    /// Send a ping transaction to this object
    fn ping_binder(&self) -> Result<()>;

    /// Register the recipient for a notification if this binder
    /// goes away. If this binder object unexpectedly goes away
    /// (typically because its hosting process has been killed),
    /// then the recipient's callback will be called.
    ///
    /// You will only receive death notifications for remote binders,
    /// as local binders by definition can't die without you dying as well.
    /// Trying to use this function on a local binder will result in an
    /// INVALID_OPERATION code being returned and nothing happening.
    ///
    /// The same recipient may be linked only once to a given binder;
    /// a second attempt fails with ALREADY_EXISTS. The binder keeps the
    /// recipient alive for as long as the link stands.
    fn link_to_death(&self, recipient: &DeathRecipient) -> Result<()>;

    /// Remove a previously registered death notification.
    /// The recipient will no longer be called if this object
    /// dies.
    fn unlink_to_death(&self, recipient: &DeathRecipient) -> Result<()>;
}

/// Interface for transforming a generic SpIBinder into a specific remote
/// interface trait.
///
/// # Example
///
/// For Binder interface `IFoo`, the following implementation should be made:
/// ```no_run
/// # use binder::{FromIBinder, SpIBinder, Result, Strong};
/// # trait IFoo: binder::Interface {}
/// impl FromIBinder for dyn IFoo {
///     fn try_from(ibinder: SpIBinder) -> Result<Strong<dyn IFoo>> {
///         // ...
///         # Err(binder::StatusCode::BAD_TYPE)
///     }
///
///     fn from_verified(ibinder: SpIBinder) -> Strong<dyn IFoo> {
///         // ...
///         # unimplemented!()
///     }
/// }
/// ```
pub trait FromIBinder: Interface {
    /// Try to interpret a generic Binder object as this interface.
    ///
    /// Returns a trait object for the `Self` interface if this object
    /// implements that interface.
    fn try_from(ibinder: SpIBinder) -> Result<Strong<Self>>;

    /// Rewrap an object already known to implement this interface, without
    /// asking it again. Used by [`Strong::clone`].
    fn from_verified(ibinder: SpIBinder) -> Strong<Self>;
}

/// Trait for transparent Rust wrappers around remote binder objects.
///
/// Implementors of this trait hold a binder object reference that may be
/// remote, and forward method calls to it as transactions.
pub trait Proxy: Sized + Interface {
    /// The Binder interface descriptor string.
    ///
    /// This string is a unique identifier for a Binder interface, and should be
    /// the same between all implementations of that interface.
    fn get_descriptor() -> &'static str;

    /// Create a new interface from the given proxy, if it matches the expected
    /// type of this interface.
    fn from_binder(binder: SpIBinder) -> Result<Self>;
}

/// Strong reference to a binder object.
///
/// The object may be local (the concrete service) or a proxy forwarding to a
/// remote object; callers cannot tell the difference.
pub struct Strong<I: FromIBinder + ?Sized>(Box<I>);

impl<I: FromIBinder + ?Sized> Strong<I> {
    /// Create a new strong reference to the provided binder object
    pub fn new(binder: Box<I>) -> Self {
        Self(binder)
    }
}

impl<I: FromIBinder + ?Sized> Clone for Strong<I> {
    fn clone(&self) -> Self {
        I::from_verified(self.0.as_binder())
    }
}

impl<I: FromIBinder + ?Sized> Deref for Strong<I> {
    type Target = I;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<I: FromIBinder + ?Sized> Serialize for Strong<I> {
    fn serialize(&self, parcel: &mut Parcel) -> Result<()> {
        parcel.write_binder(Some(&self.0.as_binder()))
    }
}

impl<I: FromIBinder + ?Sized> Deserialize for Strong<I> {
    fn deserialize(parcel: &Parcel) -> Result<Self> {
        let ibinder: SpIBinder = parcel.read()?;
        FromIBinder::try_from(ibinder)
    }
}

impl<I: FromIBinder + fmt::Debug + ?Sized> fmt::Debug for Strong<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Declare a binder interface.
///
/// This is mainly used internally by the AIDL compiler.
///
/// Given an interface trait `$interface` declared with [`Interface`] as a
/// super-trait, this generates:
///
/// * `$proxy`, a [`Proxy`] that forwards calls to a (potentially) remote
///   object, with a `call` helper that writes the interface token before the
///   arguments,
/// * `$native`, a [`Remotable`] stub that hands incoming transactions to
///   `$on_transact`, and whose `new_binder` turns a service implementation
///   into a `Strong<dyn $interface>`,
/// * [`FromIBinder`] for `dyn $interface`, which resolves to the local stub
///   when the object lives in this process and to `$proxy` otherwise,
/// * parcel serialization for `dyn $interface`.
///
/// `impl $interface for Binder<$native>` must be written alongside, forwarding
/// each method to the wrapped service.
///
/// # Examples
///
/// ```no_run
/// use binder::{declare_binder_interface, Binder, Interface, Parcel, Result};
/// use binder::{StatusCode, TransactionCode, FIRST_CALL_TRANSACTION};
///
/// pub trait IServiceManager: Interface {
///     // remote methods...
/// }
///
/// declare_binder_interface! {
///     IServiceManager["android.os.IServiceManager"] {
///         native: BnServiceManager(on_transact),
///         proxy: BpServiceManager,
///     }
/// }
///
/// fn on_transact(
///     service: &dyn IServiceManager,
///     code: TransactionCode,
///     data: &Parcel,
///     reply: &mut Parcel,
/// ) -> Result<()> {
///     // ...
///     Ok(())
/// }
///
/// impl IServiceManager for BpServiceManager {
///     // parcel methods...
/// }
///
/// impl IServiceManager for Binder<BnServiceManager> {
///     // forward methods to the wrapped service...
/// }
/// ```
#[macro_export]
macro_rules! declare_binder_interface {
    {
        $interface:ident[$descriptor:expr] {
            native: $native:ident($on_transact:path),
            proxy: $proxy:ident,
        }
    } => {
        #[doc = concat!("A binder [`Proxy`]($crate::Proxy) that holds an [`", stringify!($interface), "`] remote interface.")]
        pub struct $proxy {
            binder: $crate::SpIBinder,
        }

        impl $crate::Interface for $proxy {
            fn as_binder(&self) -> $crate::SpIBinder {
                self.binder.clone()
            }
        }

        impl $crate::Proxy for $proxy
        where
            $proxy: $interface,
        {
            fn get_descriptor() -> &'static str {
                $descriptor
            }

            fn from_binder(binder: $crate::SpIBinder) -> $crate::Result<Self> {
                Ok(Self { binder })
            }
        }

        impl $proxy {
            /// Send a transaction addressed to this interface: the interface
            /// token followed by whatever `input` writes.
            pub fn call<F>(
                &self,
                code: $crate::TransactionCode,
                flags: $crate::TransactionFlags,
                input: F,
            ) -> $crate::Result<$crate::Parcel>
            where
                F: FnOnce(&mut $crate::Parcel) -> $crate::Result<()>,
            {
                $crate::IBinder::transact(&self.binder, code, flags, |data| {
                    data.write_interface_token($descriptor)?;
                    input(data)
                })
            }
        }

        #[doc = concat!("A binder [`Remotable`]($crate::Remotable) that holds an [`", stringify!($interface), "`] object.")]
        pub struct $native(Box<dyn $interface + Sync + Send + 'static>);

        impl $native {
            /// Create a new binder service.
            pub fn new_binder<T: $interface + Sync + Send + 'static>(inner: T) -> $crate::Strong<dyn $interface> {
                let binder = $crate::Binder::new($native(Box::new(inner)));
                $crate::Strong::new(Box::new(binder))
            }
        }

        impl $crate::Remotable for $native {
            fn get_descriptor() -> &'static str {
                $descriptor
            }

            fn on_transact(
                &self,
                code: $crate::TransactionCode,
                data: &$crate::Parcel,
                reply: &mut $crate::Parcel,
            ) -> $crate::Result<()> {
                $on_transact(&*self.0, code, data, reply)
            }
        }

        impl $crate::FromIBinder for dyn $interface {
            fn try_from(ibinder: $crate::SpIBinder) -> $crate::Result<$crate::Strong<dyn $interface>> {
                if let Some(service) = ibinder.downcast_local::<$native>() {
                    return Ok($crate::Strong::new(Box::new(service)));
                }
                let descriptor = $crate::IBinder::get_interface_descriptor(&ibinder)?;
                if descriptor != $descriptor {
                    $crate::log::warn!(
                        "object implements {:?}, not {:?}",
                        descriptor,
                        $descriptor
                    );
                    return Err($crate::StatusCode::BAD_TYPE);
                }
                let proxy = <$proxy as $crate::Proxy>::from_binder(ibinder)?;
                Ok($crate::Strong::new(Box::new(proxy)))
            }

            fn from_verified(ibinder: $crate::SpIBinder) -> $crate::Strong<dyn $interface> {
                match ibinder.downcast_local::<$native>() {
                    Some(service) => $crate::Strong::new(Box::new(service)),
                    None => $crate::Strong::new(Box::new($proxy { binder: ibinder })),
                }
            }
        }

        impl $crate::parcel::Serialize for dyn $interface + '_ {
            fn serialize(&self, parcel: &mut $crate::Parcel) -> $crate::Result<()> {
                parcel.write_binder(Some(&$crate::Interface::as_binder(self)))
            }
        }

        impl std::fmt::Debug for dyn $interface {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(stringify!($interface))
            }
        }
    };
}

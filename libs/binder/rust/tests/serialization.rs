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

use binder::service_manager::run_service_manager;
use binder::{
    declare_binder_interface, Binder, Driver, IBinder, Interface, LocalDriver, Parcel,
    ProcessState, SpIBinder, StatusCode, TransactionCode, FIRST_CALL_TRANSACTION,
};

use std::sync::Arc;

static I32S: &[i32; 4] = &[i32::MIN, 0, 117, i32::MAX];
static STRINGS: &[&str; 4] = &["", "test", "😁", "The alert string"];

const READ_PARCEL: TransactionCode = FIRST_CALL_TRANSACTION;
const ECHO_BINDER: TransactionCode = FIRST_CALL_TRANSACTION + 1;
const OWNS: TransactionCode = FIRST_CALL_TRANSACTION + 2;

pub trait ReadParcelTest: Interface {}

declare_binder_interface! {
    ReadParcelTest["read_parcel_test"] {
        native: BnReadParcelTest(on_transact),
        proxy: BpReadParcelTest,
    }
}

impl ReadParcelTest for Binder<BnReadParcelTest> {}

impl ReadParcelTest for BpReadParcelTest {}

impl ReadParcelTest for () {}

fn on_transact(
    _service: &dyn ReadParcelTest,
    code: TransactionCode,
    parcel: &Parcel,
    reply: &mut Parcel,
) -> binder::Result<()> {
    match code {
        READ_PARCEL => {
            assert!(parcel.read::<bool>()?);
            assert!(!parcel.read::<bool>()?);

            assert_eq!(parcel.read::<i32>()?, 0);
            assert_eq!(parcel.read::<i32>()?, i32::MAX);
            assert_eq!(parcel.read::<Vec<i32>>()?, I32S);
            assert_eq!(parcel.read::<u32>()?, u32::MAX);
            assert_eq!(parcel.read::<i64>()?, i64::MIN);
            assert_eq!(parcel.read::<u64>()?, u64::MAX);

            assert_eq!(parcel.read::<Option<String>>()?.as_deref(), Some("testing"));
            assert_eq!(parcel.read::<Option<String>>()?, None);
            assert_eq!(parcel.read::<Vec<String>>()?, STRINGS);

            assert!(parcel.read::<Option<SpIBinder>>()?.is_some());
            assert!(parcel.read::<Option<SpIBinder>>()?.is_none());

            assert_eq!(parcel.read::<i32>(), Err(StatusCode::NOT_ENOUGH_DATA));

            reply.write(&true)?;
            reply.write(&I32S[..])?;
            reply.write("testing")?;
            reply.write(&(None as Option<String>))?;
            Ok(())
        }
        ECHO_BINDER => {
            let binder: SpIBinder = parcel.read()?;
            reply.write(&binder)
        }
        OWNS => {
            let binder: SpIBinder = parcel.read()?;
            reply.write(&!binder.is_remote())
        }
        _ => Err(StatusCode::UNKNOWN_TRANSACTION),
    }
}

struct Processes {
    service: ProcessState,
    client: ProcessState,
}

fn start() -> Processes {
    let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new());
    let service_manager = ProcessState::open(driver.clone()).unwrap();
    run_service_manager(&service_manager).unwrap();
    service_manager.start_thread_pool().unwrap();

    let service = ProcessState::open(driver.clone()).unwrap();
    let test_service = BnReadParcelTest::new_binder(());
    binder::add_service(&service, "read_parcel_test", test_service.as_binder()).unwrap();
    service.start_thread_pool().unwrap();

    let client = ProcessState::open(driver).unwrap();
    client.start_thread_pool().unwrap();
    Processes { service, client }
}

fn token(data: &mut Parcel) -> binder::Result<()> {
    data.write_interface_token("read_parcel_test")
}

#[test]
fn test_parcel_serialization() {
    let processes = start();
    let service = binder::get_service(&processes.client, "read_parcel_test").unwrap();
    let object = BnReadParcelTest::new_binder(());

    let reply = service
        .transact(READ_PARCEL, 0, |data| {
            token(data)?;
            data.write(&true)?;
            data.write(&false)?;
            data.write(&0i32)?;
            data.write(&i32::MAX)?;
            data.write(&I32S[..])?;
            data.write(&u32::MAX)?;
            data.write(&i64::MIN)?;
            data.write(&u64::MAX)?;
            data.write("testing")?;
            data.write(&(None as Option<String>))?;
            data.write(&STRINGS[..])?;
            data.write(&object.as_binder())?;
            data.write(&(None as Option<SpIBinder>))
        })
        .unwrap();

    assert_eq!(reply.read::<bool>(), Ok(true));
    assert_eq!(reply.read::<Vec<i32>>(), Ok(I32S.to_vec()));
    assert_eq!(reply.read::<String>(), Ok("testing".to_string()));
    assert_eq!(reply.read::<Option<String>>(), Ok(None));
    assert_eq!(reply.read::<i32>(), Err(StatusCode::NOT_ENOUGH_DATA));
}

#[test]
fn bad_parcel_is_reported_to_the_caller() {
    let processes = start();
    let service = binder::get_service(&processes.client, "read_parcel_test").unwrap();

    let reply = service.transact(ECHO_BINDER, 0, |data| {
        token(data)?;
        data.write(&5i32)
    });
    assert_eq!(reply.err(), Some(StatusCode::BAD_TYPE));

    let reply = service.transact(ECHO_BINDER, 0, token);
    assert_eq!(reply.err(), Some(StatusCode::NOT_ENOUGH_DATA));
}

#[test]
fn objects_arrive_as_proxies_and_return_as_themselves() {
    let processes = start();
    let service = binder::get_service(&processes.client, "read_parcel_test").unwrap();
    let object = BnReadParcelTest::new_binder(()).as_binder();

    let owns = |binder: &SpIBinder| {
        service
            .transact(OWNS, 0, |data| {
                token(data)?;
                data.write(binder)
            })
            .and_then(|reply| reply.read::<bool>())
    };
    // The service gets a proxy for the client's object, and its own object
    // back as a local one.
    assert_eq!(owns(&object), Ok(false));
    assert_eq!(owns(&service), Ok(true));

    let reply = service
        .transact(ECHO_BINDER, 0, |data| {
            token(data)?;
            data.write(&object)
        })
        .unwrap();
    let echoed: SpIBinder = reply.read().unwrap();
    assert!(!echoed.is_remote());
    assert_eq!(echoed, object);
    assert_eq!(echoed.get_interface_descriptor().unwrap(), "read_parcel_test");
}

#[test]
fn proxies_cannot_be_sent_through_another_process() {
    let processes = start();
    let from_client = binder::get_service(&processes.client, "read_parcel_test").unwrap();
    let from_service_manager = processes.service.context_object();

    let reply = from_client.transact(ECHO_BINDER, 0, |data| {
        token(data)?;
        data.write(&from_service_manager)
    });
    assert_eq!(reply.err(), Some(StatusCode::BAD_VALUE));
}

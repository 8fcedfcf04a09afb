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

//! Demo service and client.
//!
//! With no argument, runs the `binder_Demo` service until it is killed. With
//! an integer `N`, also runs a client that calls `alert()`, `push(N)` and
//! `add(N, 5)`; with `0` the client then keeps calling `add(2, 3)` until it
//! is told the service died.
//!
//! The driver is in-memory, so the service manager, the service and the
//! client are separate binder processes inside this one OS process.

use binder::interfaces::{BnDemo, IDemo, SERVICE_NAME};
use binder::service_manager::run_service_manager;
use binder::{
    status_t, DeathRecipient, Driver, IBinder, Interface, LocalDriver, ProcessConfig,
    ProcessState, SpIBinder, StatusCode, Strong,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use std::process;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "binder_demo", version, about, long_about = None)]
struct Args {
    /// Run a client against the service with this value. Without it, only the
    /// service runs.
    value: Option<i32>,

    /// Binder threads per process.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Delay between two calls of the client loop, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    interval_ms: u64,

    /// Terminate the service process after this many iterations of the
    /// client loop.
    #[arg(long)]
    kill_after: Option<u32>,
}

struct Demo;

impl Interface for Demo {}

impl IDemo for Demo {
    fn alert(&self) -> binder::Result<()> {
        println!("Demo::alert()");
        Ok(())
    }

    fn push(&self, data: i32) -> binder::Result<()> {
        println!("Demo::push({})", data);
        Ok(())
    }

    fn add(&self, v1: i32, v2: i32) -> binder::Result<i32> {
        println!("Demo::add({}, {})", v1, v2);
        Ok(v1.wrapping_add(v2))
    }
}

fn main() {
    // The library logs through `log`; the subscriber picks those records up.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("binder_demo: {}", e);
        process::exit(1);
    }
}

fn run(args: &Args) -> binder::Result<()> {
    let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new());
    let config = ProcessConfig {
        max_threads: args.threads,
        ..Default::default()
    };

    let service_manager = ProcessState::open_with_config(driver.clone(), config.clone())?;
    run_service_manager(&service_manager)?;
    service_manager.start_thread_pool()?;

    let service = start_service(driver.clone(), config.clone())?;
    match args.value {
        None => {
            println!("We're the service");
            service.join_thread_pool();
            log::info!("Binder_Demo service thread joined");
            Ok(())
        }
        Some(value) => {
            println!("We're the client: {}", value);
            let client = ProcessState::open_with_config(driver, config)?;
            run_client(&client, &service, value, args)
        }
    }
}

fn start_service(driver: Arc<dyn Driver>, config: ProcessConfig) -> binder::Result<ProcessState> {
    let process = ProcessState::open_with_config(driver, config)?;
    let demo = BnDemo::new_binder(Demo);
    binder::add_service(&process, SERVICE_NAME, demo.as_binder())?;
    process.start_thread_pool()?;
    log::info!("Binder_Demo service is now ready");
    Ok(process)
}

fn status(result: binder::Result<()>) -> status_t {
    match result {
        Ok(()) => StatusCode::OK as status_t,
        Err(e) => e as status_t,
    }
}

fn get_demo_service(process: &ProcessState) -> binder::Result<SpIBinder> {
    let binder = binder::get_service(process, SERVICE_NAME).ok_or(StatusCode::NAME_NOT_FOUND)?;
    println!("pingBinder: rc={}", status(binder.ping_binder()));
    Ok(binder)
}

fn run_client(
    client: &ProcessState,
    service: &ProcessState,
    value: i32,
    args: &Args,
) -> binder::Result<()> {
    const ADDER: i32 = 5;

    let binder = get_demo_service(client)?;
    let demo: Strong<dyn IDemo> = binder.clone().into_interface()?;

    demo.alert()?;
    demo.push(value)?;
    let sum = demo.add(value, ADDER)?;
    println!("BpDemo::add({}, {}) = {}", value, ADDER, sum);
    log::info!("Addition result: {} + {} = {}", value, ADDER, sum);
    if value != 0 {
        return Ok(());
    }

    // Loop until the service dies.
    let (stop, stopped) = mpsc::channel();
    let stop = Mutex::new(stop);
    let recipient = DeathRecipient::new(move || {
        println!("death notification: binder_died");
        let _ = stop.lock().unwrap_or_else(PoisonError::into_inner).send(());
    });
    println!("linkToDeath: rc={}", status(binder.link_to_death(&recipient)));
    // Death notifications are delivered on the client's binder threads.
    client.start_thread_pool()?;

    let interval = Duration::from_millis(args.interval_ms);
    let mut iterations = 0;
    loop {
        match demo.add(2, 3) {
            Ok(sum) => log::info!("demo->add(), sum={}", sum),
            Err(e) => log::warn!("demo->add() failed: {}", e),
        }
        iterations += 1;
        if args.kill_after == Some(iterations) {
            log::info!("terminating the service process");
            service.exit()?;
        }
        match stopped.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => (),
        }
    }

    log::info!("client exiting after {} iterations", iterations);
    client.shutdown()
}

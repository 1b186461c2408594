// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Worker threads, each running its own single-threaded runtime and accept loops.

use lantern_module_utils::{Error, ErrorType, RequestFilter};
use log::{debug, error, trace, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::configuration::ConnectionSettings;
use crate::connection::handle_connection;
use crate::DefaultApp;

/// Pause after a failed `accept`, e.g. when running out of file descriptors
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(50);

pub(crate) fn spawn_workers<H>(
    app: &Arc<DefaultApp<H>>,
    listeners: &[std::net::TcpListener],
    workers: usize,
    worker_connections: usize,
    settings: ConnectionSettings,
) -> Result<Vec<JoinHandle<()>>, Box<Error>>
where
    H: RequestFilter + 'static,
{
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let listeners = listeners
            .iter()
            .map(|listener| listener.try_clone())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::because(ErrorType::BindError, "failed cloning listening socket", err)
            })?;
        let app = Arc::clone(app);

        let handle = std::thread::Builder::new()
            .name(format!("lantern-worker-{worker_id}"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!("Worker {worker_id} failed creating runtime: {err}");
                        return;
                    }
                };
                runtime.block_on(worker_loop(
                    worker_id,
                    app,
                    listeners,
                    worker_connections,
                    settings,
                ));
            })
            .map_err(|err| {
                Error::because(ErrorType::InternalError, "failed spawning worker thread", err)
            })?;
        handles.push(handle);
    }
    Ok(handles)
}

async fn worker_loop<H>(
    worker_id: usize,
    app: Arc<DefaultApp<H>>,
    listeners: Vec<std::net::TcpListener>,
    worker_connections: usize,
    settings: ConnectionSettings,
) where
    H: RequestFilter + 'static,
{
    let connection_limit = Arc::new(Semaphore::new(worker_connections));

    let mut tasks = Vec::with_capacity(listeners.len());
    for listener in listeners {
        let listener = match TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(err) => {
                error!("Worker {worker_id} failed registering listening socket: {err}");
                continue;
            }
        };
        tasks.push(tokio::spawn(accept_loop(
            worker_id,
            Arc::clone(&app),
            listener,
            Arc::clone(&connection_limit),
            settings,
        )));
    }

    for task in tasks {
        if let Err(err) = task.await {
            error!("Worker {worker_id} accept loop failed: {err}");
        }
    }
}

async fn accept_loop<H>(
    worker_id: usize,
    app: Arc<DefaultApp<H>>,
    listener: TcpListener,
    connection_limit: Arc<Semaphore>,
    settings: ConnectionSettings,
) where
    H: RequestFilter + 'static,
{
    loop {
        // Connections beyond the limit stay in the kernel's accept queue
        let Ok(permit) = Arc::clone(&connection_limit).acquire_owned().await else {
            return;
        };

        match listener.accept().await {
            Ok((stream, addr)) => {
                trace!(
                    "Worker {worker_id} accepted connection from {addr}, {} slots left",
                    connection_limit.available_permits()
                );
                if let Err(err) = stream.set_nodelay(true) {
                    debug!("failed setting TCP_NODELAY: {err}");
                }

                let app = Arc::clone(&app);
                tokio::spawn(async move {
                    let ctx = handle_connection(stream, Some(addr), &app, &settings).await;
                    trace!(
                        "Connection from {addr} closed after {} requests",
                        ctx.requests_served
                    );
                    drop(permit);
                });
            }
            Err(err) => {
                warn!("Worker {worker_id} failed accepting connection: {err}");
                drop(permit);
                tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
            }
        }
    }
}

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

//! Handles writing logs on a separate thread

use log::{debug, error};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fs::File;
use std::io::{stdout, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;

use crate::record::AccessRecord;
use crate::template::LogTemplate;

/// Number of log records that can be queued before request processing has to wait for the writer
const QUEUE_SIZE: usize = 1024;

#[derive(Debug)]
pub(crate) struct LogData {
    pub(crate) log_file: PathBuf,
    pub(crate) template: Arc<LogTemplate>,
    pub(crate) record: AccessRecord,
}

#[derive(Debug)]
pub(crate) enum WriterMessage {
    Reopen,
    LogData(Box<LogData>),
    Flush(oneshot::Sender<()>),
}

fn open_file(path: &PathBuf) -> Box<dyn Write + Send> {
    if path.as_os_str() != "-" {
        match File::options().append(true).create(true).open(path) {
            Ok(file) => return Box::new(file),
            Err(err) => {
                error!(
                    "Failed opening log file {} (cause: {err}), falling back to stdout",
                    path.as_os_str().to_string_lossy()
                );
            }
        }
    }
    Box::new(stdout())
}

async fn log_writer(mut receiver: Receiver<WriterMessage>) {
    let mut files: HashMap<PathBuf, Box<dyn Write + Send>> = HashMap::new();

    let mut buf = Vec::<u8>::with_capacity(4096);

    while let Some(message) = receiver.recv().await {
        match message {
            WriterMessage::Reopen => {
                debug!("Reopening {} log files", files.len());
                files = HashMap::new();
            }
            WriterMessage::LogData(data) => {
                data.template.format(&mut buf, &data.record);
                let writer = files.entry(data.log_file).or_insert_with_key(open_file);
                if let Err(err) = writer.write_all(&buf) {
                    error!("Failed writing to log file: {err}");
                }
            }
            WriterMessage::Flush(done) => {
                for writer in files.values_mut() {
                    let _ = writer.flush();
                }
                let _ = done.send(());
            }
        }
    }
}

/// Starts the writer thread. The thread gets its own runtime, so that it doesn't depend on the
/// runtime of the worker that happened to produce the first log record.
fn start_writer() -> Sender<WriterMessage> {
    let (sender, receiver) = channel(QUEUE_SIZE);

    #[cfg(unix)]
    let signal_sender = sender.clone();

    let result = std::thread::Builder::new()
        .name("access-log".to_owned())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!("Failed creating runtime for the log writer: {err}");
                    return;
                }
            };

            runtime.block_on(async move {
                #[cfg(unix)]
                crate::signal::listen(&signal_sender);

                log_writer(receiver).await
            });
        });
    if let Err(err) = result {
        error!("Failed starting log writer thread: {err}");
    }

    sender
}

static LOG_SENDER: Lazy<Sender<WriterMessage>> = Lazy::new(start_writer);

/// Queues a message for the writer thread, waiting if the queue is full.
pub(crate) async fn send(message: WriterMessage) {
    if let Err(err) = LOG_SENDER.send(message).await {
        error!("Failed logging request, thread crashed? {err}");
    }
}

/// Waits until all previously queued records have been written.
pub(crate) async fn flush() {
    let (sender, receiver) = oneshot::channel();
    send(WriterMessage::Flush(sender)).await;
    let _ = receiver.await;
}

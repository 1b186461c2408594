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

//! Data structures required for startup configuration

use clap::Parser;
use lantern_module_utils::OneOrMany;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Address the server listens on if none is configured
pub const DEFAULT_LISTEN: &str = "0.0.0.0:3333";

/// Run a web server
#[derive(Debug, Default, Parser)]
pub struct StartupOpt {
    /// Address and port to listen on, e.g. "127.0.0.1:8080". This command line flag can be
    /// specified multiple times.
    #[clap(short, long)]
    pub listen: Option<Vec<String>>,
    /// Test the configuration and exit. This is useful to validate the configuration before
    /// restarting the process.
    #[clap(short, long)]
    pub test: bool,
    /// The path to the configuration file. This command line flag can be specified multiple times.
    #[clap(short, long)]
    pub conf: Option<Vec<PathBuf>>,
    /// Number of worker threads
    #[clap(short, long)]
    pub workers: Option<usize>,
}

/// Configuration settings of the startup module
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StartupConf {
    /// List of address/port combinations to listen on, e.g. "127.0.0.1:8080".
    pub listen: OneOrMany<String>,
    /// Number of worker threads, defaults to the available parallelism.
    pub workers: Option<usize>,
    /// Maximal number of simultaneous connections per worker
    pub worker_connections: usize,
    /// Seconds an idle connection is kept open waiting for the next request
    pub keepalive_timeout: u64,
    /// Maximal number of requests served on a single connection
    pub keepalive_requests: usize,
    /// Seconds a client has to send the complete request header
    pub client_header_timeout: u64,
    /// File to write the process ID into
    pub pid_file: Option<PathBuf>,
}

impl Default for StartupConf {
    fn default() -> Self {
        Self {
            listen: Default::default(),
            workers: None,
            worker_connections: 1024,
            keepalive_timeout: 65,
            keepalive_requests: 1000,
            client_header_timeout: 60,
            pid_file: None,
        }
    }
}

impl StartupConf {
    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: &StartupOpt) {
        if let Some(listen) = &opt.listen {
            self.listen = listen.clone().into();
        }

        if opt.workers.is_some() {
            self.workers = opt.workers;
        }
    }

    /// Addresses to listen on, falling back to [`DEFAULT_LISTEN`]
    pub fn listen_addrs(&self) -> Vec<String> {
        if self.listen.is_empty() {
            vec![DEFAULT_LISTEN.to_owned()]
        } else {
            self.listen.to_vec()
        }
    }

    /// Number of worker threads to start
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|workers| *workers > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    /// Per-connection settings derived from this configuration
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            keepalive_timeout: Duration::from_secs(self.keepalive_timeout),
            keepalive_requests: self.keepalive_requests.max(1),
            client_header_timeout: Duration::from_secs(self.client_header_timeout),
        }
    }
}

/// Limits applied to every client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Time an idle connection waits for the next request
    pub keepalive_timeout: Duration,
    /// Maximal number of requests on one connection
    pub keepalive_requests: usize,
    /// Time a client has to send the complete request header
    pub client_header_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        StartupConf::default().connection_settings()
    }
}

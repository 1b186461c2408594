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

#![doc = include_str!("../README.md")]

use clap::Parser;
use common_log_module::{CommonLogHandler, CommonLogOpt};
use compression_module::{CompressionHandler, CompressionOpt};
use lantern_module_utils::{chain_handlers, merge_conf, Error, FromYaml, RequestFilter};
use locations_module::LocationsHandler;
use log::{error, info};
use startup_module::{DefaultApp, Server, StartupConf, StartupOpt};
use static_files_module::{StaticFilesHandler, StaticFilesOpt};
use std::process::ExitCode;

chain_handlers! {
    struct Handler {
        log: CommonLogHandler,
        locations: LocationsHandler,
        compression: CompressionHandler,
        static_files: StaticFilesHandler,
    }
}

/// Run Lantern Web Server
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Opt {
    #[clap(flatten)]
    startup: StartupOpt,
    #[clap(flatten)]
    static_files: StaticFilesOpt,
    #[clap(flatten)]
    log: CommonLogOpt,
    #[clap(flatten)]
    compression: CompressionOpt,
}

merge_conf! {
    /// The configuration of Lantern Web Server
    struct Conf {
        startup: StartupConf,
        handler: <Handler as RequestFilter>::Conf,
    }
}

fn build_server(opt: Opt) -> Result<Server<Handler>, Box<Error>> {
    let mut conf = Conf::load_from_files(opt.startup.conf.as_deref().unwrap_or(&[]))?;

    conf.handler.static_files.merge_with_opt(opt.static_files);
    conf.handler.log.merge_with_opt(opt.log);
    conf.handler.compression.merge_with_opt(opt.compression);

    let app = DefaultApp::<Handler>::from_conf(conf.handler)?;
    info!("Configuration loaded");
    Ok(conf.startup.into_server(app, Some(opt.startup)))
}

fn main() -> ExitCode {
    env_logger::init();

    let opt = Opt::parse();
    let result = build_server(opt).and_then(|server| server.run_forever());
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

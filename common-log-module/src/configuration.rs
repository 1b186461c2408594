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

//! Structures handling command line options and YAML deserialization for the Common Log Module

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

use crate::template::LogTemplate;

/// Command line options of the common log module
#[derive(Debug, Default, Parser)]
pub struct CommonLogOpt {
    /// Access log file path
    ///
    /// Special values are an empty string (disable logging) and - (write to standard output).
    #[clap(long, value_parser = clap::builder::TypedValueParser::map(clap::builder::OsStringValueParser::new(), PathBuf::from))]
    pub log_file: Option<PathBuf>,
}

/// Configuration settings of the common log module
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommonLogConf {
    /// Access log file path
    ///
    /// Special values are an empty string (disable logging) and - (write to standard output).
    pub log_file: PathBuf,
    /// Log line template, e.g. `$remote_addr [$time_local] "$request" $status`
    ///
    /// See [`LogVariable`](crate::template::LogVariable) for a list of supported variables. If
    /// missing, [`DEFAULT_LOG_FORMAT`](crate::template::DEFAULT_LOG_FORMAT) is used.
    pub log_format: Option<LogTemplate>,
}

impl Default for CommonLogConf {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("-"),
            log_format: None,
        }
    }
}

impl CommonLogConf {
    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: CommonLogOpt) {
        if let Some(log_file) = opt.log_file {
            self.log_file = log_file;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lantern_module_utils::FromYaml;

    #[test]
    fn deserialization() {
        let conf = CommonLogConf::from_yaml("{}").unwrap();
        assert_eq!(conf, CommonLogConf::default());

        let conf = CommonLogConf::from_yaml(
            "log_file: access.log\nlog_format: '$remote_addr \"$request\" $status'",
        )
        .unwrap();
        assert_eq!(conf.log_file, PathBuf::from("access.log"));
        assert_eq!(
            conf.log_format,
            Some("$remote_addr \"$request\" $status".parse().unwrap())
        );

        assert!(CommonLogConf::from_yaml("log_format: '$nonsense'").is_err());
    }

    #[test]
    fn merging() {
        let mut conf = CommonLogConf::default();
        conf.merge_with_opt(CommonLogOpt { log_file: None });
        assert_eq!(conf.log_file, PathBuf::from("-"));

        conf.merge_with_opt(CommonLogOpt {
            log_file: Some("".into()),
        });
        assert_eq!(conf.log_file, PathBuf::from(""));
    }
}

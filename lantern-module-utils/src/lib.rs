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

//! # Module helpers
//!
//! This crate contains the types shared by Lantern Web Server and its modules: the request
//! session, the [`RequestFilter`] trait implemented by all handlers, configuration helpers and
//! standard responses.

pub mod compression_algorithm;
pub mod deserialize;
pub mod error;
pub mod extensions;
pub mod session;
pub mod standard_response;

pub use async_trait::async_trait;
pub use compression_algorithm::CompressionAlgorithm;
pub use deserialize::OneOrMany;
pub use error::{Error, ErrorType};
pub use session::{BodyFilter, RequestHeader, ResponseHeader, ResponseHeaderFilter, Session};

use log::trace;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fmt::Debug;
use std::path::Path;

/// Request filter result indicating how the current request should be processed further
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub enum RequestFilterResult {
    /// Response has been sent, no further processing should happen.
    ResponseSent,

    /// Request has been handled and further request filters should not run. Response hasn’t been
    /// sent however.
    Handled,

    /// Request filter could not handle this request, next request filter should run if it exists.
    #[default]
    Unhandled,
}

/// Trait to be implemented by request filters.
#[async_trait]
pub trait RequestFilter: Sized + Send + Sync {
    /// Configuration type of this handler.
    type Conf;

    /// Per-request state of this handler
    type CTX: Send;

    /// Creates a new state object.
    fn new_ctx() -> Self::CTX;

    /// Handles the current request. Returns [`RequestFilterResult::Unhandled`] by default.
    async fn request_filter(
        &self,
        _session: &mut Session<'_>,
        _ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        Ok(RequestFilterResult::Unhandled)
    }

    /// Modifies the response header right before it is written. This is called for all
    /// responses, including those produced by other handlers and error responses.
    fn response_filter(&self, _session: &mut Session<'_>, _response: &mut ResponseHeader) {}

    /// Called exactly once per request after the response has been written or the request
    /// failed. `e` is the error that occurred while processing the request if any.
    async fn logging(&self, _session: &mut Session<'_>, _e: Option<&Error>, _ctx: &mut Self::CTX) {
    }
}

impl<T> ResponseHeaderFilter for T
where
    T: RequestFilter,
{
    fn filter_response_header(&self, session: &mut Session<'_>, response: &mut ResponseHeader) {
        self.response_filter(session, response);
    }
}

/// Trait for configuration structures that can be loaded from YAML files. This trait has a blanket
/// implementation for any structure implementing [`serde::Deserialize`].
pub trait FromYaml {
    /// Loads configuration from a YAML string. An empty string produces the default
    /// configuration.
    fn from_yaml(yaml: &str) -> Result<Self, Box<Error>>
    where
        Self: Sized;

    /// Loads configuration from a list of YAML files. Top-level settings of later files override
    /// the ones of earlier files.
    fn load_from_files<P>(files: &[P]) -> Result<Self, Box<Error>>
    where
        P: AsRef<Path>,
        Self: Sized;
}

fn parse_mapping(yaml: &str, origin: &str) -> Result<Mapping, Box<Error>> {
    let parse_error = |err: serde_yaml::Error| {
        Error::because(
            ErrorType::InvalidConfiguration,
            format!("failed parsing configuration {origin}"),
            err,
        )
    };

    // Input without any documents (empty or only comments) is an empty configuration.
    let mut documents = serde_yaml::Deserializer::from_str(yaml);
    let Some(document) = documents.next() else {
        return Ok(Mapping::new());
    };
    let value = Value::deserialize(document).map_err(parse_error)?;
    if documents.next().is_some() {
        return Err(Error::explain(
            ErrorType::InvalidConfiguration,
            format!("configuration {origin} contains multiple documents"),
        ));
    }

    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(mapping) => Ok(mapping),
        _ => Err(Error::explain(
            ErrorType::InvalidConfiguration,
            format!("configuration {origin} is not a map"),
        )),
    }
}

impl<D> FromYaml for D
where
    D: DeserializeOwned + Debug,
{
    fn from_yaml(yaml: &str) -> Result<Self, Box<Error>> {
        let mapping = parse_mapping(yaml, "string")?;
        serde_yaml::from_value(Value::Mapping(mapping)).map_err(|err| {
            Error::because(
                ErrorType::InvalidConfiguration,
                "failed processing configuration",
                err,
            )
        })
    }

    fn load_from_files<P>(files: &[P]) -> Result<Self, Box<Error>>
    where
        P: AsRef<Path>,
    {
        let mut merged = Mapping::new();
        for path in files {
            let path = path.as_ref();
            let contents = std::fs::read_to_string(path).map_err(|err| {
                Error::because(
                    ErrorType::FileOpenError,
                    format!("failed opening configuration file {path:?}"),
                    err,
                )
            })?;

            for (key, value) in parse_mapping(&contents, &format!("file {path:?}"))? {
                merged.insert(key, value);
            }
        }

        let conf = serde_yaml::from_value(Value::Mapping(merged)).map_err(|err| {
            Error::because(
                ErrorType::InvalidConfiguration,
                "failed processing configuration files",
                err,
            )
        })?;
        trace!("Loaded configuration: {conf:#?}");

        Ok(conf)
    }
}

/// This macro merges multiple structures implementing [`serde::Deserialize`] and [`Default`] into
/// a structure containing all of them.
///
/// The structure of the expected configuration file is flattened, so that the configuration
/// settings from each component are still expected to be found on the top level.
///
/// ```rust
/// use lantern_module_utils::{merge_conf, FromYaml};
/// use serde::Deserialize;
///
/// #[derive(Debug, Default, Deserialize)]
/// #[serde(default)]
/// struct ListenConf {
///     listen: String,
/// }
///
/// #[derive(Debug, Default, Deserialize)]
/// #[serde(default)]
/// struct RootConf {
///     root: String,
/// }
///
/// merge_conf! {
///     struct Conf {
///         listen: ListenConf,
///         root: RootConf,
///     }
/// }
///
/// let conf = Conf::from_yaml("listen: 127.0.0.1:8080\nroot: /var/www").unwrap();
/// assert_eq!(conf.listen.listen, "127.0.0.1:8080");
/// assert_eq!(conf.root.root, "/var/www");
/// ```
#[macro_export]
macro_rules! merge_conf {
    (
        $(#[$struct_attr:meta])*
        $struct_vis:vis struct $struct_name:ident {
            $(
                $(#[$field_attr:meta])*
                $field_vis:vis $field_name:ident: $field_type:ty,
            )*
        }
    ) => {
        $(#[$struct_attr])*
        #[derive(::std::fmt::Debug, ::std::default::Default, ::serde::Deserialize)]
        #[serde(default)]
        $struct_vis struct $struct_name {
            $(
                #[serde(flatten)]
                $(#[$field_attr])*
                $field_vis $field_name: $field_type,
            )*
        }
    }
}

/// This macro chains multiple handlers implementing [`RequestFilter`] and merges their respective
/// configurations.
///
/// The handlers' request filters will be called in the order in which they are listed. Each
/// handler can prevent the subsequent handlers from being called by returning
/// [`RequestFilterResult::ResponseSent`] or [`RequestFilterResult::Handled`]. Response filters
/// and logging run for all handlers.
///
/// The merged configuration type is named `__Conf`, so the macro can only be used once per
/// module. It is best referred to as `<Handler as RequestFilter>::Conf`.
#[macro_export]
macro_rules! chain_handlers {
    (
        $(#[$struct_attr:meta])*
        $struct_vis:vis struct $struct_name:ident {
            $(
                $(#[$field_attr:meta])*
                $field_vis:vis $field_name:ident: $field_type:ty,
            )*
        }
    ) => {
        $(#[$struct_attr])*
        #[derive(::std::fmt::Debug)]
        $struct_vis struct $struct_name {
            $(
                $(#[$field_attr])*
                $field_vis $field_name: $field_type,
            )*
        }

        $crate::merge_conf! {
            /// Merged handler configuration
            $struct_vis struct __Conf {
                $(
                    $field_vis $field_name: <$field_type as $crate::RequestFilter>::Conf,
                )*
            }
        }

        /// Merged handler context
        #[allow(missing_debug_implementations)]
        $struct_vis struct __CTX {
            $(
                $field_vis $field_name: <$field_type as $crate::RequestFilter>::CTX,
            )*
        }

        impl ::std::convert::TryFrom<__Conf> for $struct_name {
            type Error = ::std::boxed::Box<$crate::Error>;

            fn try_from(conf: __Conf) -> ::std::result::Result<Self, Self::Error> {
                $(
                    let $field_name = <$field_type>::try_from(conf.$field_name)?;
                )*
                ::std::result::Result::Ok(Self {
                    $(
                        $field_name,
                    )*
                })
            }
        }

        #[$crate::async_trait]
        impl $crate::RequestFilter for $struct_name {
            type Conf = __Conf;
            type CTX = __CTX;

            fn new_ctx() -> Self::CTX {
                __CTX {
                    $(
                        $field_name: <$field_type as $crate::RequestFilter>::new_ctx(),
                    )*
                }
            }

            async fn request_filter(
                &self,
                session: &mut $crate::Session<'_>,
                ctx: &mut Self::CTX,
            ) -> ::std::result::Result<$crate::RequestFilterResult, ::std::boxed::Box<$crate::Error>> {
                $(
                    let result = $crate::RequestFilter::request_filter(
                        &self.$field_name,
                        session,
                        &mut ctx.$field_name,
                    )
                    .await?;
                    if result != $crate::RequestFilterResult::Unhandled {
                        return ::std::result::Result::Ok(result);
                    }
                )*
                ::std::result::Result::Ok($crate::RequestFilterResult::Unhandled)
            }

            fn response_filter(
                &self,
                session: &mut $crate::Session<'_>,
                response: &mut $crate::ResponseHeader,
            ) {
                $(
                    $crate::RequestFilter::response_filter(&self.$field_name, session, response);
                )*
            }

            async fn logging(
                &self,
                session: &mut $crate::Session<'_>,
                e: ::std::option::Option<&$crate::Error>,
                ctx: &mut Self::CTX,
            ) {
                $(
                    $crate::RequestFilter::logging(
                        &self.$field_name,
                        session,
                        e,
                        &mut ctx.$field_name,
                    )
                    .await;
                )*
            }
        }
    }
}

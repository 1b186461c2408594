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

//! Error type shared by all modules

use http::StatusCode;
use std::borrow::Cow;
use std::fmt::Display;

/// Classifies an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorType {
    /// A file could not be opened
    #[error("failed opening file")]
    FileOpenError,
    /// A file could not be read
    #[error("failed reading file")]
    FileReadError,
    /// Configuration is invalid
    #[error("invalid configuration")]
    InvalidConfiguration,
    /// Listening socket could not be set up
    #[error("failed binding socket")]
    BindError,
    /// Reading from a connection failed
    #[error("failed reading from connection")]
    ReadError,
    /// Writing to a connection failed
    #[error("failed writing to connection")]
    WriteError,
    /// Request could not be parsed
    #[error("invalid request")]
    InvalidRequest,
    /// Unexpected condition
    #[error("internal error")]
    InternalError,
    /// Request should be answered with the given HTTP status code
    #[error("HTTP status {0}")]
    HTTPStatus(u16),
}

impl ErrorType {
    /// Status code of the response to be produced for this error type if no response has been
    /// sent yet.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::HTTPStatus(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error produced by request processing or server setup
#[derive(Debug)]
pub struct Error {
    /// Type of the error
    pub etype: ErrorType,
    /// Additional explanation if any
    pub context: Option<Cow<'static, str>>,
    /// The error causing this one if any
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates an error of the given type.
    pub fn new(etype: ErrorType) -> Box<Self> {
        Box::new(Self {
            etype,
            context: None,
            cause: None,
        })
    }

    /// Creates an error of the given type with an explanation.
    pub fn explain(etype: ErrorType, context: impl Into<Cow<'static, str>>) -> Box<Self> {
        Box::new(Self {
            etype,
            context: Some(context.into()),
            cause: None,
        })
    }

    /// Creates an error of the given type caused by another error.
    pub fn because(
        etype: ErrorType,
        context: impl Into<Cow<'static, str>>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Box<Self> {
        Box::new(Self {
            etype,
            context: Some(context.into()),
            cause: Some(cause.into()),
        })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.etype)?;
        if let Some(context) = &self.context {
            write!(f, " context: {context}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " cause: {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

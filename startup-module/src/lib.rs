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

//! # Startup module
//!
//! This crate runs the server: it binds the listening sockets, starts worker threads, reads
//! requests from client connections and passes them through the handler chain of a
//! [`DefaultApp`].

mod configuration;
pub mod connection;
mod worker;

pub use configuration::{ConnectionSettings, StartupConf, StartupOpt, DEFAULT_LISTEN};

use http::{Extensions, StatusCode};
use lantern_module_utils::standard_response::error_response;
use lantern_module_utils::{
    Error, ErrorType, RequestFilter, RequestFilterResult, RequestHeader, ResponseHeader, Session,
};
use log::{debug, error, info, warn};
use std::borrow::Cow;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// Result of a test execution of the app
#[derive(Debug)]
pub struct AppResult {
    header: Option<ResponseHeader>,
    err: Option<Box<Error>>,
    extensions: Extensions,
    body: Vec<u8>,
    keepalive: bool,
}

impl AppResult {
    /// Response status if a response has been sent
    pub fn status(&self) -> Option<StatusCode> {
        self.header.as_ref().map(|header| header.status)
    }

    /// Response header as sent to the client
    pub fn header(&self) -> Option<&ResponseHeader> {
        self.header.as_ref()
    }

    /// Retrieves the error if any
    pub fn err(&self) -> &Option<Box<Error>> {
        &self.err
    }

    /// Data attached to the request by the handlers
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Retrieves the response body as sent to the client
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Retrieves the response body as string
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Whether the connection would have been kept open after this request
    pub fn keepalive(&self) -> bool {
        self.keepalive
    }
}

/// The app running requests through a [`RequestFilter`] handler, to be passed to
/// [`StartupConf::into_server`]
#[derive(Debug)]
pub struct DefaultApp<H> {
    handler: H,
}

impl<H> DefaultApp<H>
where
    H: RequestFilter,
{
    /// Creates a new app from a [`RequestFilter`] instance.
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Creates a new app from a [`RequestFilter`] configuration.
    ///
    /// Any errors occurring when converting configuration to handler will be passed on.
    pub fn from_conf<C>(conf: C) -> Result<Self, Box<Error>>
    where
        H: RequestFilter<Conf = C> + TryFrom<C, Error = Box<Error>>,
    {
        Ok(Self::new(conf.try_into()?))
    }

    /// Provides read-only access to the handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Creates a session for a request, the handler's response filter is applied to its response
    /// header.
    pub fn new_session<'a>(
        &'a self,
        header: RequestHeader,
        client_addr: Option<SocketAddr>,
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> Session<'a> {
        Session::new(header, client_addr, writer).with_response_filter(&self.handler)
    }

    /// Runs the request filters of the handler. Requests that weren't handled receive a 404 Not
    /// Found response, errors occurring before a response has been sent are turned into an error
    /// response. Returns the error if any.
    pub async fn process(
        &self,
        session: &mut Session<'_>,
        ctx: &mut H::CTX,
    ) -> Option<Box<Error>> {
        let result = match self.handler.request_filter(session, ctx).await {
            Ok(RequestFilterResult::ResponseSent) => Ok(()),
            Ok(_) if session.response_written().is_some() => Ok(()),
            Ok(_) => Err(Error::new(ErrorType::HTTPStatus(404))),
            Err(err) => Err(err),
        };

        let err = match result {
            Ok(()) => None,
            Err(err) => {
                if session.response_written().is_none() {
                    let status = err.etype.status();
                    if status.is_server_error() {
                        warn!("request failed with {status}: {err}");
                    } else {
                        debug!("request produced status {status}: {err}");
                    }

                    if let Err(err) = error_response(session, status).await {
                        debug!("failed sending error response: {err}");
                        session.set_keepalive(false);
                    }
                } else {
                    warn!("request failed after response header has been sent: {err}");
                    session.set_keepalive(false);
                }
                Some(err)
            }
        };

        if session.response_written().is_some() && !session.is_finished() {
            if let Err(err) = session.write_response_body(None, true).await {
                debug!("failed finishing response: {err}");
                session.set_keepalive(false);
            }
        }

        err
    }

    /// Runs the logging phase of the handler, this should happen exactly once per request.
    pub async fn logging(&self, session: &mut Session<'_>, e: Option<&Error>, ctx: &mut H::CTX) {
        self.handler.logging(session, e, ctx).await
    }

    /// Responds to a request that could not be parsed with 400 Bad Request. The request is still
    /// logged, with the raw request line.
    pub async fn handle_malformed(
        &self,
        raw_request_line: String,
        client_addr: Option<SocketAddr>,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Option<Box<Error>> {
        let header = match RequestHeader::build("GET", b"/", None) {
            Ok(header) => header,
            Err(err) => return Some(err),
        };

        let mut session = self
            .new_session(header, client_addr, writer)
            .with_request_line(raw_request_line);
        session.set_keepalive(false);

        let mut ctx = H::new_ctx();
        let err = Error::new(ErrorType::InvalidRequest);
        if let Err(err) = error_response(&mut session, StatusCode::BAD_REQUEST).await {
            debug!("failed sending Bad Request response: {err}");
        }
        self.logging(&mut session, Some(&err), &mut ctx).await;
        Some(err)
    }

    /// Runs all request processing phases for a request without a network connection.
    ///
    /// This method is meant for testing.
    pub async fn handle_request(&self, header: RequestHeader) -> AppResult {
        self.handle_request_from(header, None).await
    }

    /// Like [`DefaultApp::handle_request`] but for a request originating from the given client
    /// address.
    pub async fn handle_request_from(
        &self,
        header: RequestHeader,
        client_addr: Option<SocketAddr>,
    ) -> AppResult {
        let mut output = Vec::new();
        let mut session = self.new_session(header, client_addr, &mut output);
        session.capture_body();

        let mut ctx = H::new_ctx();
        let err = self.process(&mut session, &mut ctx).await;
        self.logging(&mut session, err.as_deref(), &mut ctx).await;

        let keepalive = session.keepalive();
        let header = session.response_written().cloned();
        let body = session.captured_body().unwrap_or_default().to_vec();
        let extensions = std::mem::take(session.extensions_mut());

        AppResult {
            header,
            err,
            extensions,
            body,
            keepalive,
        }
    }
}

impl StartupConf {
    /// Sets up a server with the given configuration and command line options
    pub fn into_server<H>(mut self, app: DefaultApp<H>, opt: Option<StartupOpt>) -> Server<H>
    where
        H: RequestFilter + 'static,
    {
        let opt = opt.unwrap_or_default();
        self.merge_with_opt(&opt);

        Server {
            app: Arc::new(app),
            listen: self.listen_addrs(),
            workers: self.worker_count(),
            worker_connections: self.worker_connections.max(1),
            settings: self.connection_settings(),
            pid_file: self.pid_file,
            test: opt.test,
        }
    }
}

/// A server ready to accept connections
#[derive(Debug)]
pub struct Server<H> {
    app: Arc<DefaultApp<H>>,
    listen: Vec<String>,
    workers: usize,
    worker_connections: usize,
    settings: ConnectionSettings,
    pid_file: Option<PathBuf>,
    test: bool,
}

impl<H> Server<H>
where
    H: RequestFilter + 'static,
{
    fn bind(&self) -> Result<Vec<TcpListener>, Box<Error>> {
        self.listen
            .iter()
            .map(|addr| {
                let listener = TcpListener::bind(addr).map_err(|err| {
                    Error::because(ErrorType::BindError, format!("failed binding {addr}"), err)
                })?;
                listener.set_nonblocking(true).map_err(|err| {
                    Error::because(
                        ErrorType::BindError,
                        format!("failed configuring socket {addr}"),
                        err,
                    )
                })?;
                info!("Listening on {addr}");
                Ok(listener)
            })
            .collect()
    }

    fn write_pid_file(&self) -> Result<(), Box<Error>> {
        if let Some(pid_file) = &self.pid_file {
            std::fs::write(pid_file, format!("{}\n", std::process::id())).map_err(|err| {
                Error::because(
                    ErrorType::FileOpenError,
                    format!("failed writing PID file {pid_file:?}"),
                    err,
                )
            })?;
        }
        Ok(())
    }

    /// Binds the listening sockets and runs worker threads until these exit. If the server was
    /// started with `--test` flag, this will return immediately.
    pub fn run_forever(self) -> Result<(), Box<Error>> {
        if self.test {
            info!("Configuration test successful");
            return Ok(());
        }

        let listeners = self.bind()?;
        self.write_pid_file()?;

        let handles = worker::spawn_workers(
            &self.app,
            &listeners,
            self.workers,
            self.worker_connections,
            self.settings,
        )?;
        info!("Started {} worker threads", handles.len());

        for handle in handles {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        Ok(())
    }
}

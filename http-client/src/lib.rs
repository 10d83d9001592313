//! Private blocking HTTP client for the IoT hub device SDK
//!
//! This crate is the single point where requests actually leave the
//! process: a client is bound to one hub hostname and issues exactly one
//! request/response per call, with no pooling or retry of its own. The
//! transport layer above decides what to send, when, and what a failure
//! means. SAS credential construction lives here too ([`sas`]), next to
//! the client that consumes the tokens.

mod error;
mod headers;
pub mod sas;

pub use error::{HttpError, SasError};
pub use headers::HeaderMap;

use std::io::Read;
use std::time::Duration;

use tracing::debug;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP request method subset used by the hub protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// A completed HTTP exchange
///
/// Non-2xx statuses are still a *response*, not an error: the transport
/// layer inspects the status code itself. Only failures that never produced
/// a response surface as [`HttpError::Transport`].
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Typed value for pass-through options
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Interval(Duration),
    Text(String),
}

/// A blocking HTTP session bound to one hostname
#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    base_url: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpClient {
    /// Create a session for `hostname`
    ///
    /// A bare hostname is reached over HTTPS; a hostname carrying an
    /// explicit scheme (`http://gateway.local:8080`) is used verbatim,
    /// which is how local gateways and test fixtures are addressed.
    pub fn new(hostname: &str) -> Self {
        let base_url = if hostname.contains("://") {
            hostname.trim_end_matches('/').to_owned()
        } else {
            format!("https://{}", hostname)
        };
        Self {
            agent: build_agent(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT),
            base_url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Issue one request against a path relative to the bound hostname
    pub fn execute(
        &self,
        method: Method,
        relative_path: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, HttpError> {
        let url = format!("{}{}", self.base_url, relative_path);
        debug!(method = method.as_str(), %url, "executing request");

        let mut request = self.agent.request(method.as_str(), &url);
        for (name, value) in headers.iter() {
            request = request.set(name, value);
        }

        let outcome = match body {
            Some(bytes) => request.send_bytes(bytes),
            None => request.call(),
        };
        let response = match outcome {
            Ok(response) => response,
            // the service answered; a 4xx/5xx status is the caller's to judge
            Err(ureq::Error::Status(_, response)) => response,
            Err(e) => return Err(HttpError::Transport(e.to_string())),
        };

        let status = response.status();
        let mut response_headers = HeaderMap::new();
        for name in response.headers_names() {
            if let Some(value) = response.header(&name) {
                response_headers.append(name.as_str(), value);
            }
        }

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers: response_headers,
            body,
        })
    }

    /// Set a client-level option
    ///
    /// Recognized: `"timeout"` (read timeout) and `"connect_timeout"`,
    /// both taking [`OptionValue::Interval`]. Anything else is refused with
    /// [`HttpError::UnsupportedOption`].
    pub fn set_option(&mut self, name: &str, value: &OptionValue) -> Result<(), HttpError> {
        match name {
            "timeout" => {
                let OptionValue::Interval(interval) = value else {
                    return Err(HttpError::InvalidArgument(format!(
                        "option `{}` takes an interval",
                        name
                    )));
                };
                self.read_timeout = *interval;
            }
            "connect_timeout" => {
                let OptionValue::Interval(interval) = value else {
                    return Err(HttpError::InvalidArgument(format!(
                        "option `{}` takes an interval",
                        name
                    )));
                };
                self.connect_timeout = *interval;
            }
            _ => return Err(HttpError::UnsupportedOption(name.to_owned())),
        }
        self.agent = build_agent(self.connect_timeout, self.read_timeout);
        Ok(())
    }

    /// The URL prefix requests are issued against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn build_agent(connect_timeout: Duration, read_timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(connect_timeout)
        .timeout_read(read_timeout)
        .build()
}

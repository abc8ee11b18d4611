//! JSON-RPC server over standard input and output
//!
//! Each request is one JSON object per line on stdin and each response one
//! JSON object per line on stdout. Logs go to stderr, so stdout only ever
//! carries responses.

mod handlers;
pub mod protocol;
mod routes;

use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::core::analyser::ProjectAnalyser;
use crate::core::config::Config;

use self::protocol::{RpcError, RpcRequest, RpcResponse};

/// Dispatches requests to a project analyser
pub struct RpcServer {
    analyser: ProjectAnalyser,
    stopped: bool,
}

impl RpcServer {
    pub fn new(analyser: ProjectAnalyser) -> Self {
        Self {
            analyser,
            stopped: false,
        }
    }

    pub fn analyser(&self) -> &ProjectAnalyser {
        &self.analyser
    }

    /// Answer one raw request line; blank lines get no response
    pub fn handle_line(&mut self, line: &str) -> Option<RpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                let preview: String = line.chars().take(100).collect();
                error!("Invalid JSON: {} ({})", e, preview);
                return Some(RpcResponse::error(Value::from(0), RpcError::parse_error(e)));
            }
        };

        let id = value.get("id").cloned().unwrap_or_else(|| Value::from(0));
        match serde_json::from_value::<RpcRequest>(value) {
            Ok(request) => Some(self.handle_request(request)),
            Err(e) => {
                warn!("Invalid request: {}", e);
                Some(RpcResponse::error(id, RpcError::invalid_request(e)))
            }
        }
    }

    pub fn handle_request(&mut self, request: RpcRequest) -> RpcResponse {
        let RpcRequest {
            id, method, params, ..
        } = request;
        debug!("Handling request {}: {}", id, method);

        let Some(handler) = routes::lookup(&method) else {
            warn!("Method not found: {}", method);
            return RpcResponse::error(id, RpcError::method_not_found(&method));
        };

        let analyser = &mut self.analyser;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(analyser, params)));

        if method == "shutdown" {
            self.stopped = true;
        }

        match outcome {
            Ok(Ok(result)) => RpcResponse::success(id, result),
            Ok(Err(e)) => {
                warn!("Request {} failed: {}", method, e.message);
                RpcResponse::error(id, e)
            }
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                error!("Request {} panicked: {}", method, detail);
                RpcResponse::error(id, RpcError::internal(detail))
            }
        }
    }

    /// Serve requests until the input ends or `shutdown` is called
    pub fn run<R: BufRead, W: Write>(&mut self, mut reader: R, mut writer: W) -> io::Result<()> {
        info!("Server starting, version {}", env!("CARGO_PKG_VERSION"));

        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }

            let response = match std::str::from_utf8(&buf) {
                Ok(line) => self.handle_line(line),
                Err(e) => {
                    error!("Request line is not valid UTF-8: {}", e);
                    Some(RpcResponse::error(Value::from(0), RpcError::parse_error(e)))
                }
            };
            if let Some(response) = response {
                serde_json::to_writer(&mut writer, &response)?;
                writer.write_all(b"\n")?;
                writer.flush()?;
            }
            if self.stopped {
                break;
            }
        }

        if !self.stopped {
            self.analyser.shutdown();
        }
        info!("Server shutting down");
        Ok(())
    }
}

/// Serve requests on stdin/stdout
pub fn serve_stdio(config: &Config) -> anyhow::Result<()> {
    let mut server = RpcServer::new(ProjectAnalyser::new(config));
    let stdin = io::stdin();
    let stdout = io::stdout();
    server.run(stdin.lock(), stdout.lock())?;
    Ok(())
}

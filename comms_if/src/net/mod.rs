//! # Network Module
//!
//! This module provides a blocking TCP client for the optimizer service. Each exchange opens a
//! fresh connection, writes one JSON request, half-closes the socket and reads the reply until
//! the service closes its side.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io::{Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use log::{debug, trace};
use serde::Deserialize;

use crate::optimizer::{OptimizerRequest, OptimizerResponse, PongResponse, RunRequest};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for connecting to the optimizer service.
#[derive(Debug, Clone, Deserialize)]
pub struct NetParams {
    /// Address of the service, for example `"127.0.0.1:8333"`.
    pub optimizer_endpoint: String,

    /// Maximum time to wait for a connection to be accepted.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum time to wait for a reply once a request has been written.
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
}

/// Client for the optimizer service.
pub struct OptimizerClient {
    addr: SocketAddr,

    connect_timeout: Duration,

    recv_timeout: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum OptimizerClientError {
    #[error("Could not resolve the endpoint {0}: {1:?}")]
    InvalidEndpoint(String, Option<std::io::Error>),

    #[error("Could not connect to the optimizer service: {0}")]
    ConnectError(std::io::Error),

    #[error("Could not send the request: {0}")]
    SendError(std::io::Error),

    #[error("Could not receive the response: {0}")]
    RecvError(std::io::Error),

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response: {0} (response was {1:?})")]
    DeserializationError(serde_json::Error, String),

    #[error("The service did not become available within {0:?}")]
    NotAvailable(Duration),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl OptimizerClient {
    /// Create a new client for the service described by `params`.
    ///
    /// No connection is made until the first request.
    pub fn new(params: &NetParams) -> Result<Self, OptimizerClientError> {
        let addr = params
            .optimizer_endpoint
            .to_socket_addrs()
            .map_err(|e| {
                OptimizerClientError::InvalidEndpoint(params.optimizer_endpoint.clone(), Some(e))
            })?
            .next()
            .ok_or_else(|| {
                OptimizerClientError::InvalidEndpoint(params.optimizer_endpoint.clone(), None)
            })?;

        Ok(Self {
            addr,
            connect_timeout: Duration::from_millis(params.connect_timeout_ms),
            recv_timeout: Duration::from_millis(params.recv_timeout_ms),
        })
    }

    /// Check whether the service answers a ping.
    pub fn ping(&self) -> Result<(), OptimizerClientError> {
        let reply = self.exchange(&OptimizerRequest::Ping(1))?;

        serde_json::from_str::<PongResponse>(&reply)
            .map(|_| ())
            .map_err(|e| OptimizerClientError::DeserializationError(e, reply))
    }

    /// Block until the service answers a ping or `timeout` elapses.
    pub fn wait_until_available(
        &self,
        timeout: Duration,
        retry_period: Duration,
    ) -> Result<(), OptimizerClientError> {
        let start = Instant::now();

        loop {
            match self.ping() {
                Ok(()) => return Ok(()),
                Err(e) => trace!("Optimizer service not yet available: {}", e),
            }

            if start.elapsed() >= timeout {
                return Err(OptimizerClientError::NotAvailable(timeout));
            }

            std::thread::sleep(retry_period);
        }
    }

    /// Run the solver on the service with the given parameter vector.
    pub fn run(&self, parameter: &[f64]) -> Result<OptimizerResponse, OptimizerClientError> {
        let request = OptimizerRequest::Run(RunRequest::new(parameter.to_vec()));
        let reply = self.exchange(&request)?;

        serde_json::from_str(&reply)
            .map_err(|e| OptimizerClientError::DeserializationError(e, reply))
    }

    /// Ask the service to terminate.
    ///
    /// The service does not answer a kill request, so only send errors are reported.
    pub fn kill(&self) -> Result<(), OptimizerClientError> {
        self.exchange(&OptimizerRequest::Kill(1)).map(|_| ())
    }

    /// Perform one request/response exchange on a fresh connection.
    fn exchange(&self, request: &OptimizerRequest) -> Result<String, OptimizerClientError> {
        let payload =
            serde_json::to_vec(request).map_err(OptimizerClientError::SerializationError)?;

        let mut stream = TcpStream::connect_timeout(&self.addr, self.connect_timeout)
            .map_err(OptimizerClientError::ConnectError)?;
        stream
            .set_read_timeout(Some(self.recv_timeout))
            .map_err(OptimizerClientError::ConnectError)?;

        stream
            .write_all(&payload)
            .map_err(OptimizerClientError::SendError)?;
        stream
            .shutdown(Shutdown::Write)
            .map_err(OptimizerClientError::SendError)?;

        let mut reply = String::new();
        stream
            .read_to_string(&mut reply)
            .map_err(OptimizerClientError::RecvError)?;

        debug!("Optimizer exchange: {} bytes out, {} bytes in", payload.len(), reply.len());

        Ok(reply)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_recv_timeout_ms() -> u64 {
    2000
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Serve a single connection, checking the request and answering with `reply`.
    fn serve_once(listener: TcpListener, expected: &'static str, reply: &'static str) {
        let (mut sock, _) = listener.accept().unwrap();
        let mut request = String::new();
        sock.read_to_string(&mut request).unwrap();
        assert_eq!(request, expected);
        sock.write_all(reply.as_bytes()).unwrap();
    }

    fn client_for(listener: &TcpListener) -> OptimizerClient {
        OptimizerClient::new(&NetParams {
            optimizer_endpoint: listener.local_addr().unwrap().to_string(),
            connect_timeout_ms: default_connect_timeout_ms(),
            recv_timeout_ms: default_recv_timeout_ms(),
        })
        .unwrap()
    }

    #[test]
    fn test_ping_and_run() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = client_for(&listener);

        let server = thread::spawn(move || {
            serve_once(listener.try_clone().unwrap(), r#"{"Ping":1}"#, r#"{"Pong":1}"#);
            serve_once(
                listener,
                r#"{"Run":{"parameter":[1.0]}}"#,
                r#"{"type":"Error","code":3003,"message":"wrong number of parameters"}"#,
            );
        });

        client.ping().unwrap();

        match client.run(&[1.0]).unwrap() {
            OptimizerResponse::Error(e) => assert_eq!(e.code, 3003),
            r => panic!("Expected an error response, got {:?}", r),
        }

        server.join().unwrap();
    }

    #[test]
    fn test_invalid_endpoint() {
        let res = OptimizerClient::new(&NetParams {
            optimizer_endpoint: "not an address".into(),
            connect_timeout_ms: 10,
            recv_timeout_ms: 10,
        });
        assert!(matches!(res, Err(OptimizerClientError::InvalidEndpoint(..))));
    }
}

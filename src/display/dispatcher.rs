// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP command dispatch to the display controller.
//!
//! The controller accepts `GET /?num=<side>[&color=<tag>]` and answers
//! `200 OK` when it rendered the digit.

use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::tracker::Side;

/// Failure of a single dispatch attempt.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid display address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("display at {address} did not answer within {timeout:?}")]
    Timeout { address: String, timeout: Duration },
    #[error("display at {address} unreachable: {source}")]
    Transport {
        address: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("display at {address} returned HTTP {status}")]
    Status { address: String, status: u16 },
}

/// One command for the display, built per side change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub target_address: String,
    pub side: Side,
    pub color: Option<String>,
}

impl DispatchRequest {
    pub fn new(target_address: impl Into<String>, side: Side, color: Option<&str>) -> Self {
        Self {
            target_address: target_address.into(),
            side,
            color: color.map(str::to_string),
        }
    }

    /// Build the controller URL. A bare `host[:port]` address is treated as
    /// plain HTTP.
    pub fn url(&self) -> Result<Url, DispatchError> {
        let base = if self.target_address.contains("://") {
            self.target_address.clone()
        } else {
            format!("http://{}/", self.target_address)
        };

        let mut url = Url::parse(&base).map_err(|e| DispatchError::InvalidAddress {
            address: self.target_address.clone(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(DispatchError::InvalidAddress {
                address: self.target_address.clone(),
                reason: "missing host".to_string(),
            });
        }

        url.set_path("/");
        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("num", &self.side.to_string());
            if let Some(color) = &self.color {
                query.append_pair("color", color);
            }
        }
        Ok(url)
    }
}

/// Sends side changes to the display. At most one attempt per call.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    client: Client,
    address: String,
    timeout: Duration,
}

impl CommandDispatcher {
    /// Create a dispatcher with a bounded per-request timeout.
    pub fn new(address: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            address: address.into(),
            timeout,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one command. Errors are logged with the target and side before
    /// being returned.
    pub async fn dispatch(&self, side: Side, color: Option<&str>) -> Result<(), DispatchError> {
        let request = DispatchRequest::new(self.address.as_str(), side, color);
        let result = self.send(&request).await;

        match &result {
            Ok(()) => info!("Display at {} now showing side {}", self.address, side),
            Err(e) => {
                error!("Failed to show side {} on display: {}", side, e);
                if !matches!(e, DispatchError::Status { .. }) {
                    error!("Make sure the display controller is running at {}", self.address);
                }
            }
        }

        result
    }

    async fn send(&self, request: &DispatchRequest) -> Result<(), DispatchError> {
        let url = request.url()?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout {
                    address: self.address.clone(),
                    timeout: self.timeout,
                }
            } else {
                DispatchError::Transport {
                    address: self.address.clone(),
                    source: e,
                }
            }
        })?;

        let status = response.status();
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(DispatchError::Status {
                address: self.address.clone(),
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn side(raw: u8) -> Side {
        Side::new(raw, 8).unwrap()
    }

    /// Answers every request with `status` and reports the request line.
    async fn fake_display(status: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let _ = tx.send(request.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK",
                    status
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (address, rx)
    }

    #[test]
    fn test_url_with_color() {
        let request = DispatchRequest::new("192.168.0.185", side(2), Some("green"));
        assert_eq!(
            request.url().unwrap().as_str(),
            "http://192.168.0.185/?num=2&color=green"
        );
    }

    #[test]
    fn test_url_without_color() {
        let request = DispatchRequest::new("display.local:8080", side(7), None);
        assert_eq!(request.url().unwrap().as_str(), "http://display.local:8080/?num=7");
    }

    #[test]
    fn test_url_keeps_explicit_scheme() {
        let request = DispatchRequest::new("http://10.0.0.2/ignored?x=1", side(4), Some("red"));
        assert_eq!(request.url().unwrap().as_str(), "http://10.0.0.2/?num=4&color=red");
    }

    #[test]
    fn test_url_rejects_garbage() {
        let request = DispatchRequest::new("http://", side(1), None);
        assert!(matches!(
            request.url(),
            Err(DispatchError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let (address, mut requests) = fake_display("200 OK").await;
        let dispatcher = CommandDispatcher::new(address, Duration::from_secs(2)).unwrap();

        dispatcher.dispatch(side(2), Some("green")).await.unwrap();

        assert_eq!(
            requests.recv().await.unwrap(),
            "GET /?num=2&color=green HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_dispatch_non_200_is_failure() {
        let (address, mut requests) = fake_display("500 Internal Server Error").await;
        let dispatcher = CommandDispatcher::new(address, Duration::from_secs(2)).unwrap();

        let err = dispatcher.dispatch(side(3), None).await.unwrap_err();

        assert!(matches!(err, DispatchError::Status { status: 500, .. }));
        assert_eq!(requests.recv().await.unwrap(), "GET /?num=3 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_dispatch_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let dispatcher = CommandDispatcher::new(address, Duration::from_millis(200)).unwrap();
        let started = std::time::Instant::now();
        let err = dispatcher.dispatch(side(1), None).await.unwrap_err();

        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_dispatch_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dispatcher = CommandDispatcher::new(address.clone(), Duration::from_secs(2)).unwrap();
        let err = dispatcher.dispatch(side(1), None).await.unwrap_err();

        assert!(matches!(err, DispatchError::Transport { .. }));
        assert!(err.to_string().contains(&address));
    }
}

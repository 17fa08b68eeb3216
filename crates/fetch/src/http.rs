use std::io::{ErrorKind, Read};
use std::time::Duration;

use reqwest::blocking::{Client, Response};

use crate::{FetchError, FetchRequest, TransferStream, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    pub request_timeout: Duration,
    pub max_idle_connections_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            max_idle_connections_per_host: 2,
            user_agent: concat!("globe/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// Blocking HTTP(S) transport shared by all fetch workers.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &HttpTransportConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.max_idle_connections_per_host)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|error| FetchError::ClientSetup {
                message: error.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: &FetchRequest) -> Result<Box<dyn TransferStream>, FetchError> {
        let url = request.url.as_str();
        let response = self
            .client
            .get(request.url.clone())
            .headers(request.headers.clone())
            .send()
            .map_err(|error| {
                if error.is_timeout() {
                    FetchError::Timeout {
                        url: url.to_owned(),
                    }
                } else {
                    FetchError::Transport {
                        url: url.to_owned(),
                        message: error.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }
        tracing::trace!(url, status = status.as_u16(), "http transfer opened");
        Ok(Box::new(HttpStream {
            url: url.to_owned(),
            response,
        }))
    }
}

struct HttpStream {
    url: String,
    response: Response,
}

impl TransferStream for HttpStream {
    fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize, FetchError> {
        loop {
            match self.response.read(buffer) {
                Ok(read) => return Ok(read),
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) if error.kind() == ErrorKind::TimedOut => {
                    return Err(FetchError::Timeout {
                        url: self.url.clone(),
                    });
                }
                Err(error) => {
                    return Err(FetchError::Transport {
                        url: self.url.clone(),
                        message: error.to_string(),
                    });
                }
            }
        }
    }
}

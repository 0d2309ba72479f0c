use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("At least one of listener or mutual_tls must be configured")]
    NoListener,

    #[error("Job polling interval cannot be 0")]
    InvalidPollingInterval,
}

/// Relay configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Plain-text listener. Leaving it out disables plain-text uploads.
    pub listener: Option<Listener>,
    /// Listener that requires clients to present a certificate
    pub mutual_tls: Option<MutualTls>,
    /// Listener for `/health` and `/ready`
    pub admin_listener: Option<Listener>,
    /// Credentials used when talking to the controller
    pub controller: ControllerTls,
    #[serde(default = "default_job_polling_interval_ms")]
    pub job_polling_interval_ms: u64,
    /// Delay between upload attempts that failed to connect
    #[serde(default = "default_upload_retry_delay_ms")]
    pub upload_retry_delay_ms: u64,
    /// Upper bound on how long shutdown waits for in-flight uploads
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_job_polling_interval_ms() -> u64 {
    1000
}

fn default_upload_retry_delay_ms() -> u64 {
    500
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.listener.is_none() && self.mutual_tls.is_none() {
            return Err(ValidationError::NoListener);
        }

        let listeners = [
            self.listener.as_ref(),
            self.mutual_tls.as_ref().map(|m| &m.listener),
            self.admin_listener.as_ref(),
        ];
        for listener in listeners.into_iter().flatten() {
            listener.validate()?;
        }

        if self.job_polling_interval_ms == 0 {
            return Err(ValidationError::InvalidPollingInterval);
        }

        Ok(())
    }

    pub fn job_polling_interval(&self) -> Duration {
        Duration::from_millis(self.job_polling_interval_ms)
    }

    pub fn upload_retry_delay(&self) -> Duration {
        Duration::from_millis(self.upload_retry_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Inbound listener that requires client certificates
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MutualTls {
    pub listener: Listener,
    /// CA that client certificates must chain to
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
}

/// Outbound TLS material for reaching the controller
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ControllerTls {
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

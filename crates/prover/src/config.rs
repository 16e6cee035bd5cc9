use std::time::Duration;

use claimtls_core::WriteMode;

use crate::relay::SessionDescriptor;

/// Configuration for the prover.
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct ProverConfig {
    /// Host of the target server.
    #[builder(setter(into))]
    host: String,
    /// Port of the target server.
    #[builder(default = "443")]
    port: u16,
    /// Country the witness should connect to the server from.
    #[builder(setter(into, strip_option), default)]
    geo_location: Option<String>,
    /// Preferred write mode.
    ///
    /// Key update is only used if the negotiated protocol version supports it.
    /// Defaults to zero-knowledge writes.
    #[builder(setter(strip_option), default)]
    write_mode: Option<WriteMode>,
    /// Whether to establish a preshared key with the server over a direct
    /// connection before the relayed session starts.
    #[builder(default = "false")]
    psk_out_of_band: bool,
    /// Deadline for the handshake, measured from session readiness.
    #[builder(default = "Duration::from_secs(30)")]
    handshake_timeout: Duration,
    /// Time to keep processing server records after the response completed.
    #[builder(default = "Duration::from_millis(100)")]
    response_grace: Duration,
}

impl ProverConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(host) = &self.host {
            if host.is_empty() {
                return Err("host must not be empty".to_string());
            }
        }

        if self.handshake_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err("handshake_timeout must be greater than zero".to_string());
        }

        Ok(())
    }
}

impl ProverConfig {
    /// Creates a new builder for `ProverConfig`.
    pub fn builder() -> ProverConfigBuilder {
        ProverConfigBuilder::default()
    }

    /// Returns the host of the target server.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port of the target server.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the geo location, if any.
    pub fn geo_location(&self) -> Option<&str> {
        self.geo_location.as_deref()
    }

    /// Returns the preferred write mode, if any.
    pub fn write_mode(&self) -> Option<WriteMode> {
        self.write_mode
    }

    /// Returns whether the preshared key is established out of band.
    pub fn psk_out_of_band(&self) -> bool {
        self.psk_out_of_band
    }

    /// Returns the handshake deadline.
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Returns the grace period after the response completed.
    pub fn response_grace(&self) -> Duration {
        self.response_grace
    }

    pub(crate) fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            host: self.host.clone(),
            port: self.port,
            geo_location: self.geo_location.clone(),
        }
    }
}

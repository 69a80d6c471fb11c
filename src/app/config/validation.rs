use super::{CollectorConfig, ConfigError, RelayConfig};

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate queue capacity
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        // Validate sinks
        if self.no_console && self.file.is_none() && self.forward.is_none() {
            return Err(ConfigError::InvalidConfig(
                "At least one sink must be enabled (console, --file or --forward)".to_string(),
            ));
        }

        // Validate file rotation
        if self.file.is_some() {
            if self.file_max_size == 0 {
                return Err(ConfigError::InvalidConfig(
                    "File max size must be greater than 0".to_string(),
                ));
            }
            if self.file_max_files == 0 {
                return Err(ConfigError::InvalidConfig(
                    "File retention must keep at least one file".to_string(),
                ));
            }
        }

        // Validate forward endpoint
        if let Some(endpoint) = &self.forward
            && endpoint.rsplit_once(':').is_none_or(|(host, port)| {
                host.is_empty() || port.parse::<u16>().is_err()
            })
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Forward endpoint '{endpoint}' must be in host:port form"
            )));
        }

        // Validate timeouts
        if self.forward.is_some()
            && (self.connect_timeout_ms == 0 || self.reconnect_backoff_ms == 0)
        {
            return Err(ConfigError::InvalidConfig(
                "Forward timeouts must be greater than 0".to_string(),
            ));
        }

        if self.max_pending == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "Max pending must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.mode.is_supported() {
            return Err(ConfigError::InvalidConfig(format!(
                "Server mode '{}' is not supported on this platform",
                self.mode
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.read_buffer_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Read buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_without_any_sink_is_rejected() {
        let config = RelayConfig {
            no_console: true,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_forward_endpoint_is_rejected() {
        for endpoint in ["localhost", ":9000", "localhost:http"] {
            let config = RelayConfig {
                forward: Some(endpoint.to_string()),
                ..RelayConfig::default()
            };
            assert!(config.validate().is_err(), "{endpoint} should be rejected");
        }

        let config = RelayConfig {
            forward: Some("collector.internal:9000".to_string()),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_collector_config_is_valid() {
        assert!(CollectorConfig::default().validate().is_ok());
    }
}

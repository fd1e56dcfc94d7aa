//! Process configuration read from the environment (`.env` is loaded by `main`).

use std::net::SocketAddr;

use thiserror::Error;

use dentaflow_core::ClinicId;

const DEV_JWT_SECRET: &str = "dev-secret";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_COUNTRY_CODE: &str = "+91";
const DEFAULT_REALTIME_CAPACITY: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is not valid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Shared HS256 secret used to verify bearer tokens.
    pub jwt_secret: String,
    pub bind_addr: SocketAddr,
    /// Clinic that receives public online bookings. Bookings are refused when unset.
    pub booking_clinic_id: Option<ClinicId>,
    /// Prefix applied to bare ten-digit phone numbers.
    pub booking_default_country_code: String,
    /// Capacity of the lossy realtime (SSE) broadcast channel.
    pub realtime_channel_capacity: usize,
}

impl ApiConfig {
    /// Defaults for everything except the token secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            booking_clinic_id: None,
            booking_default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
            realtime_channel_capacity: DEFAULT_REALTIME_CAPACITY,
        }
    }

    pub fn with_booking_clinic(mut self, clinic_id: ClinicId) -> Self {
        self.booking_clinic_id = Some(clinic_id);
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("JWT_SECRET").filter(|s| !s.is_empty()).unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        let booking_clinic_id = match lookup("BOOKING_CLINIC_ID").filter(|s| !s.trim().is_empty()) {
            Some(raw) => Some(raw.trim().parse::<ClinicId>().map_err(|e| ConfigError::Invalid {
                key: "BOOKING_CLINIC_ID",
                reason: e.to_string(),
            })?),
            None => None,
        };

        let booking_default_country_code = lookup("BOOKING_DEFAULT_COUNTRY_CODE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COUNTRY_CODE.to_string());

        let realtime_channel_capacity = match lookup("REALTIME_CHANNEL_CAPACITY") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "REALTIME_CHANNEL_CAPACITY",
                        reason: format!("expected a positive integer, got '{raw}'"),
                    });
                }
            },
            None => DEFAULT_REALTIME_CAPACITY,
        };

        Ok(Self {
            jwt_secret,
            bind_addr,
            booking_clinic_id,
            booking_default_country_code,
            realtime_channel_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let cfg = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.booking_clinic_id, None);
        assert_eq!(cfg.booking_default_country_code, "+91");
        assert_eq!(cfg.realtime_channel_capacity, 256);
    }

    #[test]
    fn explicit_values_are_parsed() {
        let clinic_id = ClinicId::new();
        let clinic = clinic_id.to_string();
        let cfg = ApiConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s3cret"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("BOOKING_CLINIC_ID", clinic.as_str()),
            ("BOOKING_DEFAULT_COUNTRY_CODE", "+1"),
            ("REALTIME_CHANNEL_CAPACITY", "32"),
        ]))
        .unwrap();

        assert_eq!(cfg.jwt_secret, "s3cret");
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.booking_clinic_id, Some(clinic_id));
        assert_eq!(cfg.booking_default_country_code, "+1");
        assert_eq!(cfg.realtime_channel_capacity, 32);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = ApiConfig::from_lookup(lookup(&[("BOOKING_CLINIC_ID", "clinic-7")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BOOKING_CLINIC_ID", .. }));

        let err = ApiConfig::from_lookup(lookup(&[("REALTIME_CHANNEL_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "REALTIME_CHANNEL_CAPACITY", .. }));
    }
}

//! Connection settings and lifecycle timeouts

use std::time::Duration;

use crate::error::{OneError, OneResult};

pub const ENDPOINT_ENV: &str = "OPENNEBULA_ENDPOINT";
pub const USERNAME_ENV: &str = "OPENNEBULA_USERNAME";
pub const PASSWORD_ENV: &str = "OPENNEBULA_PASSWORD";

/// How to reach the OpenNebula XML-RPC endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct OneConfig {
    /// e.g. `http://frontend:2633/RPC2`
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub request_timeout: Duration,
}

impl OneConfig {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Read `OPENNEBULA_ENDPOINT`, `OPENNEBULA_USERNAME` and `OPENNEBULA_PASSWORD`
    pub fn from_env() -> OneResult<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| OneError::validation(format!("{} must be set", name)))
        };
        Ok(Self::new(
            var(ENDPOINT_ENV)?,
            var(USERNAME_ENV)?,
            var(PASSWORD_ENV)?,
        ))
    }

    /// XML-RPC session string
    pub fn session(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

/// Convergence timing for create and delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub delete: Duration,
    /// Wait before the first state fetch
    pub delay: Duration,
    pub poll_interval: Duration,
    pub min_poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(180),
            delete: Duration::from_secs(180),
            delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
            min_poll_interval: Duration::from_secs(3),
        }
    }
}

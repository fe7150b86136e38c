//! Server and request configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//! Environment variables can be layered on top:
//!
//! | Variable               | Field             | Default           |
//! |------------------------|-------------------|-------------------|
//! | `HOST`                 | `host`            | `0.0.0.0`         |
//! | `PORT`                 | `port`            | `8080`            |
//! | `HTTP_REQUEST_TIMEOUT` | `request_timeout` | `5` (seconds)     |
//! | `HTTP_TIMEOUT_MESSAGE` | `timeout_message` | `Request Timeout` |
//!
//! A `request_timeout` of `0` disables the app-wide deadline.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;
use crate::timeout::Timeout;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Interface to bind, as an IP address.
    pub host: String,

    pub port: u16,

    /// Seconds a handler may run before the request is answered with `503`.
    pub request_timeout: f64,

    /// Body of the `503` response sent on timeout.
    pub timeout_message: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            request_timeout: 5.0,
            timeout_message: "Request Timeout".to_owned(),
        }
    }
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Self, Error> {
        Ok(toml::from_str(source)?)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlays values found through `lookup` (usually the environment).
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port.trim().parse()
                .map_err(|_| Error::InvalidEnv { key: "PORT", value: port })?;
        }
        if let Some(secs) = lookup("HTTP_REQUEST_TIMEOUT") {
            self.request_timeout = secs.trim().parse()
                .ok()
                .filter(|s: &f64| s.is_finite() && *s >= 0.0)
                .ok_or(Error::InvalidEnv { key: "HTTP_REQUEST_TIMEOUT", value: secs })?;
        }
        if let Some(message) = lookup("HTTP_TIMEOUT_MESSAGE") {
            self.timeout_message = message;
        }
        Ok(self)
    }

    pub fn addr(&self) -> Result<SocketAddr, Error> {
        let ip: IpAddr = self.host.trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("{}:{}", self.host, self.port)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// The app-wide timeout, disabled when `request_timeout` is zero or not a
    /// usable number of seconds.
    pub fn request_timeout(&self) -> Timeout {
        match Duration::try_from_secs_f64(self.request_timeout) {
            Ok(d) if !d.is_zero() => Timeout::new(d, self.timeout_message.clone()),
            _ => Timeout::default(),
        }
    }
}

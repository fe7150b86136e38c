//! Route methods as a typed enum.
//!
//! Routes can only be declared for the six methods below. Incoming requests
//! may carry any method; `HEAD` is served by `GET` routes and everything else
//! without a matching route gets `405 Method Not Allowed` or `404 Not Found`
//! from the multiplexer.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A method a route can be registered for.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Patch,
        Self::Delete,
        Self::Options,
    ];

    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get     => "GET",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Patch   => "PATCH",
            Self::Delete  => "DELETE",
            Self::Options => "OPTIONS",
        }
    }

    pub fn as_http(self) -> http::Method {
        match self {
            Self::Get     => http::Method::GET,
            Self::Post    => http::Method::POST,
            Self::Put     => http::Method::PUT,
            Self::Patch   => http::Method::PATCH,
            Self::Delete  => http::Method::DELETE,
            Self::Options => http::Method::OPTIONS,
        }
    }

    /// Maps a request method onto a route method, if it is one of the six.
    pub fn from_http(method: &http::Method) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_http() == *method)
    }
}

/// Parses a method name. Surrounding whitespace is ignored and case does not
/// matter, so `" get "` is `Method::Get`.
impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| Error::InvalidMethod(s.to_owned()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

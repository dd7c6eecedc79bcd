//! Request/response collaborator.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// Request verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(verb)
    }
}

/// Performs one call against the remote API and returns the decoded body.
#[async_trait]
pub trait Api: Send + Sync {
    async fn fetch(&self, method: Method, route: &str, body: Option<Value>) -> Result<Value>;
}

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::{
    convert::Infallible,
    fmt,
    net::{IpAddr, SocketAddr},
};

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Network origin of the caller. `None` when neither a proxy header nor the
/// socket address is available; such callers share one "unknown" origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientOrigin(pub Option<IpAddr>);

impl fmt::Display for ClientOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ip) => write!(f, "{}", ip),
            None => f.write_str("unknown"),
        }
    }
}

/// Resolve the origin: first `x-forwarded-for` hop, else the peer address
/// recorded by `into_make_service_with_connect_info`.
pub fn client_origin(headers: &HeaderMap, connect_info: Option<SocketAddr>) -> ClientOrigin {
    let forwarded = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok());

    ClientOrigin(forwarded.or_else(|| connect_info.map(|addr| addr.ip())))
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientOrigin
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(client_origin(&parts.headers, peer))
    }
}

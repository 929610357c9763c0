pub mod client_origin;
pub mod metrics;
pub mod request_id;

pub use client_origin::{ClientOrigin, client_origin};
pub use metrics::metrics_middleware;
pub use request_id::{REQUEST_ID_HEADER, request_id_middleware};

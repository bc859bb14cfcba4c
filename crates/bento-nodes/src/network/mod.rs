//! Network nodes

mod http_request;

pub use http_request::HttpRequestExecutor;

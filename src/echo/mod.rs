//! Echo response construction shared by every protocol handler.

pub mod response;

pub use response::{
    base_response, extract_ip, hostname, http_version_label, normalize_endpoint, EchoResponse,
};

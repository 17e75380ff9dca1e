//! Request/response model and the network seam.

mod network;
mod origin;
mod types;

pub use network::{HttpNetwork, Network};
pub use origin::OriginPolicy;
pub use types::{AbortController, Request, RequestMode, Response, ResponseKind};

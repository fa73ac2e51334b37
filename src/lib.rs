//! Terminal progress monitor for a media download service's event stream.

pub mod core;
pub mod transport;

//! Domain services
//!
//! Pure logic over payloads and URLs; no I/O.

pub mod path_discovery;
pub mod url_rewriter;

pub use path_discovery::{Discovery, PathDiscovery};
pub use url_rewriter::{Classified, RewriteError, Shape, UrlRewriter};

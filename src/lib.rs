//! Mirror remote images referenced by rich-text HTML.
//!
//! Every absolute `http(s)` `<img src>` in a document is downloaded with
//! bounded concurrency and retries, checked against size and type limits,
//! handed to an uploader, and the markup is rewritten to point at the
//! uploaded copy. References that fail for any reason are left untouched.

pub mod cdn;
pub mod config;
pub mod error;
pub mod fetch;
pub mod markup;
pub mod mime;
pub mod models;
pub mod replacer;
pub mod retry;
pub mod scheduler;
pub mod scratch;
pub mod source;

pub use config::ReplacerConfig;
pub use error::{Error, ErrorKind, ImageError, Result};
pub use models::{ReplaceReport, TaskFailure};
pub use replacer::{replace, ImageReplacer, ReplacerServices};
pub use tokio_util::sync::CancellationToken;

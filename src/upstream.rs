//! # Upstream source abstraction.
//!
//! The relay consumes exactly one upstream. [`Upstream`] is the seam: given the
//! relay's last accepted sequence it opens a connection and returns a stream of
//! [`UpstreamRecord`]s. The ingestor owns reconnecting; an implementation only
//! needs to open one connection per call.
//!
//! [`UpstreamFn`] wraps a closure, producing a fresh connection future per call.
//!
//! ## Example
//! ```rust
//! use futures::StreamExt;
//! use commit_relay::{RelayError, UpstreamFn, UpstreamRecord, UpstreamRef};
//!
//! let up: UpstreamRef = UpstreamFn::arc("static", |last_good: Option<u64>| async move {
//!     let start = last_good.map_or(1, |s| s + 1);
//!     let records = (start..start + 3).map(|seq| Ok(UpstreamRecord::new(seq, "commit")));
//!     Ok::<_, RelayError>(futures::stream::iter(records).boxed())
//! });
//! assert_eq!(up.name(), "static");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::RelayError;

/// One framed record as received from upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamRecord {
    /// Upstream sequence number.
    pub seq: u64,
    /// Opaque payload.
    pub payload: Bytes,
}

impl UpstreamRecord {
    /// Creates a record.
    pub fn new(seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }
}

/// Records of one upstream connection. Ends (or errors) when the connection is lost.
pub type RecordStream = BoxStream<'static, Result<UpstreamRecord, RelayError>>;

/// Shared handle to an upstream.
pub type UpstreamRef = Arc<dyn Upstream>;

/// # A resumable, strictly ordered record source.
///
/// `connect` receives the relay's last accepted sequence (`None` before the
/// first record) so the source can resume right after it. Records at or below
/// `last_good` are tolerated and dropped by the ingestor; records beyond
/// `last_good + 1` are treated as a gap.
///
/// Failures to connect should be reported as [`RelayError::UpstreamDisconnected`].
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Stable, human-readable name.
    fn name(&self) -> &str;

    /// Opens one connection resuming after `last_good`.
    async fn connect(&self, last_good: Option<u64>) -> Result<RecordStream, RelayError>;
}

/// Closure-backed [`Upstream`].
pub struct UpstreamFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> UpstreamFn<F> {
    /// Creates a closure-backed upstream.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the upstream and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Upstream for UpstreamFn<F>
where
    F: Fn(Option<u64>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RecordStream, RelayError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, last_good: Option<u64>) -> Result<RecordStream, RelayError> {
        (self.f)(last_good).await
    }
}

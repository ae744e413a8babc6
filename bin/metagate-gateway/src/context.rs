//! Request-context glue
//!
//! An S3 handler builds a [`RequestContext`] once the request is
//! authenticated, resolves the bucket and object rows through it,
//! and wraps the body streams in the owner's QoS budget before
//! touching blob bytes.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use metagate_common::{Error, Result};
use metagate_meta::VersionRef;
use metagate_meta::types::{Bucket, Object};

use crate::app::App;

/// How the request was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    #[default]
    Anonymous,
    SigV2,
    SigV4,
    Presigned,
}

/// Everything the core needs to know about one in-flight request.
pub struct RequestContext {
    pub request_id: String,
    pub auth_type: AuthType,
    /// Authenticated principal; empty for anonymous requests.
    pub owner_id: String,
    /// True when the bucket came from the Host header rather than
    /// the path.
    pub is_bucket_domain: bool,
    pub bucket: Option<Bucket>,
    pub object: Option<Object>,
    /// Decoded fields of a POST-form upload.
    pub form_values: HashMap<String, String>,
}

impl RequestContext {
    #[must_use]
    pub fn new(auth_type: AuthType, owner_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            auth_type,
            owner_id: owner_id.into(),
            is_bucket_domain: false,
            bucket: None,
            object: None,
            form_values: HashMap::new(),
        }
    }

    /// Name of the resolved bucket, or empty before resolution.
    #[must_use]
    pub fn bucket_name(&self) -> &str {
        self.bucket.as_ref().map_or("", |b| b.name.as_str())
    }
}

impl App {
    /// Loads the bucket row into the context.
    pub fn resolve_bucket(&self, ctx: &mut RequestContext, bucket: &str) -> Result<()> {
        ctx.bucket = Some(self.meta.get_bucket(bucket, true)?);
        Ok(())
    }

    /// Loads the object row into the context. Without a version id
    /// this resolves the latest visible version.
    pub fn resolve_object(
        &self,
        ctx: &mut RequestContext,
        object: &str,
        version_id: Option<&str>,
    ) -> Result<()> {
        let Some(bucket) = ctx.bucket.as_ref() else {
            return Err(Error::internal("object resolved before bucket"));
        };
        let row = match version_id {
            Some(id) => self
                .meta
                .get_object(&bucket.name, object, VersionRef::parse(id)?, true)?,
            None => self.meta.get_latest_object_version(&bucket.name, object)?,
        };
        ctx.object = Some(row);
        Ok(())
    }

    /// Charges one read operation against the bucket owner,
    /// sleeping out any shortfall.
    pub async fn throttle_read(&self, ctx: &RequestContext) {
        self.throttler.allow_read(ctx.bucket_name()).await;
    }

    /// Charges one write operation against the bucket owner.
    pub async fn throttle_write(&self, ctx: &RequestContext) {
        self.throttler.allow_write(ctx.bucket_name()).await;
    }

    /// Wraps an upload body in the owner's bandwidth budget.
    pub fn wrap_body<R: AsyncRead + Send + Unpin + 'static>(
        &self,
        ctx: &RequestContext,
        body: R,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        self.throttler.wrap_reader(ctx.bucket_name(), body)
    }

    /// Wraps a download sink in the owner's bandwidth budget.
    pub fn wrap_download<W: AsyncWrite + Send + Unpin + 'static>(
        &self,
        ctx: &RequestContext,
        sink: W,
    ) -> Result<Box<dyn AsyncWrite + Send + Unpin>> {
        self.throttler.wrap_writer(ctx.bucket_name(), sink)
    }
}

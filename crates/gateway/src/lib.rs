#![deny(missing_docs)]
//! HTTP gateway downloader capability for spate.
//!
//! A [Gateway] turns one trustless HTTP gateway endpoint into a
//! [Downloader](spate_api::Downloader): it requests the traversal as a
//! single CARv1 container stream (`GET {base}/ipfs/{root}` with an
//! `application/vnd.ipld.car` accept header) and surfaces the stream's
//! sections as blocks. The gateway is untrusted; nothing here verifies
//! payloads, the race scheduler does that at its merge point.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use spate_api::{
    Block, BlockStream, BoxFut, ContentId, Downloader, DynBlockStream,
    DynTraversalSpec, SpateError, SpateResult, TraversalScope,
};
use std::sync::Arc;
use url::Url;

pub mod car;
pub mod dagpb;

use car::CarReader;

const ACCEPT_CAR: &str = "application/vnd.ipld.car";
const USER_AGENT: &str = concat!("spate/", env!("CARGO_PKG_VERSION"));

/// One HTTP gateway endpoint as a downloader capability.
#[derive(Debug)]
pub struct Gateway {
    name: String,
    base_url: Url,
    client: reqwest::Client,
}

impl Gateway {
    /// Construct a gateway capability for the given base url, e.g.
    /// `https://ipfs.io/`.
    pub fn new(base_url: Url) -> SpateResult<Arc<Self>> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| {
                SpateError::other_src("failed to build http client", err)
            })?;
        Ok(Self::with_client(base_url, client))
    }

    /// Construct a gateway capability reusing an existing http client,
    /// so a pool of gateways shares one connection pool.
    pub fn with_client(
        mut base_url: Url,
        client: reqwest::Client,
    ) -> Arc<Self> {
        // A trailing slash makes Url::join treat the last path segment
        // as a directory instead of replacing it.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Arc::new(Self {
            name: base_url.to_string(),
            base_url,
            client,
        })
    }
}

impl Downloader for Gateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn download(
        &self,
        root: ContentId,
        spec: DynTraversalSpec,
    ) -> BoxFut<'_, SpateResult<DynBlockStream>> {
        Box::pin(async move {
            if spec.scope() != TraversalScope::Everything {
                return Err(SpateError::unsupported(format!(
                    "gateway {} only serves full-dag traversals, not {spec:?}",
                    self.name
                )));
            }

            let url = self
                .base_url
                .join(&format!("ipfs/{root}"))
                .map_err(|err| {
                    SpateError::other_src(
                        format!("failed to build gateway url for {root}"),
                        err,
                    )
                })?;

            tracing::debug!(gateway = %self.name, %root, "requesting car stream");

            let resp = self
                .client
                .get(url)
                .query(&[("format", "car")])
                .header(reqwest::header::ACCEPT, ACCEPT_CAR)
                .send()
                .await
                .map_err(|err| {
                    SpateError::transport_src(
                        format!("gateway {} request failed", self.name),
                        err,
                    )
                })?;

            let status = resp.status();
            if !status.is_success() {
                return Err(SpateError::transport(format!(
                    "gateway {} answered {status} for {root}",
                    self.name
                )));
            }

            let reader =
                CarReader::new(resp.bytes_stream().boxed()).await?;
            if !reader.roots().contains(&root) {
                return Err(SpateError::transport(format!(
                    "gateway {} answered with a car rooted elsewhere for {root}",
                    self.name
                )));
            }

            let out: DynBlockStream = Box::new(CarBlockStream { reader });
            Ok(out)
        })
    }
}

/// [BlockStream] over one gateway response body.
struct CarBlockStream {
    reader: CarReader<BoxStream<'static, reqwest::Result<Bytes>>>,
}

impl BlockStream for CarBlockStream {
    fn next(&mut self) -> BoxFut<'_, SpateResult<Option<Block>>> {
        Box::pin(async move { self.reader.next_block().await })
    }
}

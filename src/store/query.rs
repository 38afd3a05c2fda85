//! Query Executor
//!
//! Answers series, label-values and label-names queries over a registry
//! snapshot.
//!
//! # Series path
//!
//! ```text
//! snapshot → prune per block → open eligible blocks (bounded, in block order)
//!          → select series with residual matchers → fetch in-range chunks
//!          → bounded channel → SeriesStream
//! ```
//!
//! Series of one block are emitted in label-sorted order and blocks are never
//! interleaved. Rows of one block whose labels coincide once external labels
//! are applied come out as one series. Identical label sets from different
//! blocks are emitted twice.

use crate::block::descriptor::BlockDescriptor;
use crate::block::error::{StoreError, StoreResult};
use crate::block::format::{ChunkMeta, ChunkReader, IndexReader};
use crate::block::types::{Chunk, Labels, Series};
use crate::store::matcher::{prune, Matcher};
use crate::store::registry::BlockRegistry;
use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Query execution limits
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Blocks opened concurrently per query
    pub block_concurrency: usize,
    /// Series buffered between the producer task and the consumer
    pub series_buffer: usize,
    /// Per-query deadline; expiry cancels the query
    pub timeout: Option<Duration>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            block_concurrency: 8,
            series_buffer: 64,
            timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Series lookup: `[min_time, max_time]` plus matchers
#[derive(Debug, Clone)]
pub struct SeriesRequest {
    pub min_time: i64,
    pub max_time: i64,
    pub matchers: Vec<Matcher>,
}

/// Distinct values of one label
#[derive(Debug, Clone)]
pub struct LabelValuesRequest {
    pub label: String,
    pub min_time: i64,
    pub max_time: i64,
    pub matchers: Vec<Matcher>,
}

/// Distinct label names
#[derive(Debug, Clone)]
pub struct LabelNamesRequest {
    pub min_time: i64,
    pub max_time: i64,
    pub matchers: Vec<Matcher>,
}

/// What this gateway can currently serve
#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    pub blocks: usize,
    pub min_time: Option<i64>,
    pub max_time: Option<i64>,
    /// Distinct external label sets across blocks
    pub label_sets: Vec<BTreeMap<String, String>>,
}

/// Lazy, finite, cancellable sequence of series
///
/// The first error is the last item. Cancelling the query token ends the
/// stream with [`StoreError::Cancelled`]. Dropping the stream stops the producer.
pub struct SeriesStream {
    rx: mpsc::Receiver<StoreResult<Series>>,
    token: CancellationToken,
    done: bool,
    _guard: DropGuard,
}

impl SeriesStream {
    /// Drain the stream, failing on the first error
    pub async fn collect_all(self) -> StoreResult<Vec<Series>> {
        self.try_collect().await
    }
}

impl Stream for SeriesStream {
    type Item = StoreResult<Series>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if self.token.is_cancelled() {
            self.done = true;
            self.rx.close();
            return Poll::Ready(Some(Err(StoreError::Cancelled)));
        }

        let next = ready!(self.rx.poll_recv(cx));
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        Poll::Ready(next)
    }
}

/// Runs queries against the block registry
pub struct QueryExecutor {
    registry: Arc<BlockRegistry>,
    config: QueryConfig,
}

impl QueryExecutor {
    pub fn new(registry: Arc<BlockRegistry>, config: QueryConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Child of `cancel` that also fires when the query deadline passes
    fn scoped_token(&self, cancel: &CancellationToken) -> CancellationToken {
        let token = cancel.child_token();
        if let Some(timeout) = self.config.timeout {
            let deadline = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = deadline.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Query deadline exceeded");
                        deadline.cancel();
                    }
                }
            });
        }
        token
    }

    /// Prune the current snapshot, keeping eligible blocks and their residual matchers
    fn eligible_blocks(
        &self,
        min_time: i64,
        max_time: i64,
        matchers: &[Matcher],
    ) -> StoreResult<Vec<(Arc<BlockDescriptor>, Vec<Matcher>)>> {
        let snapshot = self.registry.snapshot()?;
        let total = snapshot.len();
        let eligible: Vec<_> = snapshot
            .into_iter()
            .filter_map(|block| {
                let pruned = prune(&block, min_time, max_time, matchers);
                pruned.eligible.then_some((block, pruned.matchers))
            })
            .collect();

        tracing::debug!(
            blocks = total,
            eligible = eligible.len(),
            min_time,
            max_time,
            "Pruned block snapshot"
        );
        Ok(eligible)
    }

    /// Stream series matching the request
    pub fn series(&self, req: SeriesRequest, cancel: &CancellationToken) -> SeriesStream {
        let token = self.scoped_token(cancel);
        let (tx, rx) = mpsc::channel(self.config.series_buffer.max(1));

        match self.eligible_blocks(req.min_time, req.max_time, &req.matchers) {
            Ok(blocks) => {
                let concurrency = self.config.block_concurrency.max(1);
                let producer_token = token.clone();
                tokio::spawn(async move {
                    if let Err(e) = produce_series(blocks, &req, concurrency, &producer_token, &tx).await {
                        if !matches!(e, StoreError::Cancelled) {
                            tracing::warn!(error = %e, "Series query failed");
                        }
                        let _ = tx.send(Err(e)).await;
                    }
                });
            }
            Err(e) => {
                // Capacity is at least one, so this cannot block
                let _ = tx.try_send(Err(e));
            }
        }

        SeriesStream {
            rx,
            token: token.clone(),
            done: false,
            _guard: token.drop_guard(),
        }
    }

    /// Sorted, deduplicated values of `req.label` across eligible blocks
    pub async fn label_values(
        &self,
        req: LabelValuesRequest,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<String>> {
        let token = self.scoped_token(cancel);
        let _guard = token.clone().drop_guard();
        let blocks = self.eligible_blocks(req.min_time, req.max_time, &req.matchers)?;

        let label = req.label.as_str();
        let per_block = stream::iter(blocks)
            .map(|(block, residual)| async move { block_label_values(&block, label, &residual).await })
            .buffer_unordered(self.config.block_concurrency.max(1));

        let values = merge_sorted(per_block, &token).await?;
        tracing::debug!(label, values = values.len(), "Label values query completed");
        Ok(values)
    }

    /// Sorted, deduplicated label names across eligible blocks
    pub async fn label_names(
        &self,
        req: LabelNamesRequest,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<String>> {
        let token = self.scoped_token(cancel);
        let _guard = token.clone().drop_guard();
        let blocks = self.eligible_blocks(req.min_time, req.max_time, &req.matchers)?;

        let per_block = stream::iter(blocks)
            .map(|(block, residual)| async move { block_label_names(&block, &residual).await })
            .buffer_unordered(self.config.block_concurrency.max(1));

        merge_sorted(per_block, &token).await
    }

    /// Block count, global bound and external label sets
    pub fn info(&self) -> StoreResult<StoreInfo> {
        let snapshot = self.registry.snapshot()?;
        let bounds = crate::store::registry::global_bounds(snapshot.iter().map(|b| b.as_ref()));
        let label_sets: BTreeSet<BTreeMap<String, String>> = snapshot
            .iter()
            .map(|b| b.external_labels().clone())
            .filter(|labels| !labels.is_empty())
            .collect();

        Ok(StoreInfo {
            blocks: snapshot.len(),
            min_time: bounds.map(|b| b.0),
            max_time: bounds.map(|b| b.1),
            label_sets: label_sets.into_iter().collect(),
        })
    }
}

/// Union per-block string sets, aborting on the first error or on cancellation
async fn merge_sorted<S>(per_block: S, cancel: &CancellationToken) -> StoreResult<Vec<String>>
where
    S: Stream<Item = StoreResult<Vec<String>>>,
{
    let mut per_block = std::pin::pin!(per_block);
    let mut merged = BTreeSet::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            next = per_block.next() => next,
        };
        match next {
            Some(values) => merged.extend(values?),
            None => break,
        }
    }
    Ok(merged.into_iter().collect())
}

async fn block_label_values(
    block: &BlockDescriptor,
    label: &str,
    residual: &[Matcher],
) -> StoreResult<Vec<String>> {
    if let Some(value) = block.external_labels().get(label) {
        if residual.is_empty() {
            return Ok(vec![value.clone()]);
        }
        // The value is block-wide, but only counts if some series survives the residual matchers
        let index = block.open_index_reader().await?;
        return Ok(if index.select(residual).is_empty() {
            Vec::new()
        } else {
            vec![value.clone()]
        });
    }

    let index = block.open_index_reader().await?;
    Ok(index.label_values_for(label, residual))
}

async fn block_label_names(block: &BlockDescriptor, residual: &[Matcher]) -> StoreResult<Vec<String>> {
    let index = block.open_index_reader().await?;
    let selected = index.select(residual);
    if selected.is_empty() {
        return Ok(Vec::new());
    }

    let mut names: BTreeSet<String> = selected
        .iter()
        .flat_map(|entry| entry.labels.names())
        .map(str::to_string)
        .collect();
    names.extend(block.external_labels().keys().cloned());
    Ok(names.into_iter().collect())
}

/// A block whose index has been fetched and filtered
struct OpenBlock {
    block: Arc<BlockDescriptor>,
    index: IndexReader,
    residual: Vec<Matcher>,
}

async fn open_block(block: Arc<BlockDescriptor>, residual: Vec<Matcher>) -> StoreResult<OpenBlock> {
    let index = block.open_index_reader().await?;
    Ok(OpenBlock {
        block,
        index,
        residual,
    })
}

async fn produce_series(
    blocks: Vec<(Arc<BlockDescriptor>, Vec<Matcher>)>,
    req: &SeriesRequest,
    concurrency: usize,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<StoreResult<Series>>,
) -> StoreResult<()> {
    let mut opened = std::pin::pin!(stream::iter(blocks)
        .map(|(block, residual)| open_block(block, residual))
        .buffered(concurrency));

    let mut emitted = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            next = opened.next() => next,
        };
        let Some(open) = next else { break };
        let open = open?;

        // External labels can make distinct rows collide; those become one series
        let external = open.block.external_labels();
        let mut grouped: BTreeMap<Labels, Vec<&ChunkMeta>> = BTreeMap::new();
        for entry in open.index.select(&open.residual) {
            let metas: Vec<&ChunkMeta> = entry
                .chunks
                .iter()
                .filter(|c| c.overlaps(req.min_time, req.max_time))
                .collect();
            if metas.is_empty() {
                continue;
            }
            grouped
                .entry(entry.labels.with_external(external))
                .or_default()
                .extend(metas);
        }

        let mut chunk_reader: Option<ChunkReader> = None;
        for (labels, mut metas) in grouped {
            metas.sort_by_key(|c| (c.min_time, c.max_time));

            if chunk_reader.is_none() {
                chunk_reader = Some(open.block.open_chunk_reader().await?);
            }
            let Some(reader) = chunk_reader.as_ref() else {
                continue;
            };

            let chunks = metas
                .into_iter()
                .map(|meta| -> StoreResult<Chunk> {
                    Ok(Chunk {
                        min_time: meta.min_time,
                        max_time: meta.max_time,
                        data: reader.chunk(meta.chunk_ref)?.to_vec(),
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;

            let series = Series { labels, chunks };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                sent = tx.send(Ok(series)) => {
                    if sent.is_err() {
                        // Consumer went away
                        return Ok(());
                    }
                }
            }
            emitted += 1;
        }
    }

    tracing::debug!(series = emitted, "Series query completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::format::BlockBuilder;
    use crate::block::meta::{BlockMeta, CHUNKS_FILENAME};
    use crate::block::types::{BlockId, Labels, TimeRange};
    use crate::bucket::{Bucket, ObjectStoreBucket};
    use crate::store::matcher::MatchOp;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn chunk(min: i64, max: i64, data: &str) -> Chunk {
        Chunk {
            min_time: min,
            max_time: max,
            data: data.as_bytes().to_vec(),
        }
    }

    struct Fixture {
        bucket: Arc<dyn Bucket>,
        registry: Arc<BlockRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_bucket(Arc::new(ObjectStoreBucket::in_memory()))
        }

        fn with_bucket(bucket: Arc<dyn Bucket>) -> Self {
            Self {
                bucket,
                registry: Arc::new(BlockRegistry::new()),
            }
        }

        async fn add(&self, builder: BlockBuilder) -> BlockId {
            let meta: BlockMeta = builder.upload(self.bucket.as_ref()).await.unwrap();
            let id = meta.ulid.clone();
            self.registry
                .upsert(Arc::new(BlockDescriptor::new(meta, self.bucket.clone())))
                .unwrap();
            id
        }

        fn executor(&self) -> QueryExecutor {
            QueryExecutor::new(self.registry.clone(), QueryConfig::default())
        }
    }

    /// Counts object fetches and can stall them forever
    struct CountingBucket {
        inner: ObjectStoreBucket,
        gets: AtomicUsize,
        stall: AtomicBool,
    }

    impl CountingBucket {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: ObjectStoreBucket::in_memory(),
                gets: AtomicUsize::new(0),
                stall: AtomicBool::new(false),
            })
        }

        fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Bucket for CountingBucket {
        async fn list_blocks(&self) -> StoreResult<Vec<BlockId>> {
            self.inner.list_blocks().await
        }

        async fn get(&self, block: &BlockId, name: &str) -> StoreResult<Bytes> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.stall.load(Ordering::SeqCst) {
                return std::future::pending().await;
            }
            self.inner.get(block, name).await
        }

        async fn put(&self, block: &BlockId, name: &str, data: Bytes) -> StoreResult<()> {
            self.inner.put(block, name, data).await
        }

        async fn delete_block(&self, block: &BlockId) -> StoreResult<()> {
            self.inner.delete_block(block).await
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    /// Five blocks of three series each, behind a counting bucket
    async fn counted_blocks() -> (Fixture, Arc<CountingBucket>) {
        let bucket = CountingBucket::new();
        let fx = Fixture::with_bucket(bucket.clone());
        for b in 0..5u64 {
            let mut builder = BlockBuilder::new(BlockId::generate(1_000 + b), TimeRange::new(0, 99));
            for s in 0..3 {
                builder.add_series(
                    Labels::from_pairs([("s", s.to_string())]),
                    vec![chunk(0, 99, "x")],
                );
            }
            fx.add(builder).await;
        }
        bucket.gets.store(0, Ordering::SeqCst);
        (fx, bucket)
    }

    fn label_values_req(label: &str) -> LabelValuesRequest {
        LabelValuesRequest {
            label: label.to_string(),
            min_time: i64::MIN,
            max_time: i64::MAX,
            matchers: vec![],
        }
    }

    /// Two blocks: one with `ext="v"` and series {a=1,b=1},{a=1,b=2},{a=2},
    /// one without external labels and series {a=1,b=2}.
    async fn two_blocks() -> (Fixture, BlockId, BlockId) {
        let fx = Fixture::new();

        let mut first = BlockBuilder::new(BlockId::generate(1_000), TimeRange::new(0, 99))
            .external_label("ext", "v");
        first.add_series(
            Labels::from_pairs([("a", "1"), ("b", "2")]),
            vec![chunk(50, 99, "1b2-late"), chunk(0, 49, "1b2-early")],
        );
        first.add_series(Labels::from_pairs([("a", "1"), ("b", "1")]), vec![chunk(0, 99, "1b1")]);
        first.add_series(Labels::from_pairs([("a", "2")]), vec![chunk(0, 99, "2")]);
        let first = fx.add(first).await;

        let mut second = BlockBuilder::new(BlockId::generate(2_000), TimeRange::new(100, 199));
        second.add_series(
            Labels::from_pairs([("a", "1"), ("b", "2")]),
            vec![chunk(100, 199, "second")],
        );
        let second = fx.add(second).await;

        (fx, first, second)
    }

    fn all(matchers: Vec<Matcher>) -> SeriesRequest {
        SeriesRequest {
            min_time: i64::MIN,
            max_time: i64::MAX,
            matchers,
        }
    }

    #[tokio::test]
    async fn test_series_order_and_external_labels() {
        let (fx, _, _) = two_blocks().await;
        let cancel = CancellationToken::new();

        let series = fx
            .executor()
            .series(all(vec![Matcher::equal("a", "1")]), &cancel)
            .collect_all()
            .await
            .unwrap();

        let labels: Vec<String> = series.iter().map(|s| s.labels.to_string()).collect();
        assert_eq!(
            labels,
            vec![
                r#"{a="1", b="1", ext="v"}"#,
                r#"{a="1", b="2", ext="v"}"#,
                r#"{a="1", b="2"}"#,
            ]
        );

        // Chunks come back in time order
        let data: Vec<&[u8]> = series[1].chunks.iter().map(|c| c.data.as_slice()).collect();
        assert_eq!(data, vec![b"1b2-early".as_slice(), b"1b2-late".as_slice()]);
    }

    #[tokio::test]
    async fn test_series_external_matchers() {
        let (fx, _, _) = two_blocks().await;
        let cancel = CancellationToken::new();
        let executor = fx.executor();

        let matching = executor
            .series(all(vec![Matcher::equal("a", "1"), Matcher::equal("ext", "v")]), &cancel)
            .collect_all()
            .await
            .unwrap();
        assert_eq!(matching.len(), 2);
        assert!(matching.iter().all(|s| s.labels.get("ext") == Some("v")));

        let none = executor
            .series(all(vec![Matcher::equal("a", "1"), Matcher::equal("ext", "nope")]), &cancel)
            .collect_all()
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_series_restricts_chunks_to_range() {
        let (fx, _, _) = two_blocks().await;
        let cancel = CancellationToken::new();

        let series = fx
            .executor()
            .series(
                SeriesRequest {
                    min_time: 60,
                    max_time: 100,
                    matchers: vec![Matcher::equal("b", "2")],
                },
                &cancel,
            )
            .collect_all()
            .await
            .unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].chunks.len(), 1);
        assert_eq!(series[0].chunks[0].data, b"1b2-late".to_vec());
        assert_eq!(series[1].chunks[0].data, b"second".to_vec());
    }

    #[tokio::test]
    async fn test_series_skips_series_without_chunks_in_range() {
        let fx = Fixture::new();
        let mut builder = BlockBuilder::new(BlockId::generate(1), TimeRange::new(0, 100));
        builder.add_series(Labels::from_pairs([("a", "early")]), vec![chunk(0, 10, "e")]);
        builder.add_series(Labels::from_pairs([("a", "late")]), vec![chunk(90, 100, "l")]);
        fx.add(builder).await;

        let series = fx
            .executor()
            .series(
                SeriesRequest {
                    min_time: 50,
                    max_time: 100,
                    matchers: vec![],
                },
                &CancellationToken::new(),
            )
            .collect_all()
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].labels.get("a"), Some("late"));
    }

    #[tokio::test]
    async fn test_series_block_error_aborts_query() {
        let (fx, first, _) = two_blocks().await;
        fx.bucket
            .put(&first, CHUNKS_FILENAME, Bytes::from_static(b"BCHK\x01\x00\x00\x00"))
            .await
            .unwrap();

        let result = fx
            .executor()
            .series(all(vec![]), &CancellationToken::new())
            .collect_all()
            .await;
        assert!(result.unwrap_err().is_corruption());
    }

    #[tokio::test]
    async fn test_series_missing_index_is_error_not_empty() {
        let fx = Fixture::new();
        let id = BlockId::generate(1);
        let meta = BlockMeta::new(id, TimeRange::new(0, 10));
        fx.registry
            .upsert(Arc::new(BlockDescriptor::new(meta, fx.bucket.clone())))
            .unwrap();

        let mut stream = fx.executor().series(all(vec![]), &CancellationToken::new());
        let first = stream.next().await.unwrap();
        assert!(first.unwrap_err().is_transient());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_series_cancelled() {
        let (fx, _, _) = two_blocks().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = fx.executor().series(all(vec![]), &cancel).collect_all().await;
        assert!(matches!(result, Err(StoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_series_merges_rows_collapsed_by_external_labels() {
        let fx = Fixture::new();
        let mut builder = BlockBuilder::new(BlockId::generate(1), TimeRange::new(0, 99))
            .external_label("a", "e");
        builder.add_series(Labels::from_pairs([("a", "1"), ("z", "2")]), vec![chunk(20, 29, "a1")]);
        builder.add_series(Labels::from_pairs([("a", "2"), ("z", "1")]), vec![chunk(10, 19, "a2")]);
        builder.add_series(Labels::from_pairs([("a", "3"), ("z", "1")]), vec![chunk(0, 9, "a3")]);
        fx.add(builder).await;

        let series = fx
            .executor()
            .series(all(vec![]), &CancellationToken::new())
            .collect_all()
            .await
            .unwrap();

        let labels: Vec<String> = series.iter().map(|s| s.labels.to_string()).collect();
        assert_eq!(labels, vec![r#"{a="e", z="1"}"#, r#"{a="e", z="2"}"#]);

        let merged: Vec<&[u8]> = series[0].chunks.iter().map(|c| c.data.as_slice()).collect();
        assert_eq!(merged, vec![b"a3".as_slice(), b"a2".as_slice()]);
        assert_eq!(series[1].chunks.len(), 1);
        assert_eq!(series[1].chunks[0].data, b"a1".to_vec());
    }

    #[tokio::test]
    async fn test_series_cancel_after_first_item() {
        let (fx, _, _) = two_blocks().await;
        let cancel = CancellationToken::new();

        let mut stream = fx.executor().series(all(vec![]), &cancel);
        assert!(stream.next().await.unwrap().is_ok());

        cancel.cancel();
        assert!(matches!(stream.next().await, Some(Err(StoreError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_series_cancel_while_fetch_pending() {
        let (fx, bucket) = counted_blocks().await;
        bucket.stall.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        let mut stream = fx.executor().series(all(vec![]), &cancel);
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream did not observe cancellation");
        assert!(matches!(next, Some(Err(StoreError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_series_drop_stops_producer() {
        let (fx, bucket) = counted_blocks().await;
        let executor = QueryExecutor::new(
            fx.registry.clone(),
            QueryConfig {
                block_concurrency: 1,
                series_buffer: 1,
                ..QueryConfig::default()
            },
        );

        let mut stream = executor.series(all(vec![]), &CancellationToken::new());
        assert!(stream.next().await.unwrap().is_ok());
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_drop = bucket.gets();
        // A full run fetches index and chunks for all five blocks
        assert!(after_drop <= 4, "producer kept fetching: {} gets", after_drop);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bucket.gets(), after_drop);
    }

    #[tokio::test]
    async fn test_series_snapshot_survives_removal() {
        let (fx, first, second) = two_blocks().await;
        let executor = QueryExecutor::new(
            fx.registry.clone(),
            QueryConfig {
                series_buffer: 1,
                ..QueryConfig::default()
            },
        );

        let mut stream = executor.series(all(vec![]), &CancellationToken::new());
        let head = stream.next().await.unwrap().unwrap();
        fx.registry.remove(&first).unwrap();
        fx.registry.remove(&second).unwrap();

        let rest: Vec<Series> = stream.try_collect().await.unwrap();
        assert_eq!(1 + rest.len(), 4);
        assert_eq!(head.labels.get("ext"), Some("v"));
    }

    #[tokio::test]
    async fn test_label_values() {
        let (fx, _, _) = two_blocks().await;
        let cancel = CancellationToken::new();
        let executor = fx.executor();

        let req = |label: &str, matchers: Vec<Matcher>| LabelValuesRequest {
            label: label.to_string(),
            min_time: i64::MIN,
            max_time: i64::MAX,
            matchers,
        };

        assert_eq!(executor.label_values(req("a", vec![]), &cancel).await.unwrap(), vec!["1", "2"]);
        assert_eq!(executor.label_values(req("b", vec![]), &cancel).await.unwrap(), vec!["1", "2"]);
        assert_eq!(executor.label_values(req("ext", vec![]), &cancel).await.unwrap(), vec!["v"]);
        assert!(executor
            .label_values(req("missing", vec![]), &cancel)
            .await
            .unwrap()
            .is_empty());

        // External value requires a surviving series
        assert!(executor
            .label_values(req("ext", vec![Matcher::equal("a", "3")]), &cancel)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            executor
                .label_values(req("b", vec![Matcher::equal("ext", "v")]), &cancel)
                .await
                .unwrap(),
            vec!["1", "2"]
        );
        assert_eq!(
            executor
                .label_values(
                    req("a", vec![Matcher::new("b", MatchOp::RegexMatch, "1").unwrap()]),
                    &cancel
                )
                .await
                .unwrap(),
            vec!["1"]
        );
    }

    #[tokio::test]
    async fn test_label_values_time_pruning() {
        let (fx, _, _) = two_blocks().await;
        let values = fx
            .executor()
            .label_values(
                LabelValuesRequest {
                    label: "a".to_string(),
                    min_time: 100,
                    max_time: 150,
                    matchers: vec![],
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(values, vec!["1"]);
    }

    #[tokio::test]
    async fn test_label_values_block_error_aborts() {
        let (fx, _, second) = two_blocks().await;
        fx.bucket
            .put(&second, crate::block::meta::INDEX_FILENAME, Bytes::from_static(b"junk"))
            .await
            .unwrap();

        let err = fx
            .executor()
            .label_values(
                LabelValuesRequest {
                    label: "a".to_string(),
                    min_time: i64::MIN,
                    max_time: i64::MAX,
                    matchers: vec![],
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn test_label_values_cancelled() {
        let (fx, bucket) = counted_blocks().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fx
            .executor()
            .label_values(label_values_req("s"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));

        bucket.stall.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let executor = fx.executor();
        let token = cancel.clone();
        let handle =
            tokio::spawn(async move { executor.label_values(label_values_req("s"), &token).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bucket.gets() > 0);
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("label values did not observe cancellation")
            .unwrap();
        assert!(matches!(result, Err(StoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_label_names_and_info() {
        let (fx, _, _) = two_blocks().await;
        let executor = fx.executor();

        let names = executor
            .label_names(
                LabelNamesRequest {
                    min_time: i64::MIN,
                    max_time: i64::MAX,
                    matchers: vec![],
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(names, vec!["a", "b", "ext"]);

        let info = executor.info().unwrap();
        assert_eq!(info.blocks, 2);
        assert_eq!(info.min_time, Some(0));
        assert_eq!(info.max_time, Some(199));
        assert_eq!(info.label_sets.len(), 1);
    }

    #[tokio::test]
    async fn test_query_timeout_cancels() {
        let (fx, _, _) = two_blocks().await;
        let executor = QueryExecutor::new(
            fx.registry.clone(),
            QueryConfig {
                timeout: Some(Duration::ZERO),
                ..QueryConfig::default()
            },
        );

        let cancel = CancellationToken::new();
        let token = executor.scoped_token(&cancel);
        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
        assert!(!cancel.is_cancelled());
    }
}

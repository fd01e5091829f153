//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, Gauge, MetricBuilder};

/// `AffinityAllocator`のメトリクス.
#[derive(Debug, Clone)]
pub struct AllocatorMetrics {
    pub(crate) pooled_allocations: Counter,
    pub(crate) fallback_allocations: Counter,
    pub(crate) raw_allocations: Counter,
    pub(crate) pooled_releases: Counter,
    pub(crate) fallback_releases: Counter,
    pub(crate) raw_releases: Counter,
    pub(crate) blocks_created: Counter,
    pub(crate) pool_exhausted: Counter,
    pub(crate) unknown_pointers: Counter,
    pub(crate) block_bytes: Gauge,
}
impl AllocatorMetrics {
    /// プール内のブロックから割り当てられた領域の数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// affinity_alloc_allocator_allocations_total { path="pooled" } <COUNTER>
    /// ```
    pub fn pooled_allocations(&self) -> u64 {
        self.pooled_allocations.value() as u64
    }

    /// フォールバックアロケータから割り当てられた領域の数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// affinity_alloc_allocator_allocations_total { path="fallback" } <COUNTER>
    /// ```
    pub fn fallback_allocations(&self) -> u64 {
        self.fallback_allocations.value() as u64
    }

    /// 生のシステム割当によって割り当てられた領域の数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// affinity_alloc_allocator_allocations_total { path="raw" } <COUNTER>
    /// ```
    pub fn raw_allocations(&self) -> u64 {
        self.raw_allocations.value() as u64
    }

    /// 解放された領域の数(全経路の合計).
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sum(affinity_alloc_allocator_releases_total)
    /// ```
    pub fn releases(&self) -> u64 {
        self.pooled_releases.value() as u64
            + self.fallback_releases.value() as u64
            + self.raw_releases.value() as u64
    }

    /// 生成されたブロックの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// affinity_alloc_allocator_blocks_created_total <COUNTER>
    /// ```
    pub fn blocks_created(&self) -> u64 {
        self.blocks_created.value() as u64
    }

    /// プールが新しいブロックを確保できなかった回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// affinity_alloc_allocator_pool_exhausted_total <COUNTER>
    /// ```
    pub fn pool_exhausted(&self) -> u64 {
        self.pool_exhausted.value() as u64
    }

    /// 所有者が見つからないポインタの解放要求の数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// affinity_alloc_allocator_unknown_pointers_total <COUNTER>
    /// ```
    pub fn unknown_pointers(&self) -> u64 {
        self.unknown_pointers.value() as u64
    }

    /// 全プールのブロックが占めるバイト数の合計.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// affinity_alloc_allocator_block_bytes <GAUGE>
    /// ```
    pub fn block_bytes(&self) -> u64 {
        self.block_bytes.value() as u64
    }

    pub(crate) fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("affinity_alloc").subsystem("allocator");
        let allocations = |path: &str| {
            builder
                .counter("allocations_total")
                .help("Number of allocations")
                .label("path", path)
                .finish()
                .expect("Never fails")
        };
        let pooled_allocations = allocations("pooled");
        let fallback_allocations = allocations("fallback");
        let raw_allocations = allocations("raw");
        let releases = |path: &str| {
            builder
                .counter("releases_total")
                .help("Number of releases")
                .label("path", path)
                .finish()
                .expect("Never fails")
        };
        let pooled_releases = releases("pooled");
        let fallback_releases = releases("fallback");
        let raw_releases = releases("raw");
        AllocatorMetrics {
            pooled_allocations,
            fallback_allocations,
            raw_allocations,
            pooled_releases,
            fallback_releases,
            raw_releases,
            blocks_created: builder
                .counter("blocks_created_total")
                .help("Number of created blocks")
                .finish()
                .expect("Never fails"),
            pool_exhausted: builder
                .counter("pool_exhausted_total")
                .help("Number of failures to obtain block memory")
                .finish()
                .expect("Never fails"),
            unknown_pointers: builder
                .counter("unknown_pointers_total")
                .help("Number of releases of unowned pointers")
                .finish()
                .expect("Never fails"),
            block_bytes: builder
                .gauge("block_bytes")
                .help("Total bytes of pooled blocks")
                .finish()
                .expect("Never fails"),
        }
    }
}

//! Metrics definitions for the cache.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_REFRESH_SUCCESS: MetricDef = MetricDef {
    name: "cache.refresh.success",
    metric_type: MetricType::Counter,
    description: "Successful upstream fetches, tagged by entry",
};

pub const CACHE_REFRESH_FAILURE: MetricDef = MetricDef {
    name: "cache.refresh.failure",
    metric_type: MetricType::Counter,
    description: "Failed upstream fetches, tagged by entry",
};

pub const CACHE_FETCH_DURATION: MetricDef = MetricDef {
    name: "cache.fetch.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent fetching and decoding an upstream response in seconds",
};

pub const CACHE_STALE_SERVED: MetricDef = MetricDef {
    name: "cache.stale_served",
    metric_type: MetricType::Counter,
    description: "Requests answered from an entry past its soft age limit",
};

pub const CACHE_TOO_OLD: MetricDef = MetricDef {
    name: "cache.too_old",
    metric_type: MetricType::Counter,
    description: "Requests rejected because the entry was past its hard age limit",
};

pub const CACHE_ENTRIES: MetricDef = MetricDef {
    name: "cache.entries",
    metric_type: MetricType::Gauge,
    description: "Number of entries registered with the refresh scheduler",
};

pub const RESOLUTION: MetricDef = MetricDef {
    name: "resolution",
    metric_type: MetricType::Counter,
    description: "Service resolutions, tagged by the source that answered",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_REFRESH_SUCCESS,
    CACHE_REFRESH_FAILURE,
    CACHE_FETCH_DURATION,
    CACHE_STALE_SERVED,
    CACHE_TOO_OLD,
    CACHE_ENTRIES,
    RESOLUTION,
];

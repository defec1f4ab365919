use metrics::counter;

pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "hookrelay_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "hookrelay_cache_misses_total";
    pub const DISPATCHES_TOTAL: &str = "hookrelay_dispatches_total";
}

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_dispatch() {
    counter!(names::DISPATCHES_TOTAL).increment(1);
}

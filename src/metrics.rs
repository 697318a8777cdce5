use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("caseprep_requests_total", "Total number of analysis requests").unwrap();
    pub static ref REJECTIONS: CounterVec = register_counter_vec!(
        "caseprep_rejections_total",
        "Analysis requests that ended without a result, by reason",
        &["reason"]
    )
    .unwrap();
    pub static ref ANALYSES_COMPLETED: Counter =
        register_counter!("caseprep_analyses_completed_total", "Analyses returned by the model").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "caseprep_analysis_latency_seconds",
        "Time spent waiting on the model, in seconds"
    )
    .unwrap();
    pub static ref LEDGER_SIZE: Gauge =
        register_gauge!("caseprep_ledger_records", "Current number of usage records").unwrap();
}

//! Optional pipeline metrics.
//!
//! The macros forward to the `metrics` crate when the `metrics` feature is
//! enabled and compile to nothing otherwise, so call sites never need their
//! own `cfg` guards.
//!
//! ```toml
//! [dependencies]
//! transcode-core = { version = "0.1", features = ["metrics"] }
//! ```
//!
//! Names in use:
//! - `ring.in_flight` (gauge, label `kind`) - buffers outside the free stage
//! - `ring.removed` (counter, label `kind`) - frames returned to the pool
//! - `pipeline.frames.encoded` / `skipped` / `dropped` / `cloned` (counters)
//! - `pipeline.filter.duration_ns` (histogram, label `stage`) - filter chain time
//! - `pipeline.import.frames` (counter, label `kind`) - frames read by import

/// Increment a counter.
///
/// ```ignore
/// record_counter!("pipeline.frames.encoded", 1u64);
/// record_counter!("ring.removed", 1u64, "kind" => "video");
/// ```
#[macro_export]
#[cfg(feature = "metrics")]
macro_rules! record_counter {
    ($name:expr, $value:expr) => {
        ::metrics::counter!($name).increment($value)
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        ::metrics::counter!($name, $($label_key => $label_value),+).increment($value)
    };
}

#[macro_export]
#[cfg(not(feature = "metrics"))]
macro_rules! record_counter {
    ($name:expr, $value:expr) => {
        let _ = ($name, $value);
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        let _ = ($name, $value, $($label_key, $label_value),+);
    };
}

/// Record one sample in a histogram.
#[macro_export]
#[cfg(feature = "metrics")]
macro_rules! record_histogram {
    ($name:expr, $value:expr) => {
        ::metrics::histogram!($name).record($value)
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        ::metrics::histogram!($name, $($label_key => $label_value),+).record($value)
    };
}

#[macro_export]
#[cfg(not(feature = "metrics"))]
macro_rules! record_histogram {
    ($name:expr, $value:expr) => {
        let _ = ($name, $value);
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        let _ = ($name, $value, $($label_key, $label_value),+);
    };
}

/// Set a gauge.
///
/// ```ignore
/// record_gauge!("ring.in_flight", 4.0, "kind" => "audio");
/// ```
#[macro_export]
#[cfg(feature = "metrics")]
macro_rules! record_gauge {
    ($name:expr, $value:expr) => {
        ::metrics::gauge!($name).set($value)
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        ::metrics::gauge!($name, $($label_key => $label_value),+).set($value)
    };
}

#[macro_export]
#[cfg(not(feature = "metrics"))]
macro_rules! record_gauge {
    ($name:expr, $value:expr) => {
        let _ = ($name, $value);
    };
    ($name:expr, $value:expr, $($label_key:expr => $label_value:expr),+ $(,)?) => {
        let _ = ($name, $value, $($label_key, $label_value),+);
    };
}

pub use record_counter;
pub use record_gauge;
pub use record_histogram;

/// Run `f` and record its duration in nanoseconds under `metric_name`,
/// labelled with `stage`.
#[inline]
pub fn timed<F, R>(metric_name: &'static str, stage: &'static str, f: F) -> R
where
    F: FnOnce() -> R,
{
    #[cfg(feature = "metrics")]
    {
        let start = std::time::Instant::now();
        let result = f();
        record_histogram!(metric_name, start.elapsed().as_nanos() as f64, "stage" => stage);
        result
    }

    #[cfg(not(feature = "metrics"))]
    {
        let _ = (metric_name, stage);
        f()
    }
}

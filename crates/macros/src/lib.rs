//! Macros for recording metrics.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

// Re-exported so the macros resolve `metrics` from the caller's perspective.
#[doc(hidden)]
pub use metrics;

/// Sets a metric value, optionally with a specified label.
#[macro_export]
macro_rules! set {
    ($instrument:ident, $metric:expr, $key:expr, $value:expr, $amount:expr) => {
        $crate::metrics::$instrument!($metric, $key => $value).set($amount);
    };
    ($instrument:ident, $metric:expr, $value:expr, $amount:expr) => {
        $crate::metrics::$instrument!($metric, "type" => $value).set($amount);
    };
    ($instrument:ident, $metric:expr, $value:expr) => {
        $crate::metrics::$instrument!($metric).set($value);
    };
}

/// Increments a metric value, optionally with a specified label.
#[macro_export]
macro_rules! inc {
    ($instrument:ident, $metric:expr, $key:expr, $value:expr) => {
        $crate::metrics::$instrument!($metric, $key => $value).increment(1);
    };
    ($instrument:ident, $metric:expr) => {
        $crate::metrics::$instrument!($metric).increment(1);
    };
}

/// Records a value, optionally with a specified label.
#[macro_export]
macro_rules! record {
    ($instrument:ident, $metric:expr, $key:expr, $value:expr, $amount:expr) => {
        $crate::metrics::$instrument!($metric, $key => $value).record($amount);
    };
    ($instrument:ident, $metric:expr, $amount:expr) => {
        $crate::metrics::$instrument!($metric).record($amount);
    };
}

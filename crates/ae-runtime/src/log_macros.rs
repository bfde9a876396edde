/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field so every event can be filtered by the
/// part of the engine it came from: `sys`, `eval`, `state` or `conf`.
///
/// ```ignore
/// ae_info!(sys, rules = 3, "rule tasks started");
/// ae_warn!(eval, rule = %key, error = %e, "evaluation failed");
/// ```
///
/// The domain is a bare identifier, not a string.

/// Internal helper. Use `ae_warn!` … `ae_trace!` instead.
#[doc(hidden)]
macro_rules! ae_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

/// Log at WARN level with an automatic `domain` field.
macro_rules! ae_warn {
    ($domain:ident, $($rest:tt)*) => {
        ae_log!(warn, $domain, $($rest)*)
    };
}

/// Log at INFO level with an automatic `domain` field.
macro_rules! ae_info {
    ($domain:ident, $($rest:tt)*) => {
        ae_log!(info, $domain, $($rest)*)
    };
}

/// Log at DEBUG level with an automatic `domain` field.
macro_rules! ae_debug {
    ($domain:ident, $($rest:tt)*) => {
        ae_log!(debug, $domain, $($rest)*)
    };
}

/// Log at TRACE level with an automatic `domain` field.
macro_rules! ae_trace {
    ($domain:ident, $($rest:tt)*) => {
        ae_log!(trace, $domain, $($rest)*)
    };
}

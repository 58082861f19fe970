//! ---
//! eds_section: "03-persistence-logging"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Structured logging adapters and sinks."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
//! Level-specific macros that stamp a [`LogContext`](crate::LogContext) onto events.

/// Emit an event at `$level` with the context fields attached.
#[doc(hidden)]
#[macro_export]
macro_rules! eds_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            protocol = ctx.protocol.unwrap_or(""),
            product = ctx.product.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            req_id = ctx.req_id.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with device context.
#[macro_export]
macro_rules! eds_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::eds_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::eds_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with device context.
#[macro_export]
macro_rules! eds_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::eds_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::eds_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with device context.
#[macro_export]
macro_rules! eds_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::eds_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::eds_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with device context.
#[macro_export]
macro_rules! eds_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::eds_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::eds_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}

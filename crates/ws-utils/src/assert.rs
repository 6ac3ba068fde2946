/// In debug builds, panics like `panic!`.
/// In release builds, logs an error via `tracing::error!` instead of aborting
/// the whole event loop over one misbehaving connection.
#[macro_export]
macro_rules! safe_panic {
    ($($arg:tt)*) => (if cfg!(debug_assertions) { panic!($($arg)*); } else {tracing::error!($($arg)*)})
}

/// In debug builds, panics on failure just like `debug_assert!`.
/// In release builds, logs an error via `tracing::error!`
/// prefixed with "ASSERT FAILED: " if the condition is false.
#[macro_export]
macro_rules! safe_assert {
    ($cond:expr $(,)?) => {
        #[cfg(debug_assertions)]
        {
            debug_assert!($cond);
        }
        #[cfg(not(debug_assertions))]
        {
            if !$cond {
                tracing::error!("ASSERT FAILED: {}", stringify!($cond));
            }
        }
    };

    ($cond:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            debug_assert!($cond, $($arg)+);
        }
        #[cfg(not(debug_assertions))]
        {
            if !$cond {
                let msg = format!($($arg)+);
                tracing::error!("ASSERT FAILED: {}", msg);
            }
        }
    };
}

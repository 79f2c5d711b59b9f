//! Log facade wrappers that are enabled by the `log` feature.

macro_rules! trace {
    ($($arg:tt)+) => {
        #[cfg(feature = "log")]
        log::trace!($($arg)+);
    };
}

macro_rules! info {
    ($($arg:tt)+) => {
        #[cfg(feature = "log")]
        log::info!($($arg)+);
    };
}

macro_rules! error {
    ($($arg:tt)+) => {
        #[cfg(feature = "log")]
        log::error!($($arg)+);
    };
}

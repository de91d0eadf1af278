//! Logging macros that tag every line with this process's identity.

use std::sync::OnceLock;

use env_logger::Env;

/// Identity of this process used as the log line tag, e.g. "v" for the view
/// server or a replica's server ID.
pub static ME: OnceLock<String> = OnceLock::new();

#[doc(hidden)]
#[macro_export]
macro_rules! pf_log {
    ($level:ident, $($fmt_args:tt)*) => {
        log::$level!(
            "({}) {}",
            $crate::ME.get().map_or("-", |me| me.as_str()),
            format!($($fmt_args)*)
        )
    };
}

#[macro_export]
macro_rules! pf_trace {
    ($($fmt_args:tt)*) => { $crate::pf_log!(trace, $($fmt_args)*) };
}

#[macro_export]
macro_rules! pf_debug {
    ($($fmt_args:tt)*) => { $crate::pf_log!(debug, $($fmt_args)*) };
}

#[macro_export]
macro_rules! pf_info {
    ($($fmt_args:tt)*) => { $crate::pf_log!(info, $($fmt_args)*) };
}

#[macro_export]
macro_rules! pf_warn {
    ($($fmt_args:tt)*) => { $crate::pf_log!(warn, $($fmt_args)*) };
}

#[macro_export]
macro_rules! pf_error {
    ($($fmt_args:tt)*) => { $crate::pf_log!(error, $($fmt_args)*) };
}

/// Installs the `env_logger` backend; `RUST_LOG` overrides the default
/// `info` filter. Later calls are no-ops.
pub fn logger_init() {
    let _ =
        env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .format_module_path(false)
            .format_target(false)
            .try_init();
}

/// Sets the log line tag. Only the first call takes effect.
pub fn set_me(me: impl ToString) {
    let _ = ME.set(me.to_string());
}

/// Logs the formatted message at ERROR level and evaluates to
/// `Err(ViewServError)` carrying the same message.
#[macro_export]
macro_rules! logged_err {
    ($($fmt_args:tt)*) => {{
        $crate::pf_error!($($fmt_args)*);
        Err($crate::ViewServError::msg(format!($($fmt_args)*)))
    }};
}

#[cfg(test)]
mod tests {
    use crate::utils::ViewServError;

    #[test]
    fn logged_err_carries_message() {
        super::set_me("t");
        let res: Result<(), ViewServError> =
            logged_err!("conn {} sent garbage", 7);
        assert_eq!(res, Err(ViewServError::msg("conn 7 sent garbage")));
    }
}

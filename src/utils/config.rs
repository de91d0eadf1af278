//! TOML-over-defaults config struct parsing.

/// Builds a `$config_type` from its `Default`, then overrides the listed
/// fields with values found in the optional TOML string. Keys that are not
/// listed are rejected.
///
/// ```
/// use viewserv::parsed_config;
///
/// #[derive(Default)]
/// struct BeatConfig {
///     interval_ms: u64,
///     retries: u8,
/// }
///
/// # fn main() -> Result<(), viewserv::ViewServError> {
/// let config =
///     parsed_config!(Some("retries = 3") => BeatConfig; interval_ms, retries)?;
/// assert_eq!((config.interval_ms, config.retries), (0, 3));
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        let compose_config = || -> Result<$config_type, $crate::ViewServError> {
            let mut config: $config_type = Default::default();
            let Some(config_str) = config_str else {
                return Ok(config);
            };

            let mut table = config_str.parse::<toml::Table>()?;
            $(
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            )+

            // leftovers are unknown keys
            match table.keys().next() {
                Some(key) => Err($crate::ViewServError::msg(format!(
                    "unknown config key '{}'",
                    key
                ))),
                None => Ok(config),
            }
        };

        compose_config()
    }};
}

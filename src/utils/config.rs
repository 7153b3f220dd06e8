//! Configuraiton parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(PaxlabError)` on parser failure.
///
/// Example:
/// ```ignore
/// let config = parsed_config!(config_str => MyConfig; batch_size, file_path)?;
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, $crate::PaxlabError> {
            let mut config: $config_type = Default::default();
            let config_str = match config_str {
                Some(s) => s,
                None => return Ok(config),
            };

            let mut table = config_str.parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if let Some(key) = table.keys().next() {
                return Err($crate::PaxlabError::msg(format!(
                    "invalid field name '{}' in config",
                    key,
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

#[cfg(test)]
mod config_tests {
    use crate::utils::PaxlabError;

    #[derive(Debug, PartialEq)]
    struct TestConfig {
        interval_ms: u64,
        name: String,
        drop_rate: f64,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            TestConfig {
                interval_ms: 100,
                name: "server0".into(),
                drop_rate: 0.25,
            }
        }
    }

    #[test]
    fn parse_from_none() -> Result<(), PaxlabError> {
        let config =
            parsed_config!(None => TestConfig; interval_ms, name, drop_rate)?;
        let ref_config: TestConfig = Default::default();
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), PaxlabError> {
        let config_str = Some("name = 'server2'\ndrop_rate = 0.5");
        let config =
            parsed_config!(config_str => TestConfig; name, drop_rate)?;
        let ref_config = TestConfig {
            interval_ms: 100,
            name: "server2".into(),
            drop_rate: 0.5,
        };
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_invalid_field() {
        let config_str = Some("xyz = 999");
        assert!(parsed_config!(config_str => TestConfig; interval_ms).is_err());
    }

    #[test]
    fn parse_wrong_type() {
        let config_str = Some("interval_ms = 'soon'");
        assert!(parsed_config!(config_str => TestConfig; interval_ms).is_err());
    }
}

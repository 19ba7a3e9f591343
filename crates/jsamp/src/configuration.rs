use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_PORT: u16 = 2857;
pub const DEFAULT_OUTPUT_PATH: &str = "jsamp.out";

/// Setting this variable disables the profiler...
pub const OPT_OUT_VARIABLE: &str = "NOJSAMPLER";
/// ...unless it still holds the unexpanded template placeholder.
pub const OPT_OUT_PLACEHOLDER: &str = "${nojsampler}";

#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    pub interval: Duration,
    pub port: u16,
    pub output_path: PathBuf,
    pub disabled: bool,
}

impl Configuration {
    /// Parses an activation string and applies the environment opt-out.
    pub fn from_activation(args: &str) -> Result<Self> {
        let mut configuration: Self = args.parse()?;
        configuration.disabled = opt_out_requested(env::var(OPT_OUT_VARIABLE).ok().as_deref());
        Ok(configuration)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            port: DEFAULT_PORT,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            disabled: false,
        }
    }
}

/// `<interval ms>;<port>;<output path>`
///
/// Everything after the second `;` is the output path.
impl FromStr for Configuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::Configuration {
            input: s.to_owned(),
            reason: reason.to_owned(),
        };

        let mut fields = s.splitn(3, ';');
        let interval = fields.next().unwrap_or_default();
        let port = fields.next().ok_or_else(|| invalid("missing port"))?;
        let output_path = fields.next().ok_or_else(|| invalid("missing output path"))?;

        let interval_ms: u64 = interval
            .parse()
            .map_err(|_| invalid("interval is not a positive integer"))?;
        if interval_ms == 0 {
            return Err(invalid("interval is not a positive integer"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| invalid("port is not an integer in 0-65535"))?;
        if output_path.is_empty() {
            return Err(invalid("output path is empty"));
        }

        Ok(Self {
            interval: Duration::from_millis(interval_ms),
            port,
            output_path: PathBuf::from(output_path),
            disabled: false,
        })
    }
}

/// Given the value of [`OPT_OUT_VARIABLE`], decides whether profiling is off.
pub fn opt_out_requested(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v != OPT_OUT_PLACEHOLDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_activation() {
        let configuration: Configuration = "50;9999;out.txt".parse().unwrap();
        assert_eq!(configuration.interval, Duration::from_millis(50));
        assert_eq!(configuration.port, 9999);
        assert_eq!(configuration.output_path, PathBuf::from("out.txt"));
        assert!(!configuration.disabled);
    }

    #[test]
    fn test_parse_keeps_semicolons_in_path() {
        let configuration: Configuration = "1;0;/tmp/a;b.out".parse().unwrap();
        assert_eq!(configuration.interval, Duration::from_millis(1));
        assert_eq!(configuration.port, 0);
        assert_eq!(configuration.output_path, PathBuf::from("/tmp/a;b.out"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "",
            "50",
            "50;9999",
            "50;9999;",
            "0;9999;out.txt",
            "-5;9999;out.txt",
            "fast;9999;out.txt",
            " 50;9999;out.txt",
            "50;65536;out.txt",
            "50;port;out.txt",
        ] {
            let result = input.parse::<Configuration>();
            assert!(
                matches!(result, Err(Error::Configuration { .. })),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_opt_out() {
        assert!(!opt_out_requested(None));
        assert!(!opt_out_requested(Some("${nojsampler}")));
        assert!(opt_out_requested(Some("1")));
        assert!(opt_out_requested(Some("")));
    }
}

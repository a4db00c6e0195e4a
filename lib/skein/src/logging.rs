pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

const TERMINAL_CONFIG: &str = r#"
type = "terminal"
level = "info"
destination = "stderr"
"#;

const VERBOSE_CONFIG: &str = r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#;

/// Builds the root logger for a process. Verbose mode lowers the level
/// threshold to debug.
pub fn init(verbose: bool) -> Logger {
    let toml = if verbose { VERBOSE_CONFIG } else { TERMINAL_CONFIG };
    let config: LoggerConfig = serdeconv::from_toml_str(toml).expect("Error parsing logger configuration");

    config.build_logger().expect("Error building logger")
}

/// A logger that swallows everything, for components constructed without one.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

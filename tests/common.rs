#![allow(dead_code)]

/// Shared constants for the CLI integration tests: `conveyor` needs a syntactically
/// valid configuration before `App::assemble` will even attempt to reach a database or
/// broker, so subcommands that only exercise argument parsing point `CONVEYOR_CONFIG`
/// at a file that does not exist rather than standing up real infrastructure.
pub const MISSING_CONFIG_PATH: &str = "/nonexistent/conveyor.toml";

use sim_telemetry::StreamError;

pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
pub const INPUT_ERROR: i32 = 2;

/// Bad configuration files are input errors, everything else failed while
/// running.
pub fn for_error(error: &StreamError) -> i32 {
    match error {
        StreamError::Io(_) | StreamError::Json(_) => INPUT_ERROR,
        e if e.is_config_error() => INPUT_ERROR,
        _ => EXECUTION_ERROR,
    }
}

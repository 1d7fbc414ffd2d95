pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Extra time the case runner waits on top of the case timeout before
/// giving up on the executor itself.
pub const TIMER_SLACK_MS: u64 = 50;

pub const TIME_LIMIT_MSG: &str = "time limit exceeded";

/// Bytes kept per output stream of a submission; writing more kills it.
pub const OUTPUT_LIMIT_BYTES: usize = 16 * 1024 * 1024;
pub const OUTPUT_LIMIT_MSG: &str = "output limit exceeded";

pub const CLIENT_CLOSED_STATUS: u16 = 499;
pub const CLIENT_CLOSED_MSG: &str = "client closed";

pub const DATASET_DIR: &str = "DataSet";
pub const EXPECTED_DIR: &str = ".Expected";
pub const CASE_FILE_PREFIX: &str = "datos";
pub const CASE_FILE_SUFFIX: &str = ".txt";
pub const EXPECTED_FILE_PREFIX: &str = "Output_";

pub const EVENT_STREAM_MIME: &str = "text/event-stream";
pub const EVENTS_CHANNEL_SIZE: usize = 128;

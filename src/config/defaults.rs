//! Built-in default values.
//!
//! Grouped by subsystem. `LocatorConfig::default()` is assembled from these.

// ============================================================================
// Sockets
// ============================================================================

/// Router listening socket (Reader → Router).
pub const ROUTER_SOCKET_PATH: &str = "/tmp/gsm_socket";

/// Display listening socket (Router → Display).
pub const DISPLAY_SOCKET_PATH: &str = "/tmp/display_socket";

// ============================================================================
// Modem
// ============================================================================

/// Serial device the GSM modem is attached to.
pub const MODEM_DEVICE: &str = "/dev/ttyS0";

/// Engineering mode on, neighbour cells reported.
pub const MODEM_INIT_COMMAND: &str = "AT+CENG=1,1\r";

/// Cell environment query.
pub const MODEM_POLL_COMMAND: &str = "AT+CENG?\r";

/// Wait for the first byte of a modem reply (seconds).
pub const MODEM_RESPONSE_TIMEOUT_SECS: u64 = 2;

/// Pause between poll cycles (seconds).
pub const MODEM_POLL_INTERVAL_SECS: u64 = 5;

/// Largest modem reply kept per poll (bytes).
pub const MODEM_MAX_RESPONSE_BYTES: usize = 2048;

/// Reader retry interval while the Router socket is unavailable (ms).
pub const ROUTER_CONNECT_RETRY_MS: u64 = 1_000;

// ============================================================================
// Tower database
// ============================================================================

/// OpenCellID export for MCC 250.
pub const TOWER_DB_PATH: &str = "250.csv";

// ============================================================================
// Display link
// ============================================================================

/// Connect attempts per reconnect cycle.
pub const LINK_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Pause between failed connect attempts (ms).
pub const LINK_RETRY_DELAY_MS: u64 = 1_000;

// ============================================================================
// Estimator
// ============================================================================

/// Attenuation at 1 m (dB).
pub const REFERENCE_ATTENUATION_DB: f64 = -40.0;

/// Log-distance path-loss exponent.
pub const PATH_LOSS_EXPONENT: f64 = 3.0;

// ============================================================================
// Display
// ============================================================================

/// JSON-lines file receiving per-batch results.
pub const LOCATION_LOG_PATH: &str = "location_log.txt";

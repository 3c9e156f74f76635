//! Application-wide constants
//!
//! Defaults for configuration and the fixed values of the shared-memory
//! layout and the session protocol. Grouped by purpose.

// =============================================================================
// SERVER DEFAULTS
// =============================================================================

/// Default listening address
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

/// Default listening port
pub const DEFAULT_SERVER_PORT: u16 = 9000;

// =============================================================================
// DATABASE DEFAULTS
// =============================================================================

/// Default data source the judge reads problems from
pub const DEFAULT_DATA_SOURCE: &str = "postgres://localhost:5432/trainer";

/// Default maximum connections held by the judge's pool
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Catalog listing the reference tables of each problem
pub const PROBLEM_TABLES_CATALOG: &str = "trainer_problem_tables";

/// Catalog listing the answer query of each problem
pub const PROBLEM_ANSWERS_CATALOG: &str = "trainer_problem_answers";

// =============================================================================
// SHARED MEMORY
// =============================================================================

/// Well-known name of the exchange segment
pub const DEFAULT_SHM_NAME: &str = "/TRAINER_SHM_KEY";

/// Default segment size (2 GiB)
pub const DEFAULT_SHM_SIZE: usize = 2 * 1024 * 1024 * 1024;

/// Bytes reserved at the tail of the segment for the result table (64 MiB)
pub const DEFAULT_SHM_RESULT_CAPACITY: usize = 64 * 1024 * 1024;

/// Segment layout identifiers
pub mod layout {
    /// Magic bytes at offset 0
    pub const MAGIC: &[u8; 4] = b"SQLJ";

    /// Layout version
    pub const VERSION: u32 = 1;

    /// Size of the fixed header
    pub const HEADER_SIZE: usize = 64;
}

// =============================================================================
// EXECUTION DEFAULTS
// =============================================================================

/// Default directory holding one solution per problem number
pub const DEFAULT_SOLUTIONS_PATH: &str = "/data/solutions";

/// Default wall-clock limit for one solution run
pub const DEFAULT_TIME_LIMIT_MS: u64 = 10_000;

/// Environment variables handed to solution processes
pub mod solution_env {
    pub const SHM_NAME: &str = "TRAINER_SHM_NAME";
    pub const PROBLEM_NUMBER: &str = "TRAINER_PROBLEM_NUMBER";
}

// =============================================================================
// SESSION PROTOCOL
// =============================================================================

/// Request opcodes
pub mod opcodes {
    pub const RUN: u8 = 0x01;
    pub const PREPARE: u8 = 0x02;
    pub const CHECK: u8 = 0x03;
}

/// Response frame kinds
pub mod frame_kinds {
    pub const VERDICT: u8 = 0x00;
    pub const FAILURE: u8 = 0x01;
    pub const ACK: u8 = 0x02;
}

/// Float tolerance used when comparing result tables
pub const FLOAT_TOLERANCE: f64 = 1e-9;

/// Longest verdict comment sent to a client, in bytes
pub const MAX_COMMENT_LEN: usize = 4096;

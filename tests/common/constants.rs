//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.
//! When test data changes (catalog IDs, file sizes, etc.),
//! update only this file.

// ============================================================================
// Test Catalog IDs
// ============================================================================

/// Track served in full with a known Content-Length
pub const TRACK_1_ID: &str = "1001";

/// Second regular track
pub const TRACK_2_ID: &str = "1002";

/// Third regular track
pub const TRACK_3_ID: &str = "1003";

/// Track whose stream is delivered in small delayed chunks
pub const CHUNKED_TRACK_ID: &str = "chunked-1";
pub const CHUNKED_TRACK_2_ID: &str = "chunked-2";

/// Tracks whose streams take far longer than any test
pub const SLOW_TRACK_1_ID: &str = "slow-1";
pub const SLOW_TRACK_2_ID: &str = "slow-2";

/// Track for which the resolver answers without a stream URL
pub const NO_URL_TRACK_ID: &str = "no-url";

// ============================================================================
// Test Catalog Metadata
// ============================================================================

pub const ARTIST_NAME: &str = "The Test Band";

pub const TRACK_1_TITLE: &str = "Opening Track";
pub const TRACK_2_TITLE: &str = "Middle Track";
pub const TRACK_3_TITLE: &str = "Closing Track";

/// Size of each regular track body
pub const TRACK_SIZE_BYTES: usize = 64 * 1024;

// ============================================================================
// Streaming Shapes
// ============================================================================

pub const CHUNK_SIZE_BYTES: usize = 8 * 1024;
pub const CHUNKED_TRACK_CHUNKS: usize = 8;
pub const CHUNK_DELAY_MS: u64 = 20;

pub const SLOW_TRACK_TOTAL_BYTES: usize = 1024 * 1024;
pub const SLOW_CHUNK_DELAY_MS: u64 = 200;

// ============================================================================
// Timing
// ============================================================================

/// Maximum time to wait for a mock server to accept requests
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Poll interval while waiting for a mock server
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Maximum time to wait for a queue condition
pub const QUEUE_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Remote sync interval used by delegated-mode tests
pub const TEST_SYNC_INTERVAL_MS: u64 = 50;

//! Read metrics.
//!
//! The constants defined in this module are the names of metrics that the
//! readers maintain via [`metrics`] crate interfaces.
use ::metrics::{describe_counter, describe_histogram, Unit};
use std::sync::Once;

/// Total number of successful block reads.
pub const READS_SUCCESS: &str = "cfile.reads_success";

/// Total number of failed block reads.
pub const READS_FAILED: &str = "cfile.reads_failed";

/// Total number of bytes successfully read.
pub const TOTAL_BYTES_READ: &str = "cfile.bytes_read";

/// Histogram of read latency.
pub const READ_LATENCY: &str = "cfile.read_latency";

/// Total number of blocks that failed checksum verification.
pub const CHECKSUM_FAILURES: &str = "cfile.checksum_failures";

/// Adds descriptions for the metrics we expose.  Idempotent.
pub fn describe_read_metrics() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        describe_counter!(READS_SUCCESS, "total number of block reads");
        describe_counter!(READS_FAILED, "total number of failed block reads");
        describe_counter!(
            TOTAL_BYTES_READ,
            Unit::Bytes,
            "total number of bytes read from files"
        );
        describe_histogram!(READ_LATENCY, Unit::Seconds, "Read request latency");
        describe_counter!(
            CHECKSUM_FAILURES,
            "total number of blocks with a bad checksum"
        );
    });
}

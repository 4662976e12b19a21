/// Delivery counters for debugging a capture session.
///
/// Counters accumulate across runs for the lifetime of the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryDiagnostics {
    pub runs_started: u64,
    /// Chunks copied off the capture thread and queued for the consumer.
    pub chunks_marshaled: u64,
    pub data_broadcasts: u64,
    pub finished_broadcasts: u64,
    pub listener_failures: u64,
    /// Data chunks that arrived after the run's terminal chunk.
    pub late_chunks_dropped: u64,
}

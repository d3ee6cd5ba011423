#[derive(Debug)]
pub struct TransportConfig {
    /// upper bound on the number of aggregated ack entries piggybacked onto a single
    ///  outgoing frame
    pub max_ack_entries_per_frame: u8,

    /// Seed the reliable broadcast counter from a random number instead of starting at
    ///  zero, making sequence numbers unpredictable across restarts.
    pub randomize_initial_sequence_number: bool,
}

impl TransportConfig {
    pub fn new() -> TransportConfig {
        TransportConfig {
            max_ack_entries_per_frame: 16,
            randomize_initial_sequence_number: false,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

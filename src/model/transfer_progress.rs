/// Byte-level progress of a single file transfer, reported by backend clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Fraction of the file sent, in percent
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_sent as f64 / self.total_bytes as f64 * 100.0).clamp(0.0, 100.0)
    }
}

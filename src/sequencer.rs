/// Result of comparing an observed sequence number against an expected one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SequenceStatus {
    /// The observed value is exactly the expected one.
    InOrder,
    /// The observed value is ahead of the expected one, but within the window.
    Future,
    /// The observed value is behind the expected one (duplicate or superseded).
    Past,
}

/// Classifies 16-bit wrapping sequence numbers against an expected value using
/// a sliding window.
///
/// The window size is threaded in at construction rather than read from any
/// shared configuration.
#[derive(Copy, Clone, Debug)]
pub struct Sequencer {
    window_size: u16,
}

impl Sequencer {
    pub fn new(window_size: u16) -> Self {
        Self { window_size }
    }

    pub fn window_size(&self) -> u16 {
        self.window_size
    }

    /// Three-way classification of `observed` against `expected`.
    ///
    /// Exact equality always wins over the future/past heuristic, so the
    /// window boundary is never ambiguous.
    pub fn classify(&self, expected: u16, observed: u16) -> SequenceStatus {
        if observed == expected {
            return SequenceStatus::InOrder;
        }
        let ahead = observed.wrapping_sub(expected);
        if ahead < self.window_size {
            SequenceStatus::Future
        } else {
            SequenceStatus::Past
        }
    }
}

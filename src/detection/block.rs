// Voltage block assembly with carry-over tail
//
// A block is the carry-over tail kept from the previous cycle followed by the
// samples drained this cycle. After detection the block shrinks back to its
// last `carry_over_length` samples. Indices inside the block are mapped to
// absolute sample indices through `start_index`.

#[derive(Debug, Clone, Default)]
pub struct VoltageBlock {
    samples: Vec<f64>,
    /// Leading samples already scanned in a previous cycle
    carry_len: usize,
    /// Absolute sample index of `samples[0]`
    start_index: u64,
}

impl VoltageBlock {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            carry_len: 0,
            start_index: 0,
        }
    }

    /// Buffer the drain appends fresh samples to
    pub fn intake(&mut self) -> &mut Vec<f64> {
        &mut self.samples
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Samples not yet seen by a previous cycle
    pub fn fresh(&self) -> &[f64] {
        &self.samples[self.carry_len.min(self.samples.len())..]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn carry_len(&self) -> usize {
        self.carry_len
    }

    pub fn has_fresh(&self) -> bool {
        self.samples.len() > self.carry_len
    }

    /// Absolute index of a block-relative sample
    pub fn absolute_index(&self, offset: usize) -> u64 {
        self.start_index + offset as u64
    }

    /// Keep only the trailing `carry_over_length` samples for the next cycle
    pub fn retain_tail(&mut self, carry_over_length: usize) {
        let excess = self.samples.len().saturating_sub(carry_over_length);
        if excess > 0 {
            self.samples.drain(..excess);
            self.start_index += excess as u64;
        }
        self.carry_len = self.samples.len();
    }

    /// Restart after `missing` samples never reached the block
    ///
    /// Everything held is discarded since it cannot be joined to what follows
    /// the gap; the next drained sample gets the correct absolute index.
    pub fn skip_gap(&mut self, missing: u64) {
        self.start_index += self.samples.len() as u64 + missing;
        self.samples.clear();
        self.carry_len = 0;
    }

    /// Drop the tail entirely, e.g. after the carry-over length changed
    pub fn discard_tail(&mut self) {
        let tail = self.carry_len.min(self.samples.len());
        self.samples.drain(..tail);
        self.start_index += tail as u64;
        self.carry_len = 0;
    }
}

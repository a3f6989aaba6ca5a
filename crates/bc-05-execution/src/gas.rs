//! # Gas Meter
//!
//! Tracks consumption against a transaction's gas limit, plus the refund
//! counter contracts may accrue. All arithmetic is overflow-safe:
//! `consume(n)` fails with out-of-gas exactly when `n` exceeds what remains,
//! and refund accrual saturates rather than wraps.

use crate::errors::ExecutionError;

/// Per-transaction gas accounting.
#[derive(Clone, Debug)]
pub struct GasMeter {
    limit: u64,
    used: u64,
    refund: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: 0,
            refund: 0,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    pub fn gas_used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Charge `n` gas. Fails iff `n > remaining`.
    pub fn consume(&mut self, n: u64) -> Result<(), ExecutionError> {
        if n > self.remaining() {
            return Err(ExecutionError::OutOfGas {
                needed: n,
                remaining: self.remaining(),
            });
        }
        self.used += n;
        Ok(())
    }

    /// Exhaust the meter (out-of-gas terminations charge everything).
    pub fn consume_all(&mut self) {
        self.used = self.limit;
    }

    /// Accrue a refund; saturates on overflow.
    pub fn add_refund(&mut self, n: u64) {
        self.refund = self.refund.saturating_add(n);
    }

    pub fn refund(&self) -> u64 {
        self.refund
    }

    /// Gas billed after refunds: `used − min(refund, used / 2)`.
    pub fn effective_gas_used(&self) -> u64 {
        self.used - self.refund.min(self.used / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_within_limit() {
        let mut meter = GasMeter::new(100);
        meter.consume(60).unwrap();
        assert_eq!(meter.remaining(), 40);
        meter.consume(40).unwrap();
        assert_eq!(meter.remaining(), 0);
    }

    #[test]
    fn consume_past_limit_fails() {
        let mut meter = GasMeter::new(100);
        meter.consume(100).unwrap();
        assert!(matches!(
            meter.consume(1),
            Err(ExecutionError::OutOfGas { needed: 1, remaining: 0 })
        ));
    }

    #[test]
    fn exact_boundary_succeeds() {
        let mut meter = GasMeter::new(21_000);
        meter.consume(21_000).unwrap();
        assert_eq!(meter.gas_used(), 21_000);
    }

    #[test]
    fn refund_capped_at_half() {
        let mut meter = GasMeter::new(100_000);
        meter.consume(60_000).unwrap();
        meter.add_refund(50_000);
        // Cap: 60_000 / 2 = 30_000.
        assert_eq!(meter.effective_gas_used(), 30_000);

        let mut meter = GasMeter::new(100_000);
        meter.consume(60_000).unwrap();
        meter.add_refund(10_000);
        assert_eq!(meter.effective_gas_used(), 50_000);
    }

    #[test]
    fn refund_saturates() {
        let mut meter = GasMeter::new(10);
        meter.add_refund(u64::MAX);
        meter.add_refund(u64::MAX);
        assert_eq!(meter.refund(), u64::MAX);
    }
}

use std::collections::HashSet;

/// Consistent read snapshot
///
/// Captures the transactions that were active when it was taken,
/// used to decide which record versions a reader may observe.
#[derive(Debug, Clone)]
pub struct ReadView {
    /// Transaction that owns the view; its own writes are always visible
    pub creator: u64,

    /// Oldest active transaction id when the view was taken
    /// Transactions with ID < xmin are guaranteed committed
    pub xmin: u64,

    /// Next transaction id when the view was taken
    /// Transactions with ID >= xmax are invisible to this view
    pub xmax: u64,

    /// Active (uncommitted) transactions at view creation, creator excluded
    pub active: HashSet<u64>,
}

impl ReadView {
    #[must_use]
    pub fn new(creator: u64, active: HashSet<u64>, xmax: u64) -> Self {
        let xmin = active.iter().min().copied().unwrap_or(xmax);
        Self { creator, xmin, xmax, active }
    }

    /// Is a version written by `trx_id` visible to this view?
    #[must_use]
    pub fn sees(&self, trx_id: u64) -> bool {
        if trx_id == self.creator || trx_id < self.xmin {
            return true;
        }
        if trx_id >= self.xmax {
            return false;
        }
        !self.active.contains(&trx_id)
    }
}

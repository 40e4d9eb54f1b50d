// Transaction module - MVCC read views, undo log and lock manager

mod read_view;
mod undo;
mod lock;
mod manager;

pub use read_view::ReadView;
pub use undo::{UndoLog, UndoRecord, UndoType};
pub use lock::{LockMode, LockSys, LockTarget};
pub use manager::{Transaction, TrxState, TrxSys, WaitMode};

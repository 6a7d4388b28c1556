pub mod frame;
pub mod frame_ledger;

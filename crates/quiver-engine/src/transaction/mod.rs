//! Transaction management.
//!
//! Quiver runs every transaction under snapshot isolation: a transaction
//! reads the state as of the epoch that was current when it began, buffers
//! its writes as pending versions, and at commit is validated
//! first-committer-wins against everything committed since its start.
//!
//! | Anomaly | Prevented |
//! | ------- | --------- |
//! | Dirty read | yes |
//! | Non-repeatable read | yes |
//! | Phantom | yes |
//! | Lost update | yes |
//! | Write skew on disjoint keys | no |

mod manager;
mod read;

pub use manager::{TransactionManager, TxState, TxStats};
pub use read::ReadTransaction;

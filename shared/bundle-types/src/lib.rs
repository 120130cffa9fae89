//! Shared operation model and ledger snapshot for the bundle planner.
//!
//! Kept separate from the planner so callers that only build scenarios or fetch
//! state do not pull in ABI bindings.

pub mod assets;
pub mod ledger;
pub mod operations;

pub use assets::{PermitSupport, TokenInfo, WrapperInfo, WrapperKind, NATIVE};
pub use ledger::{apply, BlockInfo, LedgerError, LedgerSnapshot, ReplayError};
pub use operations::{
    Amount, Approval, AuctionParams, BlockLeaf, CallAction, CalldataOffsets, DeclarativeOperation,
    Flow, OperationKind, PermitGrant, PrimitiveOperation, SwapQuote, TargetCall, TransferStep,
};

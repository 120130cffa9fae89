use std::fmt;

use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use serde::{Deserialize, Serialize};

/// Quantity requested by a declarative operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amount {
    Exact(U256),
    /// Everything the sender holds when the operation is reached.
    Max,
}

impl Amount {
    pub fn resolve(self, available: U256) -> U256 {
        match self {
            Amount::Exact(amount) => amount,
            Amount::Max => available,
        }
    }

    pub fn is_max(self) -> bool {
        matches!(self, Amount::Max)
    }
}

impl From<U256> for Amount {
    fn from(amount: U256) -> Self {
        Amount::Exact(amount)
    }
}

/// Byte offsets of the amount words inside an aggregator calldata blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalldataOffsets {
    pub exact_amount: u64,
    pub limit_amount: u64,
    pub quoted_amount: u64,
}

/// Aggregator quote backing an exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub src_asset: Address,
    pub dst_asset: Address,
    /// Input amount the calldata was built for.
    pub src_amount: U256,
    /// Output floor enforced by the router.
    pub min_dst_amount: U256,
    /// Output the aggregator expects to deliver.
    pub quoted_dst_amount: U256,
    /// Aggregator entry point.
    pub router: Address,
    /// Contract pulling the input asset.
    pub spender: Address,
    /// Account credited with the output.
    pub receiver: Address,
    pub calldata: Bytes,
    #[serde(default)]
    pub offsets: Option<CalldataOffsets>,
}

/// Light client leaf the auction is anchored to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLeaf {
    pub block_hash: FixedBytes<32>,
    pub height: u32,
    pub cumulative_chainwork: U256,
}

/// Parameters of a Dutch auction selling the deposited asset for BTC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionParams {
    pub start_rate: U256,
    pub end_rate: U256,
    pub decay_blocks: u64,
    pub deadline: u64,
    pub filler_whitelist: Address,
    pub owner: Address,
    pub bitcoin_script_pub_key: Bytes,
    pub salt: FixedBytes<32>,
    pub confirmation_blocks: u8,
    pub safe_block_leaf: BlockLeaf,
}

/// User-intent level action, before dependency resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeclarativeOperation {
    /// Pull `asset` from the sender into the bundler adapter.
    TransferIn {
        sender: Address,
        asset: Address,
        amount: Amount,
    },
    /// Send `asset` held by the sender to `receiver`.
    TransferOut {
        sender: Address,
        asset: Address,
        amount: Amount,
        receiver: Address,
    },
    /// Sell `amount` of the quote's input asset.
    Exchange {
        sender: Address,
        amount: Amount,
        quote: SwapQuote,
    },
    /// Wrap the underlying of `asset` into `asset`. The amount is in underlying units.
    Wrap {
        sender: Address,
        asset: Address,
        amount: Amount,
    },
    /// Unwrap `asset` into its underlying, delivered to `receiver`.
    Unwrap {
        sender: Address,
        asset: Address,
        amount: Amount,
        receiver: Address,
    },
    /// Submit a permit signature the wallet already produced.
    Authorize {
        sender: Address,
        asset: Address,
        spender: Address,
        amount: U256,
        deadline: U256,
        signature: Bytes,
    },
    /// Deposit `asset` into the auction adapter and open an auction.
    CreateAuction {
        sender: Address,
        asset: Address,
        amount: Amount,
        params: AuctionParams,
    },
}

impl DeclarativeOperation {
    pub fn sender(&self) -> Address {
        match self {
            DeclarativeOperation::TransferIn { sender, .. }
            | DeclarativeOperation::TransferOut { sender, .. }
            | DeclarativeOperation::Exchange { sender, .. }
            | DeclarativeOperation::Wrap { sender, .. }
            | DeclarativeOperation::Unwrap { sender, .. }
            | DeclarativeOperation::Authorize { sender, .. }
            | DeclarativeOperation::CreateAuction { sender, .. } => *sender,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeclarativeOperation::TransferIn { .. } => "transfer_in",
            DeclarativeOperation::TransferOut { .. } => "transfer_out",
            DeclarativeOperation::Exchange { .. } => "exchange",
            DeclarativeOperation::Wrap { .. } => "wrap",
            DeclarativeOperation::Unwrap { .. } => "unwrap",
            DeclarativeOperation::Authorize { .. } => "authorize",
            DeclarativeOperation::CreateAuction { .. } => "create_auction",
        }
    }
}

/// On-chain `approve` from `owner` to `spender`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub owner: Address,
    pub asset: Address,
    pub spender: Address,
    pub amount: U256,
    /// The token accepts an EIP-2612 signature in place of this call.
    pub signable: bool,
}

/// EIP-2612 `permit` carrying an already collected signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitGrant {
    pub owner: Address,
    pub asset: Address,
    pub spender: Address,
    pub amount: U256,
    pub nonce: U256,
    pub deadline: U256,
    /// r || s || v
    pub signature: Bytes,
}

/// Single balance movement.
///
/// `spender` is set when the movement is executed on behalf of `from`
/// and consumes `from`'s allowance towards it. `sweep` marks a skim that
/// moves whatever `from` holds at execution time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStep {
    pub asset: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    #[serde(default)]
    pub spender: Option<Address>,
    #[serde(default)]
    pub sweep: bool,
}

/// Balance effect of a contract call. `None` endpoints leave or enter the
/// tracked ledger (burns, mints, escrow, swap venues).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub asset: Address,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub amount: U256,
    #[serde(default)]
    pub spender: Option<Address>,
}

impl Flow {
    pub fn debit(asset: Address, from: Address, amount: U256) -> Self {
        Self {
            asset,
            from: Some(from),
            to: None,
            amount,
            spender: None,
        }
    }

    pub fn credit(asset: Address, to: Address, amount: U256) -> Self {
        Self {
            asset,
            from: None,
            to: Some(to),
            amount,
            spender: None,
        }
    }

    pub fn spent_by(mut self, spender: Address) -> Self {
        self.spender = Some(spender);
        self
    }
}

/// Encodable intent of a contract call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CallAction {
    /// Raw aggregator call issued by the sender.
    Exchange { calldata: Bytes },
    /// Sell through the exchange adapter, which holds the input.
    ParaswapSell {
        augustus: Address,
        calldata: Bytes,
        src_asset: Address,
        dst_asset: Address,
        sell_entire_balance: bool,
        offsets: CalldataOffsets,
        receiver: Address,
    },
    WrapNative {
        amount: U256,
        receiver: Address,
    },
    UnwrapNative {
        amount: U256,
        min_output: U256,
        receiver: Address,
    },
    VaultDeposit {
        vault: Address,
        assets: U256,
        max_share_price_e27: U256,
        receiver: Address,
    },
    VaultRedeem {
        vault: Address,
        shares: U256,
        min_output: U256,
        receiver: Address,
        owner: Address,
    },
    CreateAuction { params: AuctionParams },
}

impl CallAction {
    pub fn name(&self) -> &'static str {
        match self {
            CallAction::Exchange { .. } => "exchange",
            CallAction::ParaswapSell { .. } => "paraswap_sell",
            CallAction::WrapNative { .. } => "wrap_native",
            CallAction::UnwrapNative { .. } => "unwrap_native",
            CallAction::VaultDeposit { .. } => "vault_deposit",
            CallAction::VaultRedeem { .. } => "vault_redeem",
            CallAction::CreateAuction { .. } => "create_auction",
        }
    }
}

/// Call to `target` made in the sender's execution context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCall {
    pub sender: Address,
    pub target: Address,
    pub value: U256,
    pub action: CallAction,
    pub flows: Vec<Flow>,
}

/// Fully concrete, directly encodable action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrimitiveOperation {
    Approve(Approval),
    Permit(PermitGrant),
    Transfer(TransferStep),
    Call(TargetCall),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Approve,
    Permit,
    Transfer,
    Call,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Approve => "approve",
            OperationKind::Permit => "permit",
            OperationKind::Transfer => "transfer",
            OperationKind::Call => "call",
        };
        f.write_str(name)
    }
}

impl PrimitiveOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            PrimitiveOperation::Approve(_) => OperationKind::Approve,
            PrimitiveOperation::Permit(_) => OperationKind::Permit,
            PrimitiveOperation::Transfer(_) => OperationKind::Transfer,
            PrimitiveOperation::Call(_) => OperationKind::Call,
        }
    }

    /// Every asset whose balance or allowance this operation reads or writes.
    pub fn assets(&self) -> Vec<Address> {
        match self {
            PrimitiveOperation::Approve(approval) => vec![approval.asset],
            PrimitiveOperation::Permit(permit) => vec![permit.asset],
            PrimitiveOperation::Transfer(step) => vec![step.asset],
            PrimitiveOperation::Call(call) => call.flows.iter().map(|flow| flow.asset).collect(),
        }
    }
}

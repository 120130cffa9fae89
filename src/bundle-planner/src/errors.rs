use alloy_primitives::{Address, U256};
use bundle_types::{LedgerError, OperationKind};
use thiserror::Error;

/// Why a prerequisite could not be synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyIssue {
    /// The network has no exchange adapter deployed.
    MissingExchangeAdapter,
    /// The network has no auction adapter deployed.
    MissingAuctionAdapter,
    /// The asset carries no wrapper metadata.
    NotWrapped { asset: Address },
    /// The token only grants allowances by signature and signatures are disabled.
    PermitRequired { asset: Address },
    /// The native asset has no allowance to grant.
    NativeAllowance,
    /// The adapter cannot initiate this operation.
    AdapterSender,
    /// The quote's calldata cannot be re-sized to the requested amount.
    QuoteNotResizable,
    /// The quote does not sell the asset it is applied to, or sells nothing.
    InvalidQuote,
}

impl std::fmt::Display for DependencyIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyIssue::MissingExchangeAdapter => f.write_str("no exchange adapter on this network"),
            DependencyIssue::MissingAuctionAdapter => f.write_str("no auction adapter on this network"),
            DependencyIssue::NotWrapped { asset } => write!(f, "{asset} is not a wrapped asset"),
            DependencyIssue::PermitRequired { asset } => {
                write!(f, "{asset} requires a permit signature")
            }
            DependencyIssue::NativeAllowance => f.write_str("native asset has no allowance"),
            DependencyIssue::AdapterSender => f.write_str("operation cannot be initiated by the adapter"),
            DependencyIssue::QuoteNotResizable => f.write_str("quote calldata cannot be re-sized"),
            DependencyIssue::InvalidQuote => f.write_str("quote does not match the operation"),
        }
    }
}

/// Why a primitive has no low-level encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingIssue {
    /// Transfer shape with no matching entry point.
    UnsupportedTransfer,
    /// Permit signature is not 65 bytes.
    MalformedSignature { len: usize },
    /// Signatures supplied do not match the pending authorizations.
    SignatureCount { expected: usize, got: usize },
    /// Approvals cannot target the native asset.
    NativeApproval,
    /// Permit nonce is out of step with the permits ahead of it in the bundle.
    NonceMismatch { expected: U256, got: U256 },
    /// Signable approval on a token without metadata.
    MissingTokenMetadata { asset: Address },
    /// Deadline or share price arithmetic overflowed.
    Overflow,
}

impl std::fmt::Display for EncodingIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingIssue::UnsupportedTransfer => f.write_str("transfer shape has no encoding"),
            EncodingIssue::MalformedSignature { len } => {
                write!(f, "signature is {len} bytes, expected 65")
            }
            EncodingIssue::SignatureCount { expected, got } => {
                write!(f, "{got} signatures for {expected} authorizations")
            }
            EncodingIssue::NativeApproval => f.write_str("native asset cannot be approved"),
            EncodingIssue::NonceMismatch { expected, got } => {
                write!(f, "permit nonce {got}, expected {expected}")
            }
            EncodingIssue::MissingTokenMetadata { asset } => {
                write!(f, "no token metadata for {asset}")
            }
            EncodingIssue::Overflow => f.write_str("encoded amount overflows"),
        }
    }
}

/// Errors aborting a bundle build. `index` is the declarative operation at fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleError {
    #[error("operation {index}: insufficient {asset}, required {required}, available {available}")]
    InsufficientBalance {
        index: usize,
        asset: Address,
        required: U256,
        available: U256,
    },
    #[error("operation {index}: insufficient allowance of {asset}, required {required}, available {available}")]
    InsufficientAllowance {
        index: usize,
        asset: Address,
        required: U256,
        available: U256,
    },
    #[error("operation {index}: unresolvable dependency: {reason}")]
    UnresolvableDependency { index: usize, reason: DependencyIssue },
    #[error("unwrap of {asset} yields {received}, below floor {floor}")]
    SlippageExceeded {
        asset: Address,
        floor: U256,
        received: U256,
    },
    #[error("cannot encode {kind} at position {position}: {reason}")]
    Encoding {
        position: usize,
        kind: OperationKind,
        reason: EncodingIssue,
    },
    #[error("no bundler addresses for chain {0}")]
    UnknownNetwork(u64),
    #[error("slippage {0} exceeds 1e18")]
    InvalidSlippage(U256),
    #[error("operation {index}: amount overflow")]
    Overflow { index: usize },
    #[error("primitive {position} does not replay: {source}")]
    Replay {
        position: usize,
        #[source]
        source: LedgerError,
    },
}

impl BundleError {
    pub(crate) fn from_ledger(index: usize, err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                asset,
                required,
                available,
                ..
            } => BundleError::InsufficientBalance {
                index,
                asset,
                required,
                available,
            },
            LedgerError::InsufficientAllowance {
                asset,
                required,
                available,
                ..
            } => BundleError::InsufficientAllowance {
                index,
                asset,
                required,
                available,
            },
            LedgerError::Overflow { .. } => BundleError::Overflow { index },
        }
    }

    pub(crate) fn unresolvable(index: usize, reason: DependencyIssue) -> Self {
        BundleError::UnresolvableDependency { index, reason }
    }
}

//! Operation bundle planner.
//!
//! Turns declarative operations into one ordered, atomically executed list of
//! calls against a simulated ledger:
//!
//! - [`populate_bundle`] resolves `Max` amounts and inserts approvals, wraps and
//!   transfers each operation depends on;
//! - [`finalize_bundle`] unwraps and skims whatever the adapter still holds;
//! - [`encode_bundle`] serializes the primitives into calldata, swapping signable
//!   approvals for permit requests.
//!
//! All three are pure; [`setup_bundle`] chains them.

pub mod abi;
pub mod bytes;
pub mod config;
pub mod constants;
pub mod encoder;
pub mod errors;
pub mod finalize;
pub mod math;
pub mod options;
pub mod permit;
pub mod populate;
pub mod types;


use alloy_primitives::Address;
use bundle_types::{DeclarativeOperation, LedgerSnapshot};
use tracing::info;

pub use config::{BundlerAddresses, NetworkRegistry, RegistryError};
pub use encoder::encode_bundle;
pub use errors::{BundleError, DependencyIssue, EncodingIssue};
pub use finalize::{finalize_bundle, FinalizedBundle, UnwrapCheck};
pub use options::BundlingOptions;
pub use populate::{populate_bundle, resize_quote, PopulatedBundle, Provenance, StepRole};
pub use types::{BundleCall, BundleOutput, EncodedBundle, PermitRequest};

/// Populates, finalizes and encodes `operations` for `snapshot`'s chain.
///
/// Leftovers in the adapter are returned to `receiver`.
#[tracing::instrument(
    skip_all,
    fields(chain_id = snapshot.chain_id(), operations = operations.len(), receiver = %receiver)
)]
pub fn setup_bundle(
    operations: &[DeclarativeOperation],
    snapshot: &LedgerSnapshot,
    receiver: Address,
    registry: &NetworkRegistry,
    options: &BundlingOptions,
) -> Result<BundleOutput, BundleError> {
    options.validate()?;
    let addresses = registry.addresses(snapshot.chain_id())?;

    let populated = populate_bundle(operations, snapshot, addresses, options)?;
    let finalized = finalize_bundle(
        populated.operations,
        snapshot,
        addresses,
        receiver,
        &options.unwrap_tokens,
        options.unwrap_slippage,
    )?;
    let bundle = encode_bundle(&finalized.operations, snapshot, addresses, options.supports_signature)?;

    info!(
        primitives = finalized.operations.len(),
        calls = bundle.calls.len(),
        authorizations = bundle.authorizations.len(),
        "bundle ready"
    );

    Ok(BundleOutput {
        operations: finalized.operations,
        bundle,
    })
}

//! Solidity ABI bindings for every contract a bundle calls into.
//!
//! Only the entry points the encoder emits are declared.

use alloy_sol_types::sol;

sol! {
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function transfer(address to, uint256 amount) external returns (bool);
    }

    interface IERC20Permit {
        function permit(
            address owner,
            address spender,
            uint256 value,
            uint256 deadline,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }

    interface IWrappedNative {
        function deposit() external payable;
        function withdraw(uint256 amount) external;
    }

    interface IERC4626 {
        function deposit(uint256 assets, address receiver) external returns (uint256 shares);
        function redeem(uint256 shares, address receiver, address owner) external returns (uint256 assets);
    }

    /// Core bundler adapter: moves funds in and out and wraps on behalf of the initiator.
    interface IGeneralAdapter1 {
        function erc20Transfer(address token, address receiver, uint256 amount) external;
        function erc20TransferFrom(address token, address receiver, uint256 amount) external;
        function nativeTransfer(address receiver, uint256 amount) external;
        function wrapNative(uint256 amount, address receiver) external;
        function unwrapNative(uint256 amount, address receiver) external;
        function erc4626Deposit(address vault, uint256 assets, uint256 maxSharePriceE27, address receiver) external;
        function erc4626Redeem(
            address vault,
            uint256 shares,
            uint256 minSharePriceE27,
            address receiver,
            address owner
        ) external;
    }

    struct Offsets {
        uint256 exactAmount;
        uint256 limitAmount;
        uint256 quotedAmount;
    }

    interface IParaswapAdapter {
        function sell(
            address augustus,
            bytes callData,
            address srcToken,
            address destToken,
            bool sellEntireBalance,
            Offsets offsets,
            address receiver
        ) external;
    }

    struct BlockLeaf {
        bytes32 blockHash;
        uint32 height;
        uint256 cumulativeChainwork;
    }

    struct BaseCreateOrderParams {
        address owner;
        bytes bitcoinScriptPubKey;
        bytes32 salt;
        uint8 confirmationBlocks;
        BlockLeaf safeBlockLeaf;
    }

    interface IRiftAuctionAdaptor {
        function createAuction(
            uint256 startsBTCperBTCRate,
            uint256 endcbsBTCperBTCRate,
            uint64 decayBlocks,
            uint64 deadline,
            address fillerWhitelistContract,
            BaseCreateOrderParams baseParams
        ) external;
    }
}

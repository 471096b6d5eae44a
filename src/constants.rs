//! Protocol constants used when building and checking transaction templates

/// Maximum money supply: 21,000,000 BTC in satoshis
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Satoshis per BTC
pub const SATOSHIS_PER_BTC: u64 = 100_000_000;

/// Version stamped on every materialized transaction (BIP68 needs >= 2)
pub const TX_VERSION: u32 = 2;

/// Maximum script length
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum size of a single pushed element, and so of a P2SH redeem script
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Maximum stack size during script execution (main + alt)
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of non-push operations in a script
pub const MAX_SCRIPT_OPS: usize = 201;

/// Maximum number of public keys in CHECKMULTISIG
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Maximum payload of a standard null-data output
pub const MAX_OP_RETURN_DATA: usize = 80;

/// Lock time threshold: lock times below this are block heights
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Sequence number that keeps an absolute lock time enforceable
pub const SEQUENCE_LOCKTIME_ENABLED: u32 = 0xfffffffe;

/// BIP68: relative lock time is disabled when this bit is set
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;

/// BIP68: relative lock time is time based (512s units) when this bit is set
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;

/// BIP68: bits carrying the relative lock time value
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000ffff;

/// Index used by the null outpoint of a coinbase input
pub const COINBASE_INDEX: u32 = 0xffffffff;

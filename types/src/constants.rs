/// Fixed notional starting balance for every game, in USD.
pub const STARTING_BALANCE_USD: f64 = 10_000_000.0;

/// Total allocation blocks a portfolio distributes. Each block is 10% of the
/// starting balance.
pub const TOTAL_ALLOCATION_BLOCKS: u8 = 10;

/// Supported game durations in days.
pub const SUPPORTED_DURATIONS_DAYS: [u32; 3] = [30, 60, 90];

/// Length of a shareable game code.
pub const GAME_CODE_LENGTH: usize = 4;

/// Alphabet for game codes. Codes are typed between humans, so the
/// easily-confused characters (I, L, O, 0, 1) are excluded. Lookup is still
/// exact and case-sensitive.
pub const GAME_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Attempts to sample an unused game code before giving up.
pub const DEFAULT_CODE_ATTEMPTS: u32 = 10;

/// One day in milliseconds.
pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Default interval between settlement runs, in seconds.
pub const DEFAULT_SETTLEMENT_INTERVAL_SECS: u64 = 60 * 60;

/// Value-history rows are appended every N-th settlement run.
pub const DEFAULT_HISTORY_SAMPLE_EVERY: u32 = 4;

/// A settlement run with no finish mark older than this is considered
/// abandoned and its lock is reclaimed.
pub const SETTLEMENT_LEASE_STALE_MS: u64 = 10 * 60 * 1000;

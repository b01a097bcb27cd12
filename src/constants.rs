// Grid defaults - single source of truth for placement and clamping
pub const GRID_COLUMNS: u32 = 12;
pub const PLACEMENT_STEP: u32 = 2;
pub const DEFAULT_TAB_TITLE: &str = "Main";
pub const MAX_TAB_TITLE_GRAPHEMES: usize = 64;

// Sync scheduler defaults
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const TICK_INTERVAL_MS: u32 = 250;

// Canvas: how many ticks an unexplained empty list is held before it is accepted
pub const RACE_RECHECK_LIMIT: u32 = 3;

// Local device cache
pub const CACHE_PREFIX: &str = "gzc-intel:";
pub const DEFAULT_MAX_LAYOUT_BACKUPS: usize = 5;
pub const DEFAULT_THEME: &str = "gzc-dark";
pub const DEFAULT_LOG_LEVEL: &str = "info";

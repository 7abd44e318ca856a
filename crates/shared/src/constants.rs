pub const APP_NAME: &str = "Taskchat";

// Limits
pub const MAX_MESSAGE_LENGTH: usize = 4000;
pub const MAX_GROUP_NAME_LENGTH: usize = 100;
pub const MAX_GROUP_DESCRIPTION_LENGTH: usize = 500;
pub const MAX_REACTION_TYPE_LENGTH: usize = 32;
pub const MAX_FILE_KEY_LENGTH: usize = 512;

pub const MESSAGE_PAGE_SIZE: i64 = 50;
pub const MAX_MESSAGE_PAGE_SIZE: i64 = 100;
pub const SYNC_PAGE_SIZE: i64 = 500;

// Presence
pub const PRESENCE_TTL_SECS: u64 = 90;
pub const PRESENCE_SWEEP_INTERVAL_SECS: u64 = 30;

// Delivery bus
pub const ENVELOPE_VERSION: u16 = 1;
pub const BUS_PARTITIONS: usize = 4;
pub const BUS_CAPACITY: usize = 1024;
pub const BUS_MAX_ATTEMPTS: u32 = 3;
pub const DEAD_LETTER_CAPACITY: usize = 256;

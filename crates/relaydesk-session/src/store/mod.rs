pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use relaydesk_core::Result;

/// 会话持久化使用的键
pub mod keys {
    pub const ACCESS_TOKEN: &str = "auth_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const ROLE: &str = "auth_role";
    pub const LAST_ACTIVITY: &str = "last_activity";

    pub const SESSION_KEYS: [&str; 4] = [ACCESS_TOKEN, REFRESH_TOKEN, ROLE, LAST_ACTIVITY];
}

/// 键值持久化存储
///
/// 每次调用都是一次同步写入。调用方应将错误视为非致命错误：
/// 写入失败只意味着会话无法在重启后恢复。
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// Document collection holding user profiles.
pub const COLLECTION_USERS: &str = "users";

/// Document collection holding conversation records.
pub const COLLECTION_CHATS: &str = "chats";

/// Document collection holding chat messages.
pub const COLLECTION_MESSAGES: &str = "messages";

/// Default page size for message history queries.
pub const DEFAULT_MESSAGE_PAGE: u32 = 50;

/// Default result cap for user search.
pub const DEFAULT_USER_SEARCH_LIMIT: u32 = 20;

/// Result cap for full-text message search.
pub const MESSAGE_SEARCH_CAP: usize = 100;

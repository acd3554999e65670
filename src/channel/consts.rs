pub const GUIDE_VOICE_API_KEY: &str = "GUIDE_VOICE_API_KEY";

pub const BASE_URL: &str = "wss://api.guidevoice.app/v1";
pub const DEFAULT_AGENT: &str = "city-guide-2025";

pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Bounded queue between `Channel::send` and the socket writer task.
pub const SEND_QUEUE_CAPACITY: usize = 64;

mod manager;
mod state;

pub use manager::{SessionManager, student_id};
pub use state::{Phase, SessionState, Status};

// keys in the browser session
pub const CLIENT_ID: &str = "client_id";
pub const ACCESS_TOKEN: &str = "access_token";
pub const RETURN_URL: &str = "return_url";

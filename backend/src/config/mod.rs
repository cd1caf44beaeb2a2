use dotenv::dotenv;
use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub remote_api_url: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Chat refresh interval while a conversation is open.
    pub chat_poll_secs: u64,
    /// Cross-conversation unread badge refresh interval.
    pub unread_poll_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok(); // Load .env file if present
        Ok(Self {
            remote_api_url: env::var("REMOTE_API_URL")
                .unwrap_or_else(|_| "https://buysel.azurewebsites.net/api".to_string()),
            port: env::var("PORT")?.parse()?,
            jwt_secret: env::var("JWT_SECRET")?,
            chat_poll_secs: env::var("CHAT_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            unread_poll_secs: env::var("UNREAD_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        })
    }
}

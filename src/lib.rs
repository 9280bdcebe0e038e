pub mod api;
pub mod auth;
pub mod config;
pub mod github;

use auth::Authenticator;
use config::Config;
use github::GitHubApp;

/// Shared state of the running broker. Everything in here is read-only after
/// construction and safe to share across request handlers without locking.
pub struct AppState {
    pub config: Config,
    pub github: GitHubApp,
    pub auth: Authenticator,
}

impl AppState {
    pub fn new(config: Config, github: GitHubApp, auth: Authenticator) -> Self {
        Self {
            config,
            github,
            auth,
        }
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use duet_db::Database;
use duet_gateway::Gateway;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub gateway: Gateway,
    pub upload_dir: PathBuf,
    /// Accept the legacy `{mockKey}` login payload.
    pub allow_mock_login: bool,
}

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::mailer::Mailer;
use crate::auth::tokens::TokenService;
use crate::config::Config;
use crate::projects::{DynProjectRepository, SqliteProjectRepository};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub tokens: Arc<TokenService>,
    pub mailer: Arc<dyn Mailer>,
    pub projects: DynProjectRepository,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, mailer: Arc<dyn Mailer>) -> Self {
        let tokens = Arc::new(TokenService::from_config(&config.auth));
        let projects = Arc::new(SqliteProjectRepository::new(db.clone()));
        Self {
            db,
            config,
            tokens,
            mailer,
            projects,
        }
    }
}

//! Estado compartilhado entre os handlers HTTP.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{config::AppConfig, llm::LlmManager, sqlite_client::Store};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<Store>,
    pub llm_manager: LlmManager,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

// Módulos da aplicação
mod analyzer;
mod api;
mod app_state;
mod cache;
mod config;
mod errors;
mod gazetteer;
mod llm;
mod models;
mod normalize;
mod rag;
mod sqlite_client;
mod structured;
mod synthesizer;
mod vector_store;

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;

#[tokio::main]
async fn main() {
    // 1. Carregar .env e inicializar o logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Carregar a configuração
    let cfg = config::AppConfig::from_env().expect("Erro ao carregar a configuração");

    // 3. Abrir o banco SQLite e garantir o esquema
    let store = Arc::new(
        sqlite_client::Store::open(Path::new(&cfg.database_path))
            .expect("Erro ao abrir o banco SQLite"),
    );
    sqlite_client::ensure_schema(&store).expect("Erro ao garantir o esquema do banco");

    // 4. Inicializar o gestor de LLMs
    let llm_manager =
        llm::LlmManager::from_config(&cfg).expect("Erro ao inicializar o gestor de LLM");

    // Canal para o sinal de desligamento.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Criar o estado compartilhado da aplicação
    let app_state = AppState {
        config: cfg.clone(),
        store,
        llm_manager,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar o router da API
    let app = api::create_router(app_state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 7. Iniciar o servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .expect("Erro ao abrir a porta do servidor");
    info!("🚀 Servidor escutando em http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Sinal de desligamento recebido, encerrando o servidor.");
        })
        .await
        .expect("Erro no servidor HTTP");

    info!("✅ Servidor encerrado corretamente.");
}

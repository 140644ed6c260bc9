use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use pushkind_matcher::db::establish_connection_pool;
use pushkind_matcher::domain::query::load_query_set;
use pushkind_matcher::models::config::{LlmConfig, LlmProvider, ServerConfig};
use pushkind_matcher::processing::ZMQMessage;
use pushkind_matcher::processing::embedding::{FastTextEmbedder, SimilarityFilter};
use pushkind_matcher::processing::notification::{DispatchSettings, Dispatcher};
use pushkind_matcher::processing::pipeline::MatchPipeline;
use pushkind_matcher::processing::verification::{RetryPolicy, Verifier};
use pushkind_matcher::providers::gemini::GeminiClient;
use pushkind_matcher::providers::ollama::OllamaClient;
use pushkind_matcher::providers::telegram::TelegramChannel;
use pushkind_matcher::providers::{GenerationError, TextGenerator};
use pushkind_matcher::repository::DieselRepository;

fn build_generator(config: &LlmConfig) -> Result<Box<dyn TextGenerator>, GenerationError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider {
        LlmProvider::Gemini => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                GenerationError::Transport("llm.api_key is required for gemini".to_string())
            })?;
            let client = GeminiClient::new(&config.base_url, &config.model, api_key, timeout)?;
            Ok(Box::new(client))
        }
        LlmProvider::Ollama => {
            let client = OllamaClient::new(&config.base_url, config.model.clone(), timeout)?;
            Ok(Box::new(client))
        }
    }
}

fn spawn_dispatcher(
    config: &ServerConfig,
    repo: DieselRepository,
    shutdown: watch::Receiver<bool>,
    wake: Arc<Notify>,
) -> Option<JoinHandle<()>> {
    if !config.notifications.enabled {
        log::info!("Notifications disabled");
        return None;
    }
    let Some(telegram) = &config.telegram else {
        log::warn!("Telegram is not configured; notifications are disabled");
        return None;
    };
    let channel = match TelegramChannel::new(&telegram.base_url, &telegram.bot_token) {
        Ok(channel) => channel,
        Err(e) => {
            log::error!("Failed to create Telegram client: {e}");
            return None;
        }
    };

    let settings = DispatchSettings::from_config(&config.notifications, telegram.chat_id.clone());
    let dispatcher = Dispatcher::new(repo, channel, settings);
    Some(tokio::spawn(dispatcher.run(shutdown, wake)))
}

/// Blocking intake loop; runs on its own thread and forwards parsed
/// messages to the runtime.
fn receive_messages(address: &str, tx: mpsc::Sender<ZMQMessage>) {
    let context = zmq::Context::new();
    let responder = match context.socket(zmq::PULL) {
        Ok(socket) => socket,
        Err(e) => {
            log::error!("Cannot create zmq socket: {e}");
            return;
        }
    };
    if let Err(e) = responder.bind(address) {
        log::error!("Cannot bind to zmq address {address}: {e}");
        return;
    }
    log::info!("Listening for documents on {address}");

    loop {
        let msg = match responder.recv_bytes(0) {
            Ok(msg) => msg,
            Err(e) => {
                log::error!("Failed to receive message: {e}");
                continue;
            }
        };
        match serde_json::from_slice::<ZMQMessage>(&msg) {
            Ok(parsed) => {
                if tx.blocking_send(parsed).is_err() {
                    break;
                }
            }
            Err(e) => log::error!("Failed to parse JSON: {e}"),
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let pool = match establish_connection_pool(&config.database_url) {
        Ok(pool) => pool,
        Err(e) => {
            log::error!("Failed to establish database connection: {e}");
            std::process::exit(1);
        }
    };
    let repo = DieselRepository::new(pool);

    let embedder = match FastTextEmbedder::try_new() {
        Ok(embedder) => embedder,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };
    let generator = match build_generator(&config.llm) {
        Ok(generator) => generator,
        Err(e) => {
            log::error!("Failed to create {:?} client: {e}", config.llm.provider);
            std::process::exit(1);
        }
    };
    let retry_policy = RetryPolicy {
        max_attempts: config.verification.max_attempts,
        rate_limit_backoff: Duration::from_secs(config.verification.rate_limit_backoff_secs),
        transient_backoff: Duration::from_secs(config.verification.transient_backoff_secs),
    };
    let pipeline = Arc::new(MatchPipeline::new(
        SimilarityFilter::new(
            embedder,
            config.matching.top_k,
            config.matching.similarity_threshold,
        ),
        Verifier::new(
            generator,
            retry_policy,
            config.matching.content_excerpt_chars,
        ),
        repo.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let wake = Arc::new(Notify::new());
    let dispatcher = spawn_dispatcher(&config, repo, shutdown_rx, Arc::clone(&wake));

    let (tx, mut rx) = mpsc::channel::<ZMQMessage>(16);
    let zmq_address = config.zmq_documents_pull.clone();
    std::thread::spawn(move || receive_messages(&zmq_address, tx));

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(ZMQMessage::Documents(documents)) => {
                    log::info!("Received {} documents", documents.len());
                    let pipeline = Arc::clone(&pipeline);
                    let questions_path = config.questions_path.clone();
                    let topics_path = config.topics_path.clone();
                    let workers = config.matching.workers;
                    tokio::spawn(async move {
                        let queries = load_query_set(&questions_path, &topics_path);
                        if let Err(e) = pipeline.run(stream::iter(documents), &queries, workers).await {
                            log::error!("Pipeline run failed: {e}");
                        }
                    });
                }
                Some(ZMQMessage::Scan) => wake.notify_one(),
                None => {
                    log::error!("Intake loop stopped");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    shutdown_tx.send(true).ok();
    if let Some(handle) = dispatcher {
        if let Err(e) = handle.await {
            log::error!("Dispatcher task failed: {e}");
        }
    }
}

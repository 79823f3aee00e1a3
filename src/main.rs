use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use hashchain::config::Config;
use hashchain::{api, blockchain};

// Open the ledger at the configured location, creating the genesis block on first start
fn initialize_blockchain(config: &Config) -> anyhow::Result<blockchain::Blockchain> {
    if let Some(parent) = config.ledger.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
    }

    let seed = vec![blockchain::Transaction::new(config.genesis_data.clone())];
    let blockchain = blockchain::Blockchain::open_or_init(&config.ledger, seed)
        .with_context(|| format!("Failed to open ledger at {}", config.ledger.path.display()))?;

    info!(
        "Ledger ready at {} (difficulty {}, {})",
        config.ledger.path.display(),
        config.ledger.difficulty,
        config.ledger.hash_algorithm
    );

    Ok(blockchain)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::append_block,
        api::handlers::get_block,
        api::handlers::get_transaction_proof,
        api::handlers::validate_chain
    ),
    components(
        schemas(
            api::schema::TransactionView,
            api::schema::BlockView,
            api::schema::ChainResponse,
            api::schema::AppendRequest,
            api::schema::AppendResponse,
            api::schema::ProofStepView,
            api::schema::ProofResponse,
            api::schema::InvalidBlockView,
            api::schema::ValidationResponse,
            api::schema::ErrorResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger API endpoints")
    ),
    info(
        title = "Ledger API",
        version = "1.0.0",
        description = "An append-only proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env()?;

    // Open or create the ledger
    let blockchain = web::Data::new(initialize_blockchain(&config)?);

    let bind = (config.server.bind_addr, config.server.port);
    info!("Starting HTTP server at http://{}:{}", bind.0, bind.1);

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}

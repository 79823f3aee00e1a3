use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use log::warn;

use super::schema::{
    AppendRequest, AppendResponse, BlockView, ChainResponse, ErrorResponse, ProofResponse,
    ValidationResponse,
};
use crate::blockchain::{Block, Blockchain, BlockchainError, ErrorKind, Transaction};

/// Data structure for the ledger state
pub type BlockchainData = web::Data<Blockchain>;

/// Maps a ledger error to an HTTP response carrying its kind
fn error_response(err: &BlockchainError) -> HttpResponse {
    let kind = err.kind();
    let status = match kind {
        ErrorKind::NotFound | ErrorKind::ProofNotFound => StatusCode::NOT_FOUND,
        ErrorKind::EmptyInput => StatusCode::BAD_REQUEST,
        ErrorKind::AlreadyInitialized => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        warn!("Request failed with {}: {}", kind, err);
    }

    HttpResponse::build(status).json(ErrorResponse {
        error: err.to_string(),
        kind: kind.to_string(),
    })
}

fn bad_hex(field: &str, value: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: format!("{} is not valid hex: {}", field, value),
        kind: "InvalidInput".to_string(),
    })
}

/// Get the full chain
///
/// Walks the chain from the tip back to the genesis block
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse),
        (status = 500, description = "Corrupt chain or storage failure", body = ErrorResponse)
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let tip = match blockchain.tip() {
        Ok(tip) => tip,
        Err(err) => return error_response(&err),
    };

    let blocks: Result<Vec<Block>, BlockchainError> = match blockchain.iterator() {
        Ok(iter) => iter.collect(),
        Err(err) => Err(err),
    };

    match blocks {
        Ok(blocks) => {
            let blocks: Vec<BlockView> = blocks
                .iter()
                .map(|block| BlockView::new(block, blockchain.pow()))
                .collect();

            HttpResponse::Ok().json(ChainResponse {
                length: blocks.len(),
                tip: hex::encode(tip),
                blocks,
            })
        }
        Err(err) => error_response(&err),
    }
}

/// Append a block
///
/// Mines a new block over the given transactions and makes it the tip
#[utoipa::path(
    post,
    path = "/api/v1/blocks",
    request_body = AppendRequest,
    responses(
        (status = 201, description = "Block mined and appended", body = AppendResponse),
        (status = 400, description = "No transactions supplied", body = ErrorResponse),
        (status = 500, description = "Mining or persistence failure", body = ErrorResponse)
    )
)]
pub async fn append_block(
    blockchain: BlockchainData,
    append_req: web::Json<AppendRequest>,
) -> impl Responder {
    let transactions: Vec<Transaction> = append_req
        .into_inner()
        .transactions
        .into_iter()
        .map(Transaction::new)
        .collect();

    // Mining is CPU bound, keep it off the async workers
    let ledger = blockchain.clone();
    match web::block(move || ledger.append(transactions)).await {
        Ok(Ok(block)) => HttpResponse::Created().json(AppendResponse {
            message: "New Block Mined".to_string(),
            block: BlockView::new(&block, blockchain.pow()),
        }),
        Ok(Err(err)) => error_response(&err),
        Err(err) => HttpResponse::InternalServerError().json(ErrorResponse {
            error: format!("Mining worker failed: {}", err),
            kind: ErrorKind::System.to_string(),
        }),
    }
}

/// Get a block
///
/// Returns the block stored under the given hash
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{hash}",
    params(
        ("hash" = String, Path, description = "Hex encoded block hash")
    ),
    responses(
        (status = 200, description = "Block found", body = BlockView),
        (status = 400, description = "Malformed hash", body = ErrorResponse),
        (status = 404, description = "Block not found", body = ErrorResponse)
    )
)]
pub async fn get_block(blockchain: BlockchainData, hash: web::Path<String>) -> impl Responder {
    let hash = hash.into_inner();
    let key = match hex::decode(&hash) {
        Ok(key) => key,
        Err(_) => return bad_hex("hash", &hash),
    };

    match blockchain.block(&key) {
        Ok(Some(block)) => HttpResponse::Ok().json(BlockView::new(&block, blockchain.pow())),
        Ok(None) => error_response(&BlockchainError::BlockNotFound(hash)),
        Err(err) => error_response(&err),
    }
}

/// Get a Merkle inclusion proof
///
/// Proves that a transaction is committed to by a block's Merkle root
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{hash}/proof/{tx_id}",
    params(
        ("hash" = String, Path, description = "Hex encoded block hash"),
        ("tx_id" = String, Path, description = "Hex encoded transaction id")
    ),
    responses(
        (status = 200, description = "Proof generated", body = ProofResponse),
        (status = 400, description = "Malformed hash or id", body = ErrorResponse),
        (status = 404, description = "Block or transaction not found", body = ErrorResponse)
    )
)]
pub async fn get_transaction_proof(
    blockchain: BlockchainData,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (hash, tx_id) = path.into_inner();
    let block_hash = match hex::decode(&hash) {
        Ok(bytes) => bytes,
        Err(_) => return bad_hex("hash", &hash),
    };
    let tx_id = match hex::decode(&tx_id) {
        Ok(bytes) => bytes,
        Err(_) => return bad_hex("tx_id", &tx_id),
    };

    match blockchain.transaction_proof(&block_hash, &tx_id) {
        Ok(proof) => HttpResponse::Ok().json(ProofResponse::from(&proof)),
        Err(err) => error_response(&err),
    }
}

/// Check if the chain is valid
///
/// Re-validates the proof of work and hash links of every block
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Chain validation report", body = ValidationResponse),
        (status = 500, description = "Corrupt chain or storage failure", body = ErrorResponse)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    match blockchain.verify_chain() {
        Ok(report) => HttpResponse::Ok().json(ValidationResponse::from(&report)),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::hasher::Sha256Hasher;
    use crate::blockchain::pow::ProofOfWork;
    use crate::blockchain::storage::BlockchainStorage;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn ledger() -> BlockchainData {
        let storage = BlockchainStorage::temporary().unwrap();
        let pow = ProofOfWork::new(Arc::new(Sha256Hasher::new()), 8).unwrap();
        let chain = Blockchain::init_with_store(storage, pow, vec![Transaction::new("G")]).unwrap();
        web::Data::new(chain)
    }

    #[actix_web::test]
    async fn test_append_and_get_chain() {
        let data = ledger();
        let app = test::init_service(
            App::new()
                .app_data(data.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/blocks")
            .set_json(AppendRequest {
                transactions: vec!["A".to_string(), "B".to_string()],
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let appended: AppendResponse = test::read_body_json(resp).await;
        assert!(appended.block.pow_valid);
        assert_eq!(appended.block.transactions.len(), 2);

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let chain: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(chain.length, 2);
        assert_eq!(chain.tip, appended.block.hash);
        assert_eq!(chain.blocks[1].transactions[0].payload, "G");
        assert_eq!(chain.blocks[0].prev_block_hash, chain.blocks[1].hash);
        assert!(chain.blocks[1].prev_block_hash.is_empty());
    }

    #[actix_web::test]
    async fn test_append_empty_is_bad_request() {
        let app =
            test::init_service(App::new().app_data(ledger()).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/blocks")
            .set_json(AppendRequest {
                transactions: Vec::new(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.kind, "EmptyInput");
    }

    #[actix_web::test]
    async fn test_get_block_and_proof() {
        let data = ledger();
        let block = data
            .append(vec![
                Transaction::new("A"),
                Transaction::new("B"),
                Transaction::new("C"),
            ])
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(data.clone())
                .configure(configure_routes),
        )
        .await;

        let uri = format!("/api/v1/blocks/{}", hex::encode(&block.hash));
        let req = test::TestRequest::get().uri(&uri).to_request();
        let view: BlockView = test::call_and_read_body_json(&app, req).await;
        assert_eq!(view.nonce, block.nonce);

        let uri = format!(
            "/api/v1/blocks/{}/proof/{}",
            hex::encode(&block.hash),
            hex::encode(&block.transactions[2].id)
        );
        let req = test::TestRequest::get().uri(&uri).to_request();
        let proof: ProofResponse = test::call_and_read_body_json(&app, req).await;
        assert!(proof.verified);
        assert_eq!(proof.steps.len(), 2);
        assert_eq!(proof.steps[0].side, "right");

        let uri = format!(
            "/api/v1/blocks/{}/proof/{}",
            hex::encode(&block.hash),
            hex::encode(Transaction::new("Z").id)
        );
        let req = test::TestRequest::get().uri(&uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_get_block_errors() {
        let app =
            test::init_service(App::new().app_data(ledger()).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/api/v1/blocks/zz").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/v1/blocks/abcd").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.kind, "NotFound");
    }

    #[actix_web::test]
    async fn test_validate_chain() {
        let data = ledger();
        data.append(vec![Transaction::new("A")]).unwrap();
        let app = test::init_service(App::new().app_data(data).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let report: ValidationResponse = test::call_and_read_body_json(&app, req).await;
        assert!(report.is_valid);
        assert_eq!(report.length, 2);
    }
}

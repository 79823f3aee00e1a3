use hashchain::blockchain::merkle::MerkleTree;
use hashchain::blockchain::{Block, Blockchain, ErrorKind, Transaction};
use hashchain::config::Config;

fn config_in(dir: &std::path::Path) -> Config {
    let data_dir = dir.join("ledger").display().to_string();
    Config::from_lookup(|key| match key {
        "LEDGER_DATA_DIR" => Some(data_dir.clone()),
        "LEDGER_DIFFICULTY" => Some("8".to_string()),
        _ => None,
    })
    .unwrap()
}

fn payloads(block: &Block) -> Vec<String> {
    block.transactions.iter().map(|tx| tx.payload_lossy()).collect()
}

#[test]
fn test_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let seed = vec![Transaction::new(config.genesis_data.clone())];

    {
        let chain = Blockchain::open_or_init(&config.ledger, seed.clone()).unwrap();
        chain.append(vec![Transaction::new("A")]).unwrap();
        chain.append(vec![Transaction::new("B")]).unwrap();
    }

    let chain = Blockchain::open_or_init(&config.ledger, seed).unwrap();
    let blocks: Vec<Block> = chain.iterator().unwrap().collect::<Result<_, _>>().unwrap();

    assert_eq!(blocks.len(), 3);
    assert_eq!(payloads(&blocks[0]), vec!["B"]);
    assert_eq!(payloads(&blocks[1]), vec!["A"]);
    assert_eq!(payloads(&blocks[2]), vec!["First Transaction from Genesis"]);
    assert!(blocks[2].is_genesis());
    assert!(chain.verify_chain().unwrap().is_valid());
}

#[test]
fn test_inclusion_proof_against_block_root() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let chain = Blockchain::init(&config.ledger, vec![Transaction::new("G")]).unwrap();

    let block = chain
        .append(["a", "b", "c", "d", "e"].iter().map(|p| Transaction::new(*p)).collect())
        .unwrap();
    let hasher = chain.pow().hasher();

    for tx in &block.transactions {
        let proof = chain.transaction_proof(&block.hash, &tx.id).unwrap();
        assert!(proof.verified);
        assert_eq!(proof.merkle_root, block.hash_transactions(hasher.as_ref()).unwrap());
    }

    // A tree rebuilt with one leaf swapped no longer matches the block.
    let mut tree = MerkleTree::build(
        block.transactions.iter().map(|tx| tx.id.clone()),
        hasher.clone(),
    )
    .unwrap();
    let forged = Transaction::new("forged");
    tree.replace_leaf(0, forged.id.clone());
    assert!(!tree.verify());

    let err = chain.transaction_proof(&block.hash, &forged.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProofNotFound);
}

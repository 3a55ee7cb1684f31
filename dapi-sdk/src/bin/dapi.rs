use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dapi_grpc::registry;
use dapi_sdk::{
    BroadcastOptions, DapiClient, DocumentQuery, Hash, HeaderEvent, Identifier, PublicKeyHash,
    StartFrom,
};
use tokio_stream::StreamExt;

#[derive(Parser)]
#[command(name = "dapi", about = "Dash DAPI command line client", version)]
struct Cli {
    /// gRPC endpoint of a DAPI node
    #[arg(long, short, global = true, default_value = "http://localhost:3010", env = "DAPI_ENDPOINT")]
    endpoint: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Node status
    Status,
    /// Get a block by hash or height (printed as hex)
    Block {
        /// Block hash (display-order hex)
        hash: Option<String>,
        #[arg(long, conflicts_with = "hash")]
        height: Option<u32>,
    },
    /// Transaction operations
    Tx {
        #[command(subcommand)]
        command: TxCommand,
    },
    /// Fee estimate in coins per kB
    Fee {
        #[arg(long, default_value = "6")]
        blocks: u32,
    },
    /// Stream block headers and chain locks
    Headers {
        #[arg(long, default_value = "1")]
        from: u32,
        /// Number of headers; 0 follows new blocks until interrupted
        #[arg(long, default_value = "0")]
        count: u32,
    },
    /// Get an identity by id, or by public key hash
    Identity {
        /// Identity id (base58)
        id: Option<String>,
        /// Hash160 of the identity's first public key (hex)
        #[arg(long, conflicts_with = "id")]
        key_hash: Option<String>,
    },
    /// Get a data contract (printed as hex)
    Contract { id: String },
    /// Query documents of one type
    Documents {
        contract: String,
        document_type: String,
        #[arg(long, default_value = "0")]
        limit: u32,
        /// Start after this document id (base58)
        #[arg(long)]
        start_after: Option<String>,
    },
    /// List the methods a server answers (offline)
    Methods,
}

#[derive(Subcommand)]
enum TxCommand {
    /// Get a transaction by id
    Get { txid: String },
    /// Broadcast a raw transaction given as hex
    Broadcast {
        hex: String,
        #[arg(long)]
        allow_high_fees: bool,
        #[arg(long)]
        bypass_limits: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Command::Methods = cli.command {
        print_methods();
        return Ok(());
    }

    let client = DapiClient::connect(&cli.endpoint)
        .await
        .with_context(|| format!("failed to connect to {}", cli.endpoint))?;
    match cli.command {
        Command::Status => handle_status(&client).await,
        Command::Block { hash, height } => handle_block(&client, hash, height).await,
        Command::Tx { command } => handle_tx(&client, command).await,
        Command::Fee { blocks } => {
            println!("{}", client.core().estimated_fee(blocks).await?);
            Ok(())
        }
        Command::Headers { from, count } => handle_headers(&client, from, count).await,
        Command::Identity { id, key_hash } => handle_identity(&client, id, key_hash).await,
        Command::Contract { id } => {
            let id: Identifier = id.parse().context("invalid contract id")?;
            let contract = client
                .platform()
                .data_contract(&id)
                .await?
                .context("data contract not found")?;
            println!("{}", hex::encode(contract));
            Ok(())
        }
        Command::Documents {
            contract,
            document_type,
            limit,
            start_after,
        } => handle_documents(&client, contract, document_type, limit, start_after).await,
        Command::Methods => unreachable!(),
    }
}

fn print_methods() {
    for method in registry::METHODS {
        println!("{:<7} {:<17} {}", method.version, method.kind, method.full_path());
    }
}

async fn handle_status(client: &DapiClient) -> Result<()> {
    let status = client.core().status().await?;
    println!("state:           {:?}", status.state);
    println!("chain:           {}", status.chain);
    println!("blocks:          {}", status.blocks);
    println!("headers:         {}", status.headers);
    println!("best_block_hash: {}", status.best_block_hash);
    println!("sync_progress:   {:.4}", status.sync_progress);
    println!("version:         {} ({})", status.core_version, status.agent);
    println!("peers:           {}", status.peers);
    println!("relay_fee:       {}", status.relay_fee);
    if let Some(masternode) = status.masternode {
        println!("masternode:      {}", masternode);
    }
    Ok(())
}

async fn handle_block(client: &DapiClient, hash: Option<String>, height: Option<u32>) -> Result<()> {
    let block = match (hash, height) {
        (Some(hash), _) => {
            let hash: Hash = hash.parse().context("invalid block hash")?;
            client.core().block(&hash).await?.context("block not found")?
        }
        (None, Some(height)) => client.core().block_by_height(height).await?,
        (None, None) => anyhow::bail!("pass a block hash or --height"),
    };
    println!("{}", hex::encode(block));
    Ok(())
}

async fn handle_tx(client: &DapiClient, cmd: TxCommand) -> Result<()> {
    match cmd {
        TxCommand::Get { txid } => {
            let txid: Hash = txid.parse().context("invalid transaction id")?;
            let tx = client
                .core()
                .transaction(&txid)
                .await?
                .context("transaction not found")?;
            match tx.block_hash {
                Some(block_hash) => {
                    println!("block_hash:    {block_hash}");
                    println!("height:        {}", tx.height);
                }
                None => println!("status:        mempool"),
            }
            println!("confirmations: {}", tx.confirmations);
            println!("instant_lock:  {}", tx.is_instant_locked);
            println!("chain_lock:    {}", tx.is_chain_locked);
            println!("raw:           {}", hex::encode(&tx.transaction));
        }
        TxCommand::Broadcast {
            hex: raw,
            allow_high_fees,
            bypass_limits,
        } => {
            let raw = hex::decode(raw.trim()).context("transaction is not valid hex")?;
            let options = BroadcastOptions {
                allow_high_fees,
                bypass_limits,
            };
            let txid = client.core().broadcast_transaction(raw, options).await?;
            println!("txid: {txid}");
        }
    }
    Ok(())
}

async fn handle_headers(client: &DapiClient, from: u32, count: u32) -> Result<()> {
    let mut stream = client
        .subscriptions()
        .block_headers(StartFrom::Height(from), count)
        .await?;
    let mut height = from;
    while let Some(event) = stream.next().await {
        match event? {
            HeaderEvent::Headers(headers) => {
                for header in headers {
                    println!("header {height}: {}", hex::encode(header));
                    height += 1;
                }
            }
            HeaderEvent::ChainLock(lock) => println!("chainlock: {}", hex::encode(lock)),
        }
    }
    Ok(())
}

async fn handle_identity(
    client: &DapiClient,
    id: Option<String>,
    key_hash: Option<String>,
) -> Result<()> {
    let identity = match (id, key_hash) {
        (Some(id), _) => {
            let id: Identifier = id.parse().context("invalid identity id")?;
            client.platform().identity(&id).await?
        }
        (None, Some(key_hash)) => {
            let hash: PublicKeyHash = key_hash.parse().context("invalid public key hash")?;
            client.platform().identity_by_public_key_hash(&hash).await?
        }
        (None, None) => anyhow::bail!("pass an identity id or --key-hash"),
    };
    println!("{}", hex::encode(identity.context("identity not found")?));
    Ok(())
}

async fn handle_documents(
    client: &DapiClient,
    contract: String,
    document_type: String,
    limit: u32,
    start_after: Option<String>,
) -> Result<()> {
    let contract: Identifier = contract.parse().context("invalid contract id")?;
    let mut query = DocumentQuery::new(contract, document_type).with_limit(limit);
    if let Some(start) = start_after {
        query = query.start_after(start.parse().context("invalid start id")?);
    }
    for document in client.platform().documents(query).await? {
        println!("{}", hex::encode(document));
    }
    Ok(())
}

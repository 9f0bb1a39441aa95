use std::error::Error;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use starknet::accounts::{ExecutionEncoding, SingleOwnerAccount};
use starknet::core::types::{BlockId, BlockTag};
use starknet::providers::jsonrpc::{HttpTransport, JsonRpcClient};
use starknet::providers::Provider;
use starknet::signers::{LocalWallet, SigningKey};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use zylith_core::math::sqrt_price_at_tick;
use zylith_core::{
    felt_to_hex, format_amount, parse_amount, parse_felt, u256_to_biguint, ActionIntent,
    ActionOrchestrator, ActionOutcome, ActionRequest, AggregateRecompute, ChainGateway, Direction,
    FieldHash, FileNoteStore, HttpIndexer, Indexer, IndexingPoller, NoteKind, NoteLedger,
    PoolContext, Runtime, RuntimeHandle, StarknetGateway, ZylithConfig,
};
use zylith_prover::{validate_artifacts, SnarkjsProver};

const PRIVATE_KEY_ENV: &str = "ZYLITH_PRIVATE_KEY";

#[derive(Parser)]
#[command(name = "zylith-cli")]
#[command(about = "shielded liquidity client for the zylith pool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Q64.96 square-root price at a tick.
    SqrtPrice {
        #[arg(long, allow_hyphen_values = true)]
        tick: i32,
    },
    /// Current price, liquidity and reserves.
    Pool,
    /// Estimate a swap, or a deposit when ticks are given.
    Quote {
        #[command(flatten)]
        trade: TradeArgs,
        #[arg(long, allow_hyphen_values = true, requires = "tick_upper")]
        tick_lower: Option<i32>,
        #[arg(long, allow_hyphen_values = true, requires = "tick_lower")]
        tick_upper: Option<i32>,
    },
    Swap {
        #[command(flatten)]
        trade: TradeArgs,
        /// Wait for this note to become ready first.
        #[arg(long)]
        after: Option<FieldHash>,
    },
    AddLiquidity {
        #[command(flatten)]
        trade: TradeArgs,
        #[arg(long, allow_hyphen_values = true)]
        tick_lower: i32,
        #[arg(long, allow_hyphen_values = true)]
        tick_upper: i32,
        #[arg(long)]
        after: Option<FieldHash>,
    },
    Withdraw {
        #[arg(long)]
        note: FieldHash,
    },
    CollectFees {
        #[arg(long)]
        note: FieldHash,
    },
    RemoveLiquidity {
        #[arg(long)]
        note: FieldHash,
    },
    /// List ledger notes.
    Notes {
        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },
    /// One indexer pass over pending notes.
    Poll,
    Aggregates {
        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },
    Tokens,
    /// Poll and recompute in the background until interrupted.
    Run,
}

#[derive(Args, Clone)]
struct TradeArgs {
    /// `0to1` spends token0, `1to0` spends token1.
    #[arg(long)]
    direction: Direction,
    /// Decimal amount, scaled by `--decimals`.
    #[arg(long)]
    amount: String,
    #[arg(long, default_value_t = 18)]
    decimals: u8,
}

impl TradeArgs {
    fn base_units(&self) -> Result<u128, Box<dyn Error>> {
        Ok(parse_amount(&self.amount, self.decimals)?)
    }
}

type Account = SingleOwnerAccount<JsonRpcClient<HttpTransport>, LocalWallet>;

struct Services {
    config: ZylithConfig,
    ledger: Arc<NoteLedger>,
    indexer: Arc<dyn Indexer>,
}

impl Services {
    fn load() -> Result<Self, Box<dyn Error>> {
        let config = ZylithConfig::from_env()?;
        let store = FileNoteStore::from_env(&config.ledger_path)?;
        if !store.is_sealed() {
            info!(path = %store.path().display(), "ledger file is not encrypted");
        }
        let ledger = Arc::new(NoteLedger::new(Arc::new(store)));
        let indexer = Arc::new(HttpIndexer::new(
            config.indexer_url.clone(),
            config.indexer_timeout,
        )?);
        Ok(Self {
            config,
            ledger,
            indexer,
        })
    }

    async fn chain(&self) -> Result<Arc<dyn ChainGateway>, Box<dyn Error>> {
        let account = build_account(&self.config).await?;
        Ok(Arc::new(StarknetGateway::new(
            account,
            self.config.pool_address,
            self.config.retry.clone(),
        )))
    }

    /// For quotes and pool reads; never proves.
    async fn orchestrator(&self) -> Result<Arc<ActionOrchestrator>, Box<dyn Error>> {
        Ok(self.orchestrator_on(self.chain().await?))
    }

    /// Fails early when any circuit's wasm, zkey or verification key is missing.
    async fn proving_orchestrator(&self) -> Result<Arc<ActionOrchestrator>, Box<dyn Error>> {
        validate_artifacts(&self.config.artifacts_dir)?;
        self.orchestrator().await
    }

    fn orchestrator_on(&self, chain: Arc<dyn ChainGateway>) -> Arc<ActionOrchestrator> {
        let pool = PoolContext {
            pool: self.config.pool_address,
            token0: self.config.token0,
            token1: self.config.token1,
            recipient: self.config.account_address,
        };
        Arc::new(ActionOrchestrator::new(
            chain,
            self.indexer.clone(),
            Arc::new(SnarkjsProver::new(&self.config.artifacts_dir)),
            self.ledger.clone(),
            pool,
        ))
    }

    async fn runtime(&self) -> Result<(Runtime, RuntimeHandle), Box<dyn Error>> {
        validate_artifacts(&self.config.artifacts_dir)?;
        let chain = self.chain().await?;
        let recompute = AggregateRecompute::new(chain.clone(), self.ledger.clone());
        Ok(Runtime::new(
            self.orchestrator_on(chain),
            self.poller(),
            recompute,
            self.config.poll_interval,
            self.config.aggregate_interval,
        ))
    }

    fn poller(&self) -> IndexingPoller {
        IndexingPoller::new(
            self.indexer.clone(),
            self.ledger.clone(),
            self.config.indexer_timeout,
        )
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        error!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    if let Commands::SqrtPrice { tick } = cli.command {
        println!("sqrt_price={}", u256_to_biguint(sqrt_price_at_tick(tick)?));
        return Ok(());
    }

    let services = Services::load()?;
    match cli.command {
        Commands::SqrtPrice { .. } => {}
        Commands::Pool => {
            let overview = services.orchestrator().await?.pool_overview().await?;
            println!("sqrt_price={}", u256_to_biguint(overview.state.sqrt_price));
            println!("tick={}", overview.state.tick);
            println!("liquidity={}", overview.state.liquidity);
            println!("reserve0={}", u256_to_biguint(overview.reserves.reserve0));
            println!("reserve1={}", u256_to_biguint(overview.reserves.reserve1));
        }
        Commands::Quote {
            trade,
            tick_lower,
            tick_upper,
        } => {
            let intent = intent(&trade, tick_lower.zip(tick_upper))?;
            let quote = services.orchestrator().await?.quote(&intent).await?;
            println!("sqrt_price={}", u256_to_biguint(quote.state.sqrt_price));
            println!("tick={}", quote.state.tick);
            println!("liquidity={}", quote.state.liquidity);
            println!("amount_out={}", quote.amount_out);
            if tick_lower.is_some() {
                println!("co_required={}", quote.co_required);
            }
        }
        Commands::Swap { trade, after } => {
            let intent = intent(&trade, None)?;
            let outcome = queued(&services, ActionRequest::Intent(intent), after).await?;
            print_outcome(&outcome);
        }
        Commands::AddLiquidity {
            trade,
            tick_lower,
            tick_upper,
            after,
        } => {
            let intent = intent(&trade, Some((tick_lower, tick_upper)))?;
            let outcome = queued(&services, ActionRequest::Intent(intent), after).await?;
            print_outcome(&outcome);
        }
        Commands::Withdraw { note } => {
            let outcome = services.proving_orchestrator().await?.withdraw(&note).await?;
            print_outcome(&outcome);
        }
        Commands::CollectFees { note } => {
            let outcome = services.proving_orchestrator().await?.collect_fees(&note).await?;
            print_outcome(&outcome);
        }
        Commands::RemoveLiquidity { note } => {
            let outcome = services.proving_orchestrator().await?.remove_liquidity(&note).await?;
            print_outcome(&outcome);
        }
        Commands::Notes { decimals } => {
            for note in services.ledger.notes().await? {
                let token = match services.config.token_id(note.token) {
                    Ok(id) => format!("token{id}"),
                    Err(_) => felt_to_hex(note.token),
                };
                let kind = match note.kind {
                    NoteKind::Swap => "swap".to_string(),
                    NoteKind::Lp {
                        tick_lower,
                        tick_upper,
                    } => format!("lp[{tick_lower},{tick_upper}]"),
                };
                let quoted = note
                    .quoted_amount
                    .map(|q| format!(" quoted={}", format_amount(q, decimals, 6)))
                    .unwrap_or_default();
                println!(
                    "{} {token} {kind} {:?} amount={}{quoted}",
                    note.fingerprint(),
                    note.status,
                    format_amount(note.amount, decimals, 6),
                );
            }
        }
        Commands::Poll => {
            let report = services.poller().poll_once().await?;
            println!("checked={}", report.checked);
            for fingerprint in &report.promoted {
                println!("ready {fingerprint}");
            }
            for fingerprint in &report.still_pending {
                println!("pending {fingerprint}");
            }
            for (fingerprint, err) in &report.errors {
                println!("error {fingerprint}: {err}");
            }
        }
        Commands::Aggregates { decimals } => {
            let recompute = AggregateRecompute::new(services.chain().await?, services.ledger.clone());
            let aggregates = recompute.recompute().await?;
            for (token, totals) in &aggregates.tokens {
                println!(
                    "{} withdrawable={} pending={}",
                    felt_to_hex(*token),
                    format_amount(totals.withdrawable, decimals, 6),
                    totals.pending_notes
                );
            }
            println!("fees_owed0={}", aggregates.fees_owed0);
            println!("fees_owed1={}", aggregates.fees_owed1);
            if aggregates.unread_positions > 0 {
                println!("unread_positions={}", aggregates.unread_positions);
            }
        }
        Commands::Tokens => {
            for token in services.indexer.tokens().await? {
                println!(
                    "{} {} {} decimals={}",
                    token.address, token.symbol, token.name, token.decimals
                );
            }
        }
        Commands::Run => {
            let (runtime, handle) = services.runtime().await?;
            let task = tokio::spawn(runtime.run());
            tokio::signal::ctrl_c().await?;
            info!("interrupt received, stopping");
            handle.shutdown().await;
            task.await?;
        }
    }
    Ok(())
}

fn intent(trade: &TradeArgs, ticks: Option<(i32, i32)>) -> Result<ActionIntent, Box<dyn Error>> {
    let amount = trade.base_units()?;
    Ok(match ticks {
        Some((tick_lower, tick_upper)) => ActionIntent::AddLiquidity {
            direction: trade.direction,
            amount,
            tick_lower,
            tick_upper,
        },
        None => ActionIntent::Swap {
            direction: trade.direction,
            amount,
        },
    })
}

/// Runs one action through the queue so `--after` can wait on polling.
async fn queued(
    services: &Services,
    request: ActionRequest,
    after: Option<FieldHash>,
) -> Result<ActionOutcome, Box<dyn Error>> {
    let (runtime, handle) = services.runtime().await?;
    let task = tokio::spawn(runtime.run());
    let outcome = handle.submit(request, after).await;
    handle.shutdown().await;
    task.await?;
    Ok(outcome?)
}

fn print_outcome(outcome: &ActionOutcome) {
    println!("path={:?}", outcome.path);
    println!("tx_hash={:#x}", outcome.tx_hash);
    let entrypoints: Vec<String> = outcome
        .calls
        .iter()
        .map(|call| call.entrypoint.to_string())
        .collect();
    println!("calls={}", entrypoints.join(","));
    if let Some(note) = outcome.output_note {
        println!("note={note}");
    }
    if let Some(quoted) = outcome.quoted_amount {
        println!("quoted_amount={quoted}");
    }
}

async fn build_account(config: &ZylithConfig) -> Result<Account, Box<dyn Error>> {
    let provider = JsonRpcClient::new(HttpTransport::new(config.rpc_url.clone()));
    let chain_id = match config.chain_id {
        Some(chain_id) => chain_id,
        None => provider
            .chain_id()
            .await
            .map_err(|e| format!("failed to fetch chain_id: {e}"))?,
    };
    let private_key = std::env::var(PRIVATE_KEY_ENV)
        .map_err(|_| format!("{PRIVATE_KEY_ENV} is not set"))?;
    let signing_key = SigningKey::from_secret_scalar(parse_felt(&private_key)?);
    let mut account = SingleOwnerAccount::new(
        provider,
        LocalWallet::from(signing_key),
        config.account_address,
        chain_id,
        ExecutionEncoding::New,
    );
    account.set_block_id(BlockId::Tag(BlockTag::Latest));
    Ok(account)
}

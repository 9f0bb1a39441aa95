//! Zylith client core: shielded notes, the local ledger, CLMM math and the
//! action orchestrator that turns intents into proven multi-calls.

pub mod calldata;
mod chain;
mod commitment;
mod config;
mod error;
mod indexer;
mod ledger;
pub mod math;
mod notes;
mod orchestrator;
mod poller;
mod runtime;
mod store;
mod utils;
pub mod witness;

pub use chain::{
    ChainGateway, ContractCall, Entrypoint, PoolState, PositionFees, RawNumber, RawPoolState,
    RawPosition, RawReserves, Reserves, StarknetGateway,
};
pub use commitment::{
    derive_commitment, derive_identity, derive_nullifier_hash, poseidon_pair, random_scalar,
    FieldHash,
};
pub use config::{
    finalize_config, load_config, RawConfig, RetryConfig, ZylithConfig, CONFIG_ENV,
    INDEXER_TIMEOUT_ENV,
};
pub use error::ClientError;
pub use indexer::{HttpIndexer, Indexer, MerklePath, TokenMeta};
pub use ledger::{LedgerSnapshot, NoteLedger, NoteStore, Promotion};
pub use math::Direction;
pub use notes::{NoteKind, NoteStatus, ShieldedNote};
pub use orchestrator::{
    ActionIntent, ActionOrchestrator, ActionOutcome, ActionPhase, ExecutionPath, PoolContext,
    PoolOverview, Quote,
};
pub use poller::{AggregateRecompute, Aggregates, IndexingPoller, PollReport, TokenAggregate};
pub use runtime::{ActionRequest, Runtime, RuntimeHandle};
pub use store::{FileNoteStore, MemoryNoteStore, LEDGER_KEY_ENV};
pub use utils::{
    felt_to_decimal, felt_to_hex, format_amount, i32_to_felt, parse_amount, parse_felt,
    u256_to_biguint, Address,
};

pub mod admission;
pub mod api;
pub mod config;
pub mod correlate;
#[macro_use]
pub mod log;
pub mod memory_store;
pub mod pg_store;
pub mod reason;
pub mod reducer;
pub mod reorg;
pub mod status;
pub mod store;
pub mod types;
pub mod wire;

pub use admission::{AdmissionError, InsertStateUpdateResult};
pub use api::{ChannelLedger, InsertStateUpdateRejection, SelfTestResult};
pub use config::Config;
pub use memory_store::MemoryStore;
pub use pg_store::PgStore;
pub use reason::Reason;
pub use reorg::ReorgResult;
pub use store::Store;
pub use types::*;
pub use wire::{
    AmountText, ChannelEventInput, ChannelIntentInput, ChannelKeyInput, EventFieldsInput,
    StateUpdateInput,
};

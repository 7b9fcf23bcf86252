pub mod config;
pub mod errors;
pub mod flows;

pub use errors::FlowError;
pub use flows::{
    FlowId, FlowRegistry, IdGenerator, IdPattern, MemoryStateStore, StateStore, StoreError,
    UuidGenerator,
};

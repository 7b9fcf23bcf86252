pub mod ids;
pub mod registry;
pub mod store;

pub use ids::{
    create_flow_id, create_interaction_id, parse_flow_id, parse_interaction_id, validate_segment,
    FlowId, FlowIdParts, IdGenerator, IdPattern, IdentifierParseError, InteractionIdParts,
    InvalidSegmentError, SegmentKind, UuidGenerator, FLOW_ID_SEPARATOR, INTERACTION_SEPARATOR,
};
pub use registry::{DuplicateFlowError, FlowRegistry};
pub use store::{is_expired, tombstone_expiry, MemoryStateStore, StateStore, StoreError};

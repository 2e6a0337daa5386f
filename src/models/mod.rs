pub mod enriched;
pub mod labels;
pub mod record;

pub use enriched::{AgentColumns, AnalysisColumns, EnrichedRecord, LearnerColumns};
pub use labels::{LearnerLabel, SocraticLabel};
pub use record::{CoreColumns, InteractionRecord, InteractionType, RecordKey};

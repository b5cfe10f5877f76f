pub mod arranger;
pub mod assembler;
pub mod paper_writer;
pub mod planner;
pub mod pool;
pub mod selector;
pub mod validator;
pub mod warn_writer;

pub use assembler::{finalize, AttemptStats, GeneratedPaperResult, PaperQuestion};
pub use paper_writer::{JsonPaperWriter, PaperSink};
pub use planner::{Planner, SelectionTarget};
pub use pool::{CandidatePool, PartitionKey, PartitionStat};
pub use selector::{AttemptFailure, Selection, Selector};
pub use validator::{ValidationReport, Validator};
pub use warn_writer::WarnWriter;

pub mod blueprint;
pub mod loaders;
pub mod presets;
pub mod question;
pub mod subject;

pub use blueprint::PaperBlueprint;
pub use loaders::{load_all_bank_files, load_repository, BankFile};
pub use question::{Difficulty, Paper, Question, Topic};
pub use subject::Subject;

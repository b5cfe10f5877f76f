pub mod toml_loader;

pub use toml_loader::{build_repository, load_all_bank_files, load_bank_file, load_repository, BankFile};

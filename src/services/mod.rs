pub mod export;
pub mod gc;
pub mod import;

pub use export::export_backup;
pub use gc::collect_orphans;
pub use import::import_backup;

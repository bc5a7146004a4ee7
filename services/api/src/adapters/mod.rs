pub mod auth;
pub mod backend;
pub mod change_feed;
pub mod db;
pub mod file_store;
pub mod storage;

pub use auth::SessionAuth;
pub use backend::HttpStudyBackend;
pub use change_feed::PgChangeFeed;
pub use db::DbAdapter;
pub use file_store::FileKeyValueStore;
pub use storage::LocalFileStorage;

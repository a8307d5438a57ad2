pub mod keystore;
pub mod paths;

pub use keystore::KeyStore;
pub use paths::AppPaths;

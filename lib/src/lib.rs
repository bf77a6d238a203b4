pub mod convert;
pub mod error;
pub mod format;
pub mod import;
pub mod scene;
pub mod util;

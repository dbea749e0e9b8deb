pub mod get;
pub mod list;

pub use get::{FileDetail, GetFileError, GetFileQuery};
pub use list::{ListFilesError, ListFilesQuery, ListFilesResponse};

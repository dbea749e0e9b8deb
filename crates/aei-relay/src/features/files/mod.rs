pub mod queries;
pub mod routes;

pub use queries::{
    FileDetail, GetFileError, GetFileQuery, ListFilesError, ListFilesQuery, ListFilesResponse,
};
pub use routes::files_routes;

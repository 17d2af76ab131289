//! # modelsync
//!
//! Uploads a 3D model package (model file, preview images and catalog
//! metadata) to an S3-compatible object store and a Google Drive folder tree
//! at the same time, joins both uploads into one task and registers the
//! result with the catalog API.
//!
//! The `modelsync` binary is a thin CLI over [`services::coordinator`].

#![forbid(unsafe_code)]

pub mod model;
pub mod settings;
pub mod services;
pub mod utils;

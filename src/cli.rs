use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use modelsync::model::error::SubmitError;
use modelsync::model::package::{CategoryPath, ModelMetadata, ModelPackage};
use modelsync::utils::version;

#[derive(Parser, Debug)]
#[command(author, version = version(), about)]
pub struct Cli {
    /// Object store credentials file, the first file in the data `creds` folder otherwise
    #[arg(long, global = true, value_name = "FILE")]
    pub creds: Option<PathBuf>,

    /// Settings file, `config.toml` in the config folder otherwise
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a model package to both stores and register it in the catalog
    Upload(UploadArgs),
    /// Show every known task
    List,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Model file to upload
    pub model: PathBuf,

    /// Category label, repeat from root to leaf
    #[arg(short, long = "category", required = true, value_name = "LABEL")]
    pub categories: Vec<String>,

    /// Preview image, repeat for more
    #[arg(short, long = "image", value_name = "FILE")]
    pub images: Vec<PathBuf>,

    /// Catalog name, the model file stem otherwise
    #[arg(short, long)]
    pub name: Option<String>,

    #[arg(long, default_value = "4.1")]
    pub blender_version: String,

    #[arg(long, default_value = "Cycles")]
    pub render_engine: String,
}

impl UploadArgs {
    pub fn into_package(self) -> Result<ModelPackage, SubmitError> {
        let category_path = CategoryPath::new(self.categories)?;
        let display_name = self.name.unwrap_or_else(|| {
            self.model
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        Ok(ModelPackage {
            model_path: self.model,
            image_paths: self.images,
            metadata: ModelMetadata {
                display_name,
                category_path,
                blender_version: self.blender_version,
                render_engine: self.render_engine,
            },
        })
    }
}

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "iv", about = "image vault - uploads, AI tagging, vector search")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct FilterArgs {
    /// Filter by tag name(s) - comma separated (e.g. person,women)
    #[arg(long)]
    pub tag: Option<String>,

    /// Search by description text
    #[arg(long)]
    pub desc: Option<String>,

    /// Filter by color(s) - comma separated names or hex (e.g. red,#0000FF)
    #[arg(long)]
    pub color: Option<String>,

    /// Number of images to skip
    #[arg(long, default_value_t = 0)]
    pub skip: usize,

    /// Maximum number of images to return (1-100)
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP daemon with the background enrichment queue
    Daemon {},

    /// Upload image files and run AI enrichment
    Upload {
        /// Files to upload
        paths: Vec<PathBuf>,

        /// Owner of the uploaded images
        #[arg(long, default_value = "local")]
        user: String,

        /// Skip enrichment (images stay pending)
        #[arg(long, default_value_t = false)]
        no_process: bool,
    },

    /// List images with optional filters
    List {
        #[command(flatten)]
        filters: FilterArgs,

        #[arg(long, default_value = "local")]
        user: String,

        /// Print the number of matches only
        #[arg(long, default_value_t = false)]
        count: bool,
    },

    /// List images ranked by tag-vector similarity
    Similar {
        #[command(flatten)]
        filters: FilterArgs,

        /// Similarity threshold (0.0-1.0)
        #[arg(long, default_value_t = 0.5)]
        threshold: f32,

        #[arg(long, default_value = "local")]
        user: String,
    },

    /// Show one image with its AI metadata
    Get {
        /// Image id
        id: String,
    },

    /// Re-trigger AI enrichment for an image
    Process {
        /// Image id
        id: String,

        #[arg(long, default_value = "local")]
        user: String,
    },

    /// Delete an image and its stored files
    Delete {
        /// Image id
        id: String,

        #[arg(long, default_value = "local")]
        user: String,
    },

    /// List distinct tag labels, most frequent first
    Tags {},
}

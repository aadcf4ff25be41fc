//! Images command - list, check, pull, inspect and remove images.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use tracing::info;

use dockpipe_runner::{DockerEngine, EngineConfig, Image, ImageManager};

#[derive(Args)]
pub struct ImagesArgs {
    /// Print JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: ImagesCommand,
}

#[derive(Subcommand)]
enum ImagesCommand {
    /// List cached images
    List,

    /// Check whether an image is cached (prints true/false)
    Exists {
        /// Image name, with or without tag
        name: String,
    },

    /// Pull an image
    Pull {
        /// Image reference
        reference: String,
    },

    /// Show one image
    Inspect {
        /// Image id or reference
        id: String,
    },

    /// Force-remove an image
    #[command(name = "rm")]
    Remove {
        /// Image id or reference
        id: String,
    },
}

pub async fn execute(args: ImagesArgs, engine_config: &EngineConfig) -> Result<()> {
    let engine = DockerEngine::connect(engine_config).await?;
    let images = ImageManager::new(Arc::new(engine));

    match args.command {
        ImagesCommand::List => {
            let list = images.list().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                print_table(&list);
            }
        }
        ImagesCommand::Exists { name } => {
            println!("{}", images.exists(&name).await);
        }
        ImagesCommand::Pull { reference } => {
            let image = images.pull(&reference).await?;
            info!("Pulled {}", reference);
            print_image(&image, args.json)?;
        }
        ImagesCommand::Inspect { id } => {
            let image = images.inspect(&id).await?;
            print_image(&image, args.json)?;
        }
        ImagesCommand::Remove { id } => {
            images.remove(&id).await?;
            println!("Removed {}", id);
        }
    }

    Ok(())
}

fn print_image(image: &Image, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(image)?);
    } else {
        print_table(std::slice::from_ref(image));
    }
    Ok(())
}

fn print_table(images: &[Image]) {
    println!("{:<24} {:<40} {:>12}", "ID", "SLUG", "SIZE");
    for image in images {
        let id = image.id.trim_start_matches("sha256:");
        let short_id = &id[..id.len().min(12)];
        println!("{:<24} {:<40} {:>12}", short_id, image.slug, image.size);
    }
}

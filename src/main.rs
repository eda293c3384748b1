use std::sync::{Arc, RwLock};

use anyhow::{bail, Context};
use clap::Parser;

mod app;
mod auth;
mod cli;
mod config;
mod eid;
mod imgproc;
mod library;
mod search;
mod storage;
#[cfg(test)]
mod tests;
mod vectors;
mod vision;
mod web;

use app::{AppBackend, AppLocal, UploadFile, UploadOpts};
use config::Config;
use search::ImageQuery;

/// Split a comma separated filter value, dropping empty entries.
pub fn parse_csv_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(String::from)
        .collect()
}

fn build_query(filters: cli::FilterArgs, threshold: Option<f32>) -> ImageQuery {
    ImageQuery {
        tags: filters.tag.map(|t| parse_csv_list(&t)),
        description: filters.desc,
        colors: filters.color.map(|c| parse_csv_list(&c)),
        threshold: threshold.unwrap_or(search::DEFAULT_SIMILARITY_THRESHOLD),
        skip: filters.skip,
        limit: filters.limit,
    }
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let config = Arc::new(RwLock::new(Config::load()));
    let mut app_mgr = AppLocal::new(config.clone())?;

    match args.command {
        cli::Command::Daemon {} => {
            app_mgr.run_queue();
            web::start_daemon(app_mgr);
            Ok(())
        }

        cli::Command::Upload {
            paths,
            user,
            no_process,
        } => {
            if paths.is_empty() {
                bail!("nothing to upload");
            }

            let mut files = vec![];
            for path in paths {
                let data = std::fs::read(&path)
                    .with_context(|| format!("couldnt read {}", path.display()))?;
                let filename = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| "image".to_string());
                files.push(UploadFile { filename, data });
            }

            let records = app_mgr.upload(
                &user,
                files,
                UploadOpts {
                    // no queue runs in CLI mode: inline enrichment unless
                    // --no-process, which leaves the records pending
                    async_process: no_process,
                },
            )?;

            if records.is_empty() {
                bail!("no files were accepted");
            }

            // statuses changed during inline enrichment
            let fresh: Vec<_> = records
                .iter()
                .filter_map(|r| app_mgr.get(&r.id).ok())
                .collect();
            println!("{}", serde_json::to_string_pretty(&fresh)?);
            Ok(())
        }

        cli::Command::List {
            filters,
            user,
            count,
        } => {
            let page = app_mgr.list(&user, build_query(filters, None))?;

            if count {
                println!("{} of {} images", page.count, page.total);
                return Ok(());
            }

            println!("{}", serde_json::to_string_pretty(&page)?);
            Ok(())
        }

        cli::Command::Similar {
            filters,
            threshold,
            user,
        } => {
            let page = app_mgr.similar(&user, build_query(filters, Some(threshold)))?;
            println!("{}", serde_json::to_string_pretty(&page)?);
            Ok(())
        }

        cli::Command::Get { id } => {
            let record = app_mgr.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }

        cli::Command::Process { id, user } => {
            app_mgr.reprocess(
                &user,
                &id,
                UploadOpts {
                    async_process: false,
                },
            )?;
            let record = app_mgr.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }

        cli::Command::Delete { id, user } => {
            app_mgr.delete(&user, &id)?;
            println!("image {id} removed");
            Ok(())
        }

        cli::Command::Tags {} => {
            let tags = app_mgr.tags()?;
            println!("{}", serde_json::to_string_pretty(&tags)?);
            Ok(())
        }
    }
}

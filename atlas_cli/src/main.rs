mod cli;

use anyhow::Context;
use atlas_core::o11y::{LogFormat, init_tracing};
use atlas_core::{
    AtlasConfig, BulkJobDispatcher, CollectionCreate, CollectionService, JobQueue, ListQuery,
    MappingSchemaValidator, ScopeId, StorageBackend,
};
use clap::Parser;
use cli::{Cli, Commands, LogFormatArg};
use std::path::Path;
use std::sync::Arc;

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_document(path: &Path) -> anyhow::Result<serde_json::Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    let value = if is_yaml {
        serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))?
    } else {
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?
    };
    Ok(value)
}

#[tokio::main]
#[tracing::instrument(level = "info")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(match cli.log_format {
        LogFormatArg::Json => LogFormat::Json,
        LogFormatArg::Pretty => LogFormat::Pretty,
    })?;

    let mut config = AtlasConfig::from_env()?;
    if let Some(db) = cli.db {
        config.sqlite_path = db;
    }

    match cli.command {
        Commands::Config => print_json(&config),
        command => run(&config, command).await,
    }
}

async fn build_service(
    config: &AtlasConfig,
) -> anyhow::Result<(CollectionService, Arc<dyn JobQueue>)> {
    let store = config.open_store().await?;
    let queue = config.open_queue().await?;
    if config.storage == StorageBackend::Memory {
        tracing::warn!("memory storage: queued jobs are dropped when the process exits");
    }
    let dispatcher = BulkJobDispatcher::new(queue.clone(), Arc::new(MappingSchemaValidator));
    let service =
        CollectionService::new(store, dispatcher).with_category_policy(config.category_policy);
    Ok((service, queue))
}

#[tracing::instrument(level = "info", skip(config))]
async fn run(config: &AtlasConfig, command: Commands) -> anyhow::Result<()> {
    let (service, queue) = build_service(config).await?;

    match command {
        Commands::Load { dir } => {
            let outcome = service.load_fixture(&dir).await?;
            tracing::info!(
                collection_id = %outcome.scope.id,
                created = outcome.scope_created,
                "fixture loaded"
            );
            print_json(&serde_json::json!({
                "collection": outcome.scope,
                "collection_created": outcome.scope_created,
                "summary": outcome.summary,
            }))?;
        }
        Commands::Create {
            label,
            foreign_id,
            public,
            summary,
        } => {
            let scope = service
                .create_collection(CollectionCreate {
                    label,
                    foreign_id,
                    public,
                    summary,
                })
                .await?;
            print_json(&scope)?;
        }
        Commands::List { limit, offset } => {
            print_json(&service.list_collections(ListQuery { limit, offset }).await?)?;
        }
        Commands::Entities {
            collection,
            limit,
            offset,
        } => {
            let entities = service
                .list_entities(ScopeId(collection), ListQuery { limit, offset })
                .await?;
            print_json(&entities)?;
        }
        Commands::Delete { collection } => {
            let removed = service.delete_collection(ScopeId(collection)).await?;
            print_json(&serde_json::json!({ "entities_removed": removed }))?;
        }
        Commands::Bulk {
            collection,
            file,
            merge,
        } => {
            let payloads = match read_document(&file).await? {
                serde_json::Value::Array(items) => items,
                single => vec![single],
            };
            let outcome = service
                .bulk(ScopeId(collection), &payloads, merge)
                .await?;
            print_json(&outcome)?;
        }
        Commands::Process { collection } => {
            print_json(&service.process(ScopeId(collection)).await?)?;
        }
        Commands::Mapping { collection, file } => {
            let body = read_document(&file).await?;
            let handles = service.mapping(ScopeId(collection), &body).await?;
            if handles.is_empty() {
                tracing::warn!(%collection, "request body holds no queries for this collection");
            }
            print_json(&handles)?;
        }
        Commands::Jobs => {
            print_json(&queue.list_pending().await?)?;
        }
        Commands::Take => match queue.take_next().await? {
            Some((handle, request)) => {
                tracing::info!(job_id = %handle.job_id, kind = %handle.kind, "job claimed");
                print_json(&serde_json::json!({ "job": handle, "request": request }))?;
            }
            None => print_json(&serde_json::Value::Null)?,
        },
        Commands::Config => print_json(config)?,
    }

    Ok(())
}

//! CLI for inspecting a running engine's data directory directly: entity
//! lookups, index management, and ad-hoc AQL queries against the admin
//! facade (spec §6), without going through the HTTP transport.

use std::collections::BTreeMap;

use clap::{Parser, Subcommand};
use themis_admin::AdminFacade;
use themis_core::catalog::IndexKind;
use themis_core::config::EngineConfig;
use themis_core::entity::Entity;

#[derive(Parser)]
#[command(name = "themis-cli", about = "Inspect and manage a ThemisDB data directory")]
struct Args {
    /// Directory the KV engine persists to.
    #[arg(long, default_value = "./data")]
    data_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write an entity: --fields is a JSON object of field name -> value.
    Put {
        table: String,
        pk: String,
        #[arg(long, default_value = "{}")]
        fields: String,
    },
    /// Read an entity and print it as JSON.
    Get { table: String, pk: String },
    /// Delete an entity.
    Delete { table: String, pk: String },
    /// Create a secondary index.
    CreateIndex {
        table: String,
        /// Comma-separated column list.
        columns: String,
        #[arg(long, value_enum)]
        kind: IndexKindArg,
        #[arg(long)]
        vector_dim: Option<u32>,
    },
    /// Drop a secondary index.
    DropIndex {
        table: String,
        columns: String,
        #[arg(long, value_enum)]
        kind: IndexKindArg,
    },
    /// Run an AQL query and print the result rows as JSON.
    Query {
        text: String,
        #[arg(long, default_value = "{}")]
        bind_vars: String,
    },
    /// Print index/transaction/changefeed stats.
    Stats,
    /// Print changefeed events since a sequence number.
    Changefeed {
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum IndexKindArg {
    Equality,
    Range,
    Composite,
    Sparse,
    Fulltext,
    Spatial,
    Vector,
}

impl From<IndexKindArg> for IndexKind {
    fn from(arg: IndexKindArg) -> Self {
        match arg {
            IndexKindArg::Equality => IndexKind::Equality,
            IndexKindArg::Range => IndexKind::Range,
            IndexKindArg::Composite => IndexKind::Composite,
            IndexKindArg::Sparse => IndexKind::Sparse,
            IndexKindArg::Fulltext => IndexKind::Fulltext,
            IndexKindArg::Spatial => IndexKind::Spatial,
            IndexKindArg::Vector => IndexKind::Vector,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = EngineConfig::default();
    config.data_dir = args.data_dir.into();
    config.cte_spill_dir = config.data_dir.join("cte-spill");
    let facade = AdminFacade::open(config)?;

    match args.command {
        Command::Put { table, pk, fields } => {
            let fields: BTreeMap<String, serde_json::Value> = serde_json::from_str(&fields)?;
            let mut entity = Entity::new(table, pk, now_ms());
            for (name, value) in fields {
                entity = entity.with_field(name, themis_admin::dto::json_to_value(&value));
            }
            facade.put_entity(entity, now_ms(), None)?;
            println!("ok");
        }
        Command::Get { table, pk } => match facade.get_entity(&table, &pk, None)? {
            Some(entity) => {
                let fields: BTreeMap<_, _> = entity
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), themis_admin::dto::value_to_json(v)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&fields)?);
            }
            None => println!("not found"),
        },
        Command::Delete { table, pk } => {
            let deleted = facade.delete_entity(&table, &pk, None)?;
            println!("{deleted}");
        }
        Command::CreateIndex { table, columns, kind, vector_dim } => {
            let columns: Vec<String> = columns.split(',').map(|s| s.trim().to_string()).collect();
            facade.create_index(kind.into(), &table, columns, vector_dim)?;
            println!("ok");
        }
        Command::DropIndex { table, columns, kind } => {
            let columns: Vec<String> = columns.split(',').map(|s| s.trim().to_string()).collect();
            let dropped = facade.drop_index(&table, &columns, kind.into())?;
            println!("{dropped}");
        }
        Command::Query { text, bind_vars } => {
            let bind_vars: BTreeMap<String, serde_json::Value> = serde_json::from_str(&bind_vars)?;
            let bind_vars: std::collections::HashMap<String, themis_core::value::Value> =
                bind_vars.into_iter().map(|(k, v)| (k, themis_admin::dto::json_to_value(&v))).collect();
            let rows = facade.execute_aql(&text, bind_vars, None)?;
            let json_rows: Vec<_> = rows.iter().map(themis_admin::dto::value_to_json).collect();
            println!("{}", serde_json::to_string_pretty(&json_rows)?);
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&facade.stats()?)?);
        }
        Command::Changefeed { from, limit } => {
            println!("{}", serde_json::to_string_pretty(&facade.changefeed_read(from, limit)?)?);
        }
    }
    Ok(())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `outline_link_core` linkage.
//! - Optionally open a database and validate a schema configuration.
//!
//! Usage: `outline_link_cli [DB_PATH [SCHEMA_CONFIG_JSON]]`

use outline_link_core::{open_db, SchemaConfig, StaticSchemaCatalog};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("outline_link_core ping={}", outline_link_core::ping());
    println!(
        "outline_link_core version={}",
        outline_link_core::core_version()
    );

    let mut args = std::env::args().skip(1);
    let Some(db_path) = args.next() else {
        return ExitCode::SUCCESS;
    };

    let conn = match open_db(&db_path) {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("failed to open `{db_path}`: {err}");
            return ExitCode::FAILURE;
        }
    };
    match conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0)) {
        Ok(version) => println!("db path={db_path} schema_version={version}"),
        Err(err) => {
            eprintln!("failed to read schema version: {err}");
            return ExitCode::FAILURE;
        }
    }

    if let Some(config_path) = args.next() {
        let catalog = SchemaConfig::from_path(&config_path)
            .and_then(StaticSchemaCatalog::from_config);
        match catalog {
            Ok(catalog) => println!("schemas={}", catalog.schema_ids().join(",")),
            Err(err) => {
                eprintln!("invalid schema config `{config_path}`: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

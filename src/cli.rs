use clap::{Arg, ArgMatches, Command};
use tokio::sync::broadcast::error::RecvError;

use crate::config::DbConfig;
use crate::db;
use crate::errors::ConnectionError;
use crate::models::HealthStatus;

pub fn cli() -> Command {
    let uri_arg = Arg::new("uri")
        .long("uri")
        .help("Connection string (overrides MONGODB_URI / DATABASE_URL)")
        .value_name("URI");

    Command::new("mongoline")
        .subcommand(
            Command::new("check")
                .about("Connect to the configured database and report health")
                .arg(uri_arg.clone()),
        )
        .subcommand(
            Command::new("watch")
                .about("Connect and print lifecycle events until interrupted")
                .arg(uri_arg),
        )
}

pub async fn handle_cli() -> Result<(), Box<dyn std::error::Error>> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("check", sub_matches)) => check(resolve_config(sub_matches)?).await,
        Some(("watch", sub_matches)) => watch(resolve_config(sub_matches)?).await,
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}

fn resolve_config(matches: &ArgMatches) -> Result<DbConfig, ConnectionError> {
    let config = match matches.get_one::<String>("uri") {
        Some(uri) => DbConfig::new(uri.clone()),
        None => DbConfig::from_env()?,
    };
    Ok(config.app_name("mongoline"))
}

async fn check(config: DbConfig) -> Result<(), Box<dyn std::error::Error>> {
    let handle = db::connect(config);

    match handle.ready().await {
        Ok(_) => {
            let health = HealthStatus {
                db_status: "database online!".to_string(),
                error: None,
            };
            println!("{}", serde_json::to_string_pretty(&health)?);
            handle.close().await;
        }
        Err(err) => {
            let health = HealthStatus {
                db_status: "database offline :(".to_string(),
                error: Some(err.to_string()),
            };
            eprintln!("{}", serde_json::to_string_pretty(&health)?);
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn watch(config: DbConfig) -> Result<(), Box<dyn std::error::Error>> {
    let handle = db::connect(config);
    let mut states = handle.state_changes();
    let mut events = handle.events();

    println!("state: {}", handle.state());

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("state: {}", *states.borrow_and_update());
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.close().await;
    Ok(())
}

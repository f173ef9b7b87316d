use sqlmate::config::{load_config, Config};
use sqlmate::{Authorization, BlockingClient, Client, Params, Response, SqlmateError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, Level};

const USAGE: &str = "usage: sqlmate [--config FILE] [--dir DIR] [--database NAME] [--debug] <SQL>";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    dir: Option<PathBuf>,
    database: Option<String>,
    debug: bool,
    query: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => parsed.config = Some(args.next().ok_or("--config needs a path")?.into()),
            "--dir" => parsed.dir = Some(args.next().ok_or("--dir needs a path")?.into()),
            "--database" => parsed.database = Some(args.next().ok_or("--database needs a name")?),
            "--debug" => parsed.debug = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with("--") => return Err(format!("unknown option {}\n{}", other, USAGE)),
            _ if parsed.query.is_some() => return Err(format!("only one query is accepted\n{}", USAGE)),
            _ => parsed.query = Some(arg),
        }
    }
    Ok(parsed)
}

fn build_client(args: &Args) -> Result<Client, SqlmateError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if args.debug {
        config.client.debug = true;
    }

    if let Some(dir) = &args.dir {
        let database = args
            .database
            .clone()
            .unwrap_or_else(|| config.auth.default_database.clone());
        let auth = Authorization::sqlite(dir, database);
        return Ok(Client::builder(auth)
            .options(config.client)
            .engine_config(config.engine)
            .build());
    }
    if args.config.is_none() {
        let auth = Authorization::env_with_database(args.database.as_deref())?;
        return Ok(Client::builder(auth)
            .options(config.client)
            .engine_config(config.engine)
            .build());
    }
    if let Some(database) = &args.database {
        config.auth.default_database = database.clone();
    }
    Client::from_config(&config)
}

fn render(response: &Response) -> serde_json::Value {
    if response.columns.is_empty() {
        serde_json::json!({
            "rows_affected": response.rows_affected,
            "last_insert_id": response.last_insert_id,
        })
    } else {
        response.to_json()
    }
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };
    let Some(query) = args.query.clone() else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    tracing_subscriber::fmt()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    let result = build_client(&args)
        .and_then(BlockingClient::new)
        .and_then(|client| client.run(&query, None, Params::None, None));

    match result {
        Ok(response) => match serde_json::to_string_pretty(&render(&response)) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(error = %e.chain(), "query failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, String> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--dir", "/tmp/x", "--database", "shop", "--debug", "SELECT 1"]).unwrap();
        assert_eq!(parsed.dir, Some(PathBuf::from("/tmp/x")));
        assert_eq!(parsed.database.as_deref(), Some("shop"));
        assert!(parsed.debug);
        assert_eq!(parsed.query.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(args(&["--dir"]).is_err());
        assert!(args(&["--bogus"]).is_err());
        assert!(args(&["SELECT 1", "SELECT 2"]).is_err());
    }
}

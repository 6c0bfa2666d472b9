use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;
use vaccine_ledger_api::LedgerContract;
use vaccine_ledger_core::{
    AttributeIdentity, ContractProfile, Invocation, InvocationContext, LedgerError, TransientMap,
    TxMeta, TxTimestamp, BUILTIN_PROFILES,
};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "vl")]
#[command(about = "Vaccine ledger CLI")]
struct Cli {
    #[arg(long, default_value = "./vaccine_ledger.sqlite3")]
    db: PathBuf,

    /// Built-in contract profile.
    #[arg(long, default_value = "fabvaccine", conflicts_with = "profile_file")]
    profile: String,

    /// YAML contract profile; replaces `--profile`.
    #[arg(long)]
    profile_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    Invoke(InvokeArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    Show,
    List,
}

#[derive(Debug, Args)]
struct InvokeArgs {
    function: String,
    args: Vec<String>,
    /// Transient entry as `name=<json>`; switches the call to the private channel.
    #[arg(long = "transient", value_parser = parse_pair)]
    transient: Vec<(String, String)>,
    /// Identity attribute as `name=value`.
    #[arg(long = "attr", value_parser = parse_pair)]
    attrs: Vec<(String, String)>,
    #[arg(long)]
    tx_id: Option<String>,
    /// RFC 3339 transaction timestamp; defaults to now.
    #[arg(long)]
    tx_time: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorReport<'a> {
    error: String,
    kind: &'a str,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Db { command } => run_db(&cli, command).map(|()| ExitCode::SUCCESS),
        Command::Profile { command } => run_profile(&cli, command).map(|()| ExitCode::SUCCESS),
        Command::Invoke(args) => run_invoke(&cli, args),
    }
}

fn run_db(cli: &Cli, command: &DbCommand) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = vaccine_ledger_api::schema_status(&cli.db)?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
            }))
        }
        DbCommand::Migrate(args) => {
            let result = vaccine_ledger_api::migrate(&cli.db, args.dry_run)?;
            emit_json(serde_json::to_value(result).context("failed to encode migrate result")?)
        }
    }
}

fn run_profile(cli: &Cli, command: &ProfileCommand) -> Result<()> {
    match command {
        ProfileCommand::Show => {
            let profile = load_profile(cli)?;
            print!("{}", serde_yaml::to_string(&profile).context("failed to encode profile")?);
            Ok(())
        }
        ProfileCommand::List => emit_json(serde_json::json!({ "profiles": BUILTIN_PROFILES })),
    }
}

fn run_invoke(cli: &Cli, args: &InvokeArgs) -> Result<ExitCode> {
    let profile = load_profile(cli)?;
    let mut contract = LedgerContract::open_sqlite(&cli.db, profile)?;
    debug!(db = %cli.db.display(), profile = %contract.profile().name, "ledger opened");

    let input = build_invocation(args)?;
    let tx = TxMeta {
        tx_id: args.tx_id.clone().unwrap_or_else(|| Ulid::new().to_string()),
        timestamp: tx_timestamp(args.tx_time.as_deref())?,
    };
    let identity: AttributeIdentity = args.attrs.iter().cloned().collect();
    let ctx = InvocationContext::new(&tx, &identity);

    match contract.invoke(&args.function, input, &ctx) {
        Ok(payload) => {
            if !payload.is_empty() {
                println!("{}", String::from_utf8_lossy(&payload));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            report_failure(&err)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_invocation(args: &InvokeArgs) -> Result<Invocation> {
    if args.transient.is_empty() {
        return Ok(Invocation::Public(args.args.clone()));
    }
    if !args.args.is_empty() {
        bail!("positional arguments cannot be combined with --transient");
    }
    let map: TransientMap = args
        .transient
        .iter()
        .map(|(name, payload)| (name.clone(), payload.as_bytes().to_vec()))
        .collect();
    Ok(Invocation::Transient(map))
}

fn tx_timestamp(raw: Option<&str>) -> Result<TxTimestamp> {
    let instant = match raw {
        Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)
            .with_context(|| format!("invalid RFC3339 timestamp: {raw}"))?,
        None => OffsetDateTime::now_utc(),
    };
    Ok(TxTimestamp::from_datetime(instant))
}

fn load_profile(cli: &Cli) -> Result<ContractProfile> {
    let profile = match &cli.profile_file {
        Some(path) => {
            let body = fs::read_to_string(path)
                .with_context(|| format!("failed to read profile file {}", path.display()))?;
            serde_yaml::from_str::<ContractProfile>(&body)
                .with_context(|| format!("failed to parse profile file {}", path.display()))?
        }
        None => ContractProfile::builtin(&cli.profile).ok_or_else(|| {
            anyhow!(
                "unknown profile `{}`; built-in profiles: {}",
                cli.profile,
                BUILTIN_PROFILES.join(", ")
            )
        })?,
    };
    profile.validate()?;
    Ok(profile)
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected `name=value`, got `{raw}`")),
    }
}

fn report_failure(err: &LedgerError) -> Result<()> {
    let report = ErrorReport { error: err.to_string(), kind: err.kind() };
    eprintln!("{}", serde_json::to_string(&report).context("failed to encode error report")?);
    Ok(())
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(
            parse_pair(r#"vaccine={"key":"a=b"}"#),
            Ok(("vaccine".to_string(), r#"{"key":"a=b"}"#.to_string()))
        );
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=x").is_err());
    }

    #[test]
    fn explicit_tx_time_is_parsed() -> Result<()> {
        let ts = tx_timestamp(Some("2024-07-01T10:00:00.5Z"))?;
        assert_eq!(ts, TxTimestamp { seconds: 1_719_828_000, nanos: 500_000_000 });
        assert!(tx_timestamp(Some("yesterday")).is_err());
        Ok(())
    }
}

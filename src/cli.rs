use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde_json::json;

use crate::app::{load_rate_tables, CalculatorApp};
use crate::commission::{RateTable, RotationTable};
use crate::config::AppConfig;
use crate::domain::RotationIndex;
use crate::error::{ReinoError, Result};
use crate::format::{format_brl, format_percent, parse_brl_amount};
use crate::integration::outbound::{LeadSink, LoggingLeadSink, SupabaseLeadSink};
use crate::validation::ValidationResult;

#[derive(Parser)]
#[command(name = "reino")]
#[command(version = "0.1.0")]
#[command(about = "Investment commission calculator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory (default.toml, {REINO_ENV}.toml)
    #[arg(short, long, default_value = "config", env = "REINO_CONFIG_DIR")]
    pub config: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Estimate the annual commission for a portfolio
    Quote {
        #[command(flatten)]
        scenario: ScenarioArgs,
        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the commission rate table
    Rates {
        #[arg(long)]
        json: bool,
    },
    /// Run every validator against a portfolio
    Validate {
        #[command(flatten)]
        scenario: ScenarioArgs,
    },
    /// Feed a chat completion message (JSON) into the calculator
    Chat {
        /// Raw message, e.g. '{"type":"completion","data":{...}}'
        payload: String,
        #[command(flatten)]
        scenario: ScenarioArgs,
        /// Submit the resulting lead (Supabase if configured, log otherwise)
        #[arg(long)]
        submit: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ScenarioArgs {
    /// Total patrimony, e.g. 100000 or "R$ 100.000,00"
    #[arg(short, long)]
    pub patrimonio: Option<String>,
    /// Allocation as "Category:Product=amount"; repeatable
    #[arg(short, long = "asset")]
    pub assets: Vec<String>,
    /// Rotation index (1-4)
    #[arg(short, long)]
    pub rotation: Option<i64>,
}

/// Split `"Renda Fixa:CDB=100.000,00"` into category, product and amount
pub fn parse_allocation_arg(arg: &str) -> Result<(String, String, Decimal)> {
    let (key, amount) = arg.rsplit_once('=').ok_or_else(|| {
        ReinoError::InvalidInput(format!("expected Category:Product=amount, got '{}'", arg))
    })?;
    let (category, product) = key.split_once(':').ok_or_else(|| {
        ReinoError::InvalidInput(format!("expected Category:Product, got '{}'", key))
    })?;
    Ok((
        category.to_string(),
        product.to_string(),
        parse_brl_amount(amount)?,
    ))
}

/// Push the scenario through the store exactly as the page would
pub fn apply_scenario(app: &CalculatorApp, scenario: &ScenarioArgs) -> Result<()> {
    let store = app.store();
    if let Some(raw) = &scenario.patrimonio {
        store.set_patrimonio(parse_brl_amount(raw)?, "cli").into_result()?;
    }
    for arg in &scenario.assets {
        let (category, product, amount) = parse_allocation_arg(arg)?;
        store
            .add_selected_asset(&category, &product, "cli")
            .into_result()?;
        store
            .set_allocation(&category, &product, amount, "cli")
            .into_result()?;
    }
    if let Some(rotation) = scenario.rotation {
        store.set_rotation_index(rotation, "cli").into_result()?;
    }
    Ok(())
}

pub fn quote(app: &CalculatorApp, scenario: &ScenarioArgs, as_json: bool) -> Result<()> {
    apply_scenario(app, scenario)?;
    let snapshot = app.outbound_snapshot();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let state = &snapshot.state;
    let commission = &snapshot.commission;
    println!("\x1b[36m=== Commission estimate ===\x1b[0m\n");
    println!("   Patrimony:       {}", format_brl(state.patrimonio()));
    println!("   Rotation index:  {}", state.rotation_index());
    println!(
        "   Allocated:       {} ({})\n",
        format_brl(state.total_allocated()),
        format_percent(state.allocated_fraction())
    );

    println!("   {:<32} {:>18} {:>10} {:>16}", "Asset", "Amount", "Rate", "Annual cost");
    for line in &commission.breakdown {
        let rate = if line.unmatched {
            "\x1b[33m   n/a\x1b[0m".to_string()
        } else {
            format!("{:.2}%", line.rate.applied_pct())
        };
        println!(
            "   {:<32} {:>18} {:>10} {:>16}",
            line.asset_key.to_string(),
            format_brl(line.amount),
            rate,
            format_brl(line.cost)
        );
    }

    println!(
        "\n   \x1b[32mTotal annual cost: {}\x1b[0m",
        format_brl(commission.total_annual_cost)
    );
    let unmatched = commission.unmatched().count();
    if unmatched > 0 {
        println!(
            "   \x1b[33m{} asset(s) have no commission rate and count as zero\x1b[0m",
            unmatched
        );
    }
    Ok(())
}

pub fn show_rates(rates: &RateTable, rotation: &RotationTable, as_json: bool) -> Result<()> {
    if as_json {
        let rows: Vec<serde_json::Value> = rates
            .iter()
            .map(|(key, rate)| {
                let overrides: serde_json::Map<String, serde_json::Value> = RotationIndex::all()
                    .filter_map(|index| {
                        rotation
                            .rate_pct(key, index)
                            .map(|pct| (index.to_string(), json!(pct)))
                    })
                    .collect();
                json!({
                    "asset": key.to_string(),
                    "min": rate.min,
                    "media": rate.media,
                    "max": rate.max,
                    "rotation": overrides,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("   {:<36} {:>8} {:>8} {:>8}   Rotation 1-4", "Asset", "Min", "Media", "Max");
    for (key, rate) in rates.iter() {
        let overrides = if rotation.has_key(key) {
            RotationIndex::all()
                .map(|index| {
                    rotation
                        .rate_pct(key, index)
                        .map(|pct| format!("{:.2}", pct))
                        .unwrap_or_else(|| "-".to_string())
                })
                .collect::<Vec<_>>()
                .join(" / ")
        } else {
            String::new()
        };
        println!(
            "   {:<36} {:>7.2}% {:>7.2}% {:>7.2}%   {}",
            key.to_string(),
            rate.min,
            rate.media,
            rate.max,
            overrides
        );
    }
    println!("\n   {} products", rates.len());
    Ok(())
}

/// Prints every verdict; errors out when the portfolio cannot be submitted
pub fn validate(app: &CalculatorApp, scenario: &ScenarioArgs) -> Result<()> {
    apply_scenario(app, scenario)?;
    let validation = app.validate();

    print_result("patrimonio", &validation.patrimonio);
    print_result("assets", &validation.assets);
    print_result("allocation", &validation.allocation.result);
    println!(
        "     allocated {}",
        format_percent(validation.allocation.total_percentage)
    );
    print_result("rotation", &validation.rotation.result);

    println!();
    for status in app.gate().evaluate(&app.store().snapshot()) {
        let mark = if status.enabled {
            "\x1b[32m✓\x1b[0m"
        } else {
            "\x1b[31m✗\x1b[0m"
        };
        println!("   {} {}", mark, status.step);
    }

    if validation.is_valid() {
        Ok(())
    } else {
        Err(ReinoError::Validation("portfolio is not valid".to_string()))
    }
}

fn print_result(name: &str, result: &ValidationResult) {
    let mark = if result.is_valid {
        "\x1b[32m✓\x1b[0m"
    } else {
        "\x1b[31m✗\x1b[0m"
    };
    println!("   {} {}", mark, name);
    for error in &result.errors {
        println!("     \x1b[31m{}\x1b[0m", error);
    }
    for warning in &result.warnings {
        println!("     \x1b[33m{}\x1b[0m", warning);
    }
}

pub async fn chat(
    app: &CalculatorApp,
    payload: &str,
    scenario: &ScenarioArgs,
    submit: bool,
) -> Result<()> {
    apply_scenario(app, scenario)?;
    let Some(contact) = app.accept_chat_message(payload)? else {
        println!("   message ignored (not a completion)");
        return Ok(());
    };
    println!("   contact: {} <{}> {}", contact.name, contact.email, contact.phone);

    if submit {
        let configured = SupabaseLeadSink::from_config(&app.config().integration)?;
        let sink: Box<dyn LeadSink> = match configured {
            Some(sink) => Box::new(sink),
            None => Box::new(LoggingLeadSink),
        };
        match app.submit_lead(sink.as_ref()).await {
            Some(id) => println!("   \x1b[32msubmitted via {} ({})\x1b[0m", sink.name(), id),
            None => println!("   \x1b[33msubmission via {} failed, see log\x1b[0m", sink.name()),
        }
    }
    Ok(())
}

/// Dispatch one parsed command
pub async fn run(cli: &Cli, config: AppConfig) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Rates { json } => {
            let (rates, rotation) = load_rate_tables(&config.rates)
                .context("failed to load commission rate tables")?;
            show_rates(&rates, &rotation, *json)?;
        }
        Commands::Quote { scenario, json } => quote(&build_app(config)?, scenario, *json)?,
        Commands::Validate { scenario } => validate(&build_app(config)?, scenario)?,
        Commands::Chat {
            payload,
            scenario,
            submit,
        } => chat(&build_app(config)?, payload, scenario, *submit)
            .await
            .context("failed to process chat message")?,
    }
    Ok(())
}

fn build_app(config: AppConfig) -> anyhow::Result<CalculatorApp> {
    CalculatorApp::from_config(config).context("failed to build calculator")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn app() -> CalculatorApp {
        CalculatorApp::builder()
            .rate_table(RateTable::builtin())
            .rotation_table(RotationTable::builtin())
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_allocation_arg() {
        let (category, product, amount) =
            parse_allocation_arg("Renda Fixa:CDB=100.000,50").unwrap();
        assert_eq!(category, "Renda Fixa");
        assert_eq!(product, "CDB");
        assert_eq!(amount, dec!(100000.50));

        assert!(parse_allocation_arg("Renda Fixa:CDB").is_err());
        assert!(parse_allocation_arg("CDB=100").is_err());
        assert!(parse_allocation_arg("Renda Fixa:CDB=abc").is_err());
    }

    #[test]
    fn test_apply_scenario() {
        let app = app();
        let scenario = ScenarioArgs {
            patrimonio: Some("R$ 100.000,00".to_string()),
            assets: vec!["Renda Variável:Ações=50000".to_string()],
            rotation: Some(3),
        };
        apply_scenario(&app, &scenario).unwrap();
        assert_eq!(app.store().get_patrimonio(), dec!(100000));
        assert_eq!(
            app.store().get_allocation("renda variável", "ações"),
            Some(dec!(50000))
        );
        assert_eq!(app.calculator().latest().total_annual_cost, dec!(750));
    }

    #[test]
    fn test_validate_rejects_over_allocation() {
        let app = app();
        let scenario = ScenarioArgs {
            patrimonio: Some("1000".to_string()),
            assets: vec!["Renda Fixa:CDB=1500".to_string()],
            rotation: None,
        };
        assert!(validate(&app, &scenario).is_err());
    }

    #[tokio::test]
    async fn test_run_reports_missing_rate_file_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.rates.table_path = Some(dir.path().join("missing.json"));

        let cli = Cli::try_parse_from(["reino", "rates"]).unwrap();
        let err = run(&cli, config.clone()).await.unwrap_err();
        assert!(format!("{:#}", err).starts_with("failed to load commission rate tables: "));

        let cli = Cli::try_parse_from(["reino", "quote", "--patrimonio", "1000"]).unwrap();
        let err = run(&cli, config).await.unwrap_err();
        assert!(err.to_string().contains("failed to build calculator"));
        assert!(err.downcast_ref::<ReinoError>().is_some());
    }

    #[tokio::test]
    async fn test_run_quote_with_builtin_tables() {
        let cli = Cli::try_parse_from([
            "reino",
            "quote",
            "--patrimonio",
            "100000",
            "--asset",
            "Renda Fixa:CDB=100000",
        ])
        .unwrap();
        assert!(run(&cli, AppConfig::default()).await.is_ok());
    }

    #[test]
    fn test_cli_parses_repeated_assets() {
        let cli = Cli::try_parse_from([
            "reino",
            "quote",
            "--patrimonio",
            "100000",
            "--asset",
            "Renda Fixa:CDB=60000",
            "--asset",
            "Renda Fixa:LCI=40000",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Quote { scenario, json } => {
                assert_eq!(scenario.assets.len(), 2);
                assert!(json);
            }
            _ => panic!("expected quote"),
        }
    }
}

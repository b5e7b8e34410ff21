use clap::{Parser, Subcommand};
use dosetrack_core::fetch::build_request;
use dosetrack_core::*;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dosetrack")]
#[command(about = "Dose journal with effect timing and cost tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// User the command acts for
    #[arg(long, short, global = true, default_value = "default")]
    user: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a dose
    Log {
        /// Amount taken
        #[arg(long)]
        dose: f64,

        #[arg(long, required_unless_present = "remembered")]
        drug: Option<String>,

        #[arg(long, required_unless_present = "remembered")]
        route: Option<String>,

        #[arg(long, required_unless_present = "remembered")]
        units: Option<String>,

        /// Purity in percent; converts the dose when set
        #[arg(long, default_value_t = 0.0)]
        percent: f64,

        #[arg(long, default_value_t = 0.0)]
        cost: f64,

        /// Defaults to CostCurrency when a cost is given
        #[arg(long, default_value = "")]
        currency: String,

        /// Reuse the drug, route and units of the remembered log
        #[arg(long, conflicts_with_all = ["drug", "route", "units", "percent"])]
        remembered: bool,
    },

    /// Show logged doses
    Logs {
        /// Maximum number of logs (0 for all)
        #[arg(long, default_value_t = 0)]
        limit: usize,

        /// Start time of a single log
        #[arg(long, default_value_t = 0)]
        id: i64,

        /// Newest first
        #[arg(long)]
        desc: bool,

        /// Text to search for
        #[arg(long, default_value = "")]
        search: String,

        /// Match the search exactly against this column
        #[arg(long, default_value = "")]
        column: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Remove logged doses
    Remove {
        /// Number of logs to remove (0 for every match)
        #[arg(long, default_value_t = 1)]
        amount: usize,

        /// Remove from the newest end
        #[arg(long)]
        desc: bool,

        /// Start time of a single log
        #[arg(long, default_value_t = 0)]
        id: i64,

        #[arg(long, default_value = "")]
        search: String,

        #[arg(long, default_value = "")]
        column: String,
    },

    /// Remove every log of the user
    Clean,

    /// Change one column of a log
    Change {
        column: String,
        value: String,

        /// Start time of the log (0 for the newest)
        #[arg(long, default_value_t = 0)]
        id: i64,
    },

    /// Time until each effect phase of a log
    Times {
        /// Start time of the log (0 for the newest)
        #[arg(long, default_value_t = 0)]
        id: i64,
    },

    /// Total costs per substance and currency
    Costs,

    /// Remember a log for quick logging
    Remember {
        /// Start time of the log (0 for the newest)
        #[arg(long, default_value_t = 0)]
        id: i64,
    },

    /// Show the remembered log
    Recall,

    /// Forget the remembered log
    Forget,

    /// List users with logs
    Users,

    /// Manage the info table
    Info {
        #[command(subcommand)]
        command: InfoCommand,
    },

    /// Alternative-name tools
    Names {
        #[command(subcommand)]
        command: NamesCommand,
    },

    /// Export the user's logs as CSV
    Export { path: PathBuf },
}

#[derive(Subcommand)]
enum InfoCommand {
    /// Fetch a drug from the info source unless already present
    Fetch { drug: String },
    /// Show every route of a drug
    Show { drug: String },
    /// List drugs in the info table
    List,
    /// Remove a drug from the info table
    Remove { drug: String },
    /// Print the request an HTTP client should send for a drug
    Request { drug: String },
    /// Drop and recreate the info table
    Reset,
}

#[derive(Subcommand)]
enum NamesCommand {
    /// Resolve a name to its canonical form
    Resolve {
        name: String,

        /// substance, route, units or convUnits; all in order when omitted
        #[arg(long)]
        kind: Option<String>,
    },
    /// List the alternative names of a canonical name
    Alt {
        name: String,

        #[arg(long, default_value = "substance")]
        kind: String,
    },
    /// Drop the alt-names tables and seed them again
    Overwrite,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    dosetrack_core::logging::init(&config);

    // Printing a request touches neither the store nor the alt-names
    if let Commands::Info {
        command: InfoCommand::Request { drug },
    } = &cli.command
    {
        let request = build_request(drug, &config.proxy_url)?;
        println!("{}", serde_json::to_string_pretty(&request)?);
        return Ok(());
    }

    let display_offset = config.timezone_offset()?;
    let journal = Journal::open(config)?;
    let ctx = journal.context();
    let user = cli.user;
    tracing::debug!("Running command for user {}", user);

    match cli.command {
        Commands::Log {
            dose,
            drug,
            route,
            units,
            percent,
            cost,
            currency,
            remembered,
        } => {
            let row = if remembered {
                journal
                    .log_remembered(&ctx, &user, dose)
                    .map_err(|e| Error::in_action(Action::Recall, e))?
            } else {
                let new = NewDose::new(
                    user.as_str(),
                    drug.unwrap_or_default(),
                    route.unwrap_or_default(),
                    dose,
                    units.unwrap_or_default(),
                )
                .with_percent(percent)
                .with_cost(cost, currency);
                match journal.handle(&ctx, Request::Append(new))? {
                    Outcome::Appended(row) => row,
                    other => return Err(unexpected(other)),
                }
            };
            println!("Logged {} at {}", describe(&row), row.start_time);
        }
        Commands::Logs {
            limit,
            id,
            desc,
            search,
            column,
            json,
        } => {
            let query = LogQuery {
                username: user,
                limit,
                id,
                descending: desc,
                search,
                exact_column: column,
            };
            let rows = match journal.handle(&ctx, Request::Get(query))? {
                Outcome::Logs(rows) => rows,
                other => return Err(unexpected(other)),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in &rows {
                    print_log(row, display_offset);
                }
            }
        }
        Commands::Remove {
            amount,
            desc,
            id,
            search,
            column,
        } => {
            let query = LogQuery {
                username: user,
                limit: amount,
                id,
                descending: desc,
                search,
                exact_column: column,
            };
            match journal.handle(&ctx, Request::Remove(query))? {
                Outcome::Removed(n) => println!("Removed {} logs", n),
                other => return Err(unexpected(other)),
            }
        }
        Commands::Clean => {
            let n = journal
                .clean(&ctx, &user)
                .map_err(|e| Error::in_action(Action::Remove, e))?;
            println!("Removed {} logs", n);
        }
        Commands::Change { column, value, id } => {
            let request = Request::Change {
                username: user,
                id,
                column,
                value,
            };
            match journal.handle(&ctx, request)? {
                Outcome::Changed(row) => {
                    println!("Changed {} at {}", describe(&row), row.start_time)
                }
                other => return Err(unexpected(other)),
            }
        }
        Commands::Times { id } => {
            match journal.handle(&ctx, Request::Times { username: user, id })? {
                Outcome::Times(t) => print_times(&t),
                other => return Err(unexpected(other)),
            }
        }
        Commands::Costs => {
            let entries = match journal.handle(&ctx, Request::Costs { username: user })? {
                Outcome::Costs(entries) => entries,
                other => return Err(unexpected(other)),
            };
            let shown: Vec<_> = entries.iter().filter(|e| e.is_displayable()).collect();
            if shown.is_empty() {
                println!("No costs recorded");
            }
            for entry in shown {
                println!("{}: {:.2} {}", entry.substance, entry.total, entry.currency);
            }
        }
        Commands::Remember { id } => {
            match journal.handle(&ctx, Request::Remember { username: user, id })? {
                Outcome::Remembered(id) => println!("Remembered log {}", id),
                other => return Err(unexpected(other)),
            }
        }
        Commands::Recall => {
            match journal.handle(&ctx, Request::Recall { username: user })? {
                Outcome::Recalled(row) => print_log(&row, display_offset),
                other => return Err(unexpected(other)),
            }
        }
        Commands::Forget => {
            match journal.handle(&ctx, Request::Forget { username: user })? {
                Outcome::Forgotten => println!("Forgot remembered log"),
                other => return Err(unexpected(other)),
            }
        }
        Commands::Users => {
            let users = journal
                .users(&ctx)
                .map_err(|e| Error::in_action(Action::Get, e))?;
            for name in users {
                println!("{}", name);
            }
        }
        Commands::Info { command } => run_info(&journal, &ctx, command)?,
        Commands::Names { command } => {
            run_names(&journal, &ctx, command).map_err(|e| Error::in_action(Action::Names, e))?
        }
        Commands::Export { path } => {
            let n = journal
                .export_csv(&ctx, &user, &path)
                .map_err(|e| Error::in_action(Action::Get, e))?;
            println!("Exported {} logs to {}", n, path.display());
        }
    }
    Ok(())
}

fn run_info(journal: &Journal, ctx: &Context, command: InfoCommand) -> Result<()> {
    let info = journal.info();
    let tag = |e| Error::in_action(Action::Info, e);
    match command {
        InfoCommand::Fetch { drug } => match journal.handle(ctx, Request::Fetch { drug: drug.clone() })? {
            Outcome::Fetched(FetchOutcome::AlreadyPresent) => {
                println!("{} is already in the info table", drug)
            }
            Outcome::Fetched(FetchOutcome::Stored(n)) => println!("Stored {} routes for {}", n, drug),
            other => return Err(unexpected(other)),
        },
        InfoCommand::Show { drug } => {
            let canonical = journal
                .resolver()
                .match_name(ctx, &drug, NameType::Substance)
                .map_err(tag)?;
            for row in info.get_drug_info(ctx, &canonical).map_err(tag)? {
                print_info(&row);
            }
        }
        InfoCommand::List => {
            for name in info.drug_names(ctx).map_err(tag)? {
                println!("{}", name);
            }
        }
        InfoCommand::Remove { drug } => {
            let canonical = journal
                .resolver()
                .match_name(ctx, &drug, NameType::Substance)
                .map_err(tag)?;
            let n = info.remove_drug(ctx, &canonical).map_err(tag)?;
            println!("Removed {} routes of {}", n, canonical);
        }
        InfoCommand::Reset => {
            info.recreate(ctx).map_err(tag)?;
            println!("Info table recreated");
        }
        InfoCommand::Request { drug } => {
            return Err(Error::Other(format!(
                "info request for {} must be printed before the journal opens",
                drug
            )))
        }
    }
    Ok(())
}

fn run_names(journal: &Journal, ctx: &Context, command: NamesCommand) -> Result<()> {
    let resolver = journal.resolver();
    match command {
        NamesCommand::Resolve { name, kind } => {
            let resolved = match kind {
                Some(kind) => resolver.match_name(ctx, &name, kind.parse()?)?,
                None => resolver.resolve_any(ctx, &name)?,
            };
            println!("{}", resolved);
        }
        NamesCommand::Alt { name, kind } => {
            let kind: NameType = kind.parse()?;
            let local = resolver.match_name(ctx, &name, kind)?;
            for alt in resolver.alt_names(ctx, &local, kind)? {
                println!("{}", alt);
            }
        }
        NamesCommand::Overwrite => {
            resolver.overwrite(ctx)?;
            println!("Alt-names tables reseeded");
        }
    }
    Ok(())
}

/// Error for an outcome that does not answer the request that was sent
fn unexpected(outcome: Outcome) -> Error {
    Error::Other(format!("Unexpected outcome {:?}", outcome))
}

fn describe(row: &LogRow) -> String {
    format!(
        "{} {} of {} ({})",
        row.dose, row.dose_units, row.drug_name, row.drug_route
    )
}

fn print_log(row: &LogRow, offset: Option<chrono::FixedOffset>) {
    let mut line = format!(
        "[{}] {} {}",
        row.start_time,
        format_timestamp(row.start_time, offset),
        describe(row)
    );
    if row.end_time != 0 {
        line.push_str(&format!(" until {}", format_timestamp(row.end_time, offset)));
    }
    if row.cost != 0.0 {
        line.push_str(&format!(" cost {:.2} {}", row.cost, row.cost_currency));
    }
    println!("{}", line);
}

fn print_info(row: &InfoRow) {
    println!("{} ({}), units {}", row.drug_name, row.drug_route, row.dose_units);
    if row.threshold != 0.0 {
        println!("  threshold: {}", row.threshold);
    }
    for (name, band) in [
        ("low", &row.low_dose),
        ("medium", &row.medium_dose),
        ("high", &row.high_dose),
    ] {
        println!("  {}: {}-{}", name, band.min, band.max);
    }
    for (name, phase) in [
        ("onset", &row.onset),
        ("comeup", &row.comeup),
        ("peak", &row.peak),
        ("offset", &row.offset),
        ("total", &row.total),
    ] {
        if phase.min != 0.0 || phase.max != 0.0 {
            println!("  {}: {}-{} {}", name, phase.min, phase.max, phase.units);
        }
    }
}

fn format_duration(seconds: i64) -> String {
    format!("{}h {:02}m {:02}s", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

fn print_times(t: &TimeTill) {
    println!("onset:  {}", format_duration(t.onset));
    println!("comeup: {}", format_duration(t.comeup));
    println!("peak:   {}", format_duration(t.peak));
    println!("offset: {}", format_duration(t.offset));
    println!("total:  {}", format_duration(t.total));
    println!(
        "complete: {:.0}% (min {:.0}%, max {:.0}%)",
        t.total_complete_avg * 100.0,
        t.total_complete_min * 100.0,
        t.total_complete_max * 100.0
    );
}
